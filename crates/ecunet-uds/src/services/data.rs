//! ReadDataByIdentifier (0x22) and WriteDataByIdentifier (0x2E)
//!
//! Reads are open-ended: any identifier present in the node's store can be
//! read. Writes are limited to the node's whitelist. Store failures of any
//! kind surface as RequestOutOfRange.

use tracing::{info, warn};

use super::{Outcome, ServiceContext, ServiceResult};
use crate::frame::Frame;
use crate::uds::{positive_response, service_id, NegativeResponseCode};

fn identifier(request: &Frame) -> u16 {
    u16::from_be_bytes([request.data[1], request.data[2]])
}

pub fn read_data_by_identifier(ctx: &ServiceContext, request: &Frame) -> ServiceResult {
    let did = identifier(request);
    let value = ctx.store.read(ctx.store_path(), did).map_err(|e| {
        warn!(
            node = %ctx.node,
            did = format!("0x{:04X}", did),
            error = %e,
            "Read by identifier failed"
        );
        NegativeResponseCode::RequestOutOfRange
    })?;

    let mut data = did.to_be_bytes().to_vec();
    data.extend_from_slice(&value);
    Ok(Outcome::Reply(positive_response(
        service_id::READ_DATA_BY_IDENTIFIER,
        &data,
    )))
}

pub fn write_data_by_identifier(ctx: &ServiceContext, request: &Frame) -> ServiceResult {
    let did = identifier(request);
    if !ctx.writable_dids.contains(&did) {
        warn!(
            node = %ctx.node,
            did = format!("0x{:04X}", did),
            "Identifier is not writable"
        );
        return Err(NegativeResponseCode::RequestOutOfRange);
    }

    let value = &request.data[3..];
    ctx.store
        .write(ctx.store_path(), did, value)
        .map_err(|e| {
            warn!(
                node = %ctx.node,
                did = format!("0x{:04X}", did),
                error = %e,
                "Write by identifier failed"
            );
            NegativeResponseCode::RequestOutOfRange
        })?;

    info!(
        node = %ctx.node,
        did = format!("0x{:04X}", did),
        value = %hex::encode_upper(value),
        "Identifier written"
    );
    Ok(Outcome::Reply(positive_response(
        service_id::WRITE_DATA_BY_IDENTIFIER,
        &did.to_be_bytes(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeId;
    use crate::services::test_support::{reply, request, unlocked};
    use crate::store::DataStore;

    #[test]
    fn test_read_known_identifier() {
        let node = unlocked(NodeId::Mcu);
        node.store.write("mcu", 0xF190, b"WVW123").unwrap();

        let mut expected = vec![0x62, 0xF1, 0x90];
        expected.extend_from_slice(b"WVW123");
        assert_eq!(
            read_data_by_identifier(&node.ctx, &request(&[0x22, 0xF1, 0x90])),
            reply(&expected)
        );
    }

    #[test]
    fn test_read_unknown_identifier() {
        let node = unlocked(NodeId::Mcu);
        assert_eq!(
            read_data_by_identifier(&node.ctx, &request(&[0x22, 0x12, 0x34])),
            Err(NegativeResponseCode::RequestOutOfRange)
        );
    }

    #[test]
    fn test_read_store_failure() {
        let node = unlocked(NodeId::Battery);
        node.store.write("battery", 0xF190, &[0x01]).unwrap();
        node.store.set_fail_reads(true);
        assert_eq!(
            read_data_by_identifier(&node.ctx, &request(&[0x22, 0xF1, 0x90])),
            Err(NegativeResponseCode::RequestOutOfRange)
        );
    }

    #[test]
    fn test_write_whitelisted_identifier() {
        let node = unlocked(NodeId::Mcu);
        assert_eq!(
            write_data_by_identifier(&node.ctx, &request(&[0x2E, 0xF1, 0xA0, 0x42, 0x43])),
            reply(&[0x6E, 0xF1, 0xA0])
        );
        assert_eq!(node.store.read("mcu", 0xF1A0).unwrap(), vec![0x42, 0x43]);
    }

    #[test]
    fn test_write_rejects_identifier_outside_whitelist() {
        let node = unlocked(NodeId::Mcu);
        assert_eq!(
            write_data_by_identifier(&node.ctx, &request(&[0x2E, 0xF1, 0x90, 0x00])),
            Err(NegativeResponseCode::RequestOutOfRange)
        );
    }

    #[test]
    fn test_write_store_failure() {
        let node = unlocked(NodeId::Mcu);
        node.store.set_fail_writes(true);
        assert_eq!(
            write_data_by_identifier(&node.ctx, &request(&[0x2E, 0xF1, 0xA0, 0x01])),
            Err(NegativeResponseCode::RequestOutOfRange)
        );
    }
}
