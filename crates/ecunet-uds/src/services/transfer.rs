//! Download services: RequestUpdateStatus (0x32), RequestDownload (0x34),
//! TransferData (0x36) and RequestTransferExit (0x37)

use tracing::{debug, warn};

use super::memory::parse_address_and_size;
use super::{Outcome, ServiceContext, ServiceResult};
use crate::frame::Frame;
use crate::uds::{positive_response, service_id, NegativeResponseCode};

/// Length format identifier of the RequestDownload reply: 2-byte max block length
const MAX_BLOCK_LENGTH_FORMAT: u8 = 0x20;

pub fn request_update_status(ctx: &ServiceContext, _request: &Frame) -> ServiceResult {
    let state = ctx
        .ota
        .state()
        .ok_or(NegativeResponseCode::RequestOutOfRange)?;
    Ok(Outcome::Reply(positive_response(
        service_id::REQUEST_UPDATE_STATUS,
        &[state.as_u8()],
    )))
}

/// `[0x34, dfi, alfid, address.., size.., (version)]`
pub fn request_download(ctx: &ServiceContext, request: &Frame) -> ServiceResult {
    let alfid = request.data[2];
    let fields = &request.data[3..];
    let (address, size, consumed) = parse_address_and_size(alfid, fields)
        .ok_or(NegativeResponseCode::IncorrectMessageLengthOrFormat)?;

    let version = match &fields[consumed..] {
        [] => None,
        [version] => Some(*version),
        _ => return Err(NegativeResponseCode::IncorrectMessageLengthOrFormat),
    };

    debug!(
        node = %ctx.node,
        format = format!("0x{:02X}", request.data[1]),
        address = format!("0x{:X}", address),
        size,
        ?version,
        "Request download"
    );
    let max_block = ctx.ota.request_download(address, size, version)?;

    let [hi, lo] = max_block.to_be_bytes();
    Ok(Outcome::Reply(positive_response(
        service_id::REQUEST_DOWNLOAD,
        &[MAX_BLOCK_LENGTH_FORMAT, hi, lo],
    )))
}

/// `[0x36, block, data..]`
pub fn transfer_data(ctx: &ServiceContext, request: &Frame) -> ServiceResult {
    let block = request.data[1];
    let state = ctx.ota.transfer_data(block, &request.data[2..])?;
    Ok(Outcome::Reply(positive_response(
        service_id::TRANSFER_DATA,
        &[block, state.as_u8()],
    )))
}

pub fn request_transfer_exit(ctx: &ServiceContext, _request: &Frame) -> ServiceResult {
    ctx.ota.transfer_exit().map_err(|nrc| {
        warn!(node = %ctx.node, nrc = %nrc, "Transfer exit refused");
        nrc
    })?;
    Ok(Outcome::Reply(positive_response(
        service_id::REQUEST_TRANSFER_EXIT,
        &[0x01],
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeId;
    use crate::ota::{FirmwareImage, OtaState};
    use crate::services::test_support::{reply, request, unlocked, TestNode};
    use crate::store::DataStore;
    use crate::uds::did;
    use pretty_assertions::assert_eq;

    fn initialised(id: NodeId) -> TestNode {
        let node = unlocked(id);
        node.ctx.ota.run_routine(0x0201, &[0x21]).unwrap();
        node
    }

    #[test]
    fn test_update_status_reports_state() {
        let node = initialised(NodeId::Hvac);
        assert_eq!(
            request_update_status(&node.ctx, &request(&[0x32])),
            reply(&[0x72, 0x10])
        );
    }

    #[test]
    fn test_update_status_with_invalid_state() {
        let node = unlocked(NodeId::Hvac);
        node.store
            .write("hvac", did::OTA_UPDATE_STATUS, &[0x42])
            .unwrap();
        assert_eq!(
            request_update_status(&node.ctx, &request(&[0x32])),
            Err(NegativeResponseCode::RequestOutOfRange)
        );
    }

    #[test]
    fn test_full_download() {
        let node = initialised(NodeId::Doors);
        let image = FirmwareImage::build(0x13, 0x21, b"doors firmware v2.1").to_bytes();
        let size = image.len() as u8;

        assert_eq!(
            request_download(
                &node.ctx,
                &request(&[0x34, 0x00, 0x12, 0x00, 0x00, size, 0x21])
            ),
            reply(&[0x74, 0x20, 0x0F, 0xFF])
        );
        assert_eq!(node.ctx.ota.state(), Some(OtaState::Wait));

        let (first, second) = image.split_at(20);
        let mut block = vec![0x36, 0x01];
        block.extend_from_slice(first);
        assert_eq!(
            transfer_data(&node.ctx, &request(&block)),
            reply(&[0x76, 0x01, 0x30])
        );

        // Repeating a block does not move the counter
        assert_eq!(
            transfer_data(&node.ctx, &request(&block)),
            Err(NegativeResponseCode::WrongBlockSequenceCounter)
        );

        let mut block = vec![0x36, 0x02];
        block.extend_from_slice(second);
        assert_eq!(
            transfer_data(&node.ctx, &request(&block)),
            reply(&[0x76, 0x02, 0x31])
        );

        assert_eq!(
            request_transfer_exit(&node.ctx, &request(&[0x37, 0x00])),
            reply(&[0x77, 0x01])
        );
        assert_eq!(node.ctx.ota.state(), Some(OtaState::Ready));
    }

    #[test]
    fn test_download_outside_init() {
        let node = unlocked(NodeId::Doors);
        assert_eq!(
            request_download(&node.ctx, &request(&[0x34, 0x00, 0x11, 0x00, 0x10])),
            Err(NegativeResponseCode::ConditionsNotCorrect)
        );
    }

    #[test]
    fn test_download_malformed_fields() {
        let node = initialised(NodeId::Doors);
        assert_eq!(
            request_download(&node.ctx, &request(&[0x34, 0x00, 0x22, 0x00])),
            Err(NegativeResponseCode::IncorrectMessageLengthOrFormat)
        );
        assert_eq!(
            request_download(
                &node.ctx,
                &request(&[0x34, 0x00, 0x11, 0x00, 0x10, 0x21, 0x00])
            ),
            Err(NegativeResponseCode::IncorrectMessageLengthOrFormat)
        );
    }

    #[test]
    fn test_download_rejected_by_backing_store() {
        let node = initialised(NodeId::Doors);
        assert_eq!(
            request_download(
                &node.ctx,
                &request(&[0x34, 0x00, 0x14, 0x00, 0x01, 0x00, 0x00, 0x10])
            ),
            Err(NegativeResponseCode::UploadDownloadNotAccepted)
        );
        assert_eq!(node.ctx.ota.state(), Some(OtaState::WaitDownloadFailed));
    }

    #[test]
    fn test_transfer_without_download() {
        let node = initialised(NodeId::Doors);
        assert_eq!(
            transfer_data(&node.ctx, &request(&[0x36, 0x01, 0xAA])),
            Err(NegativeResponseCode::RequestSequenceError)
        );
        assert_eq!(
            request_transfer_exit(&node.ctx, &request(&[0x37, 0x00])),
            Err(NegativeResponseCode::RequestSequenceError)
        );
    }
}
