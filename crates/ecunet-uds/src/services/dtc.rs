//! ClearDiagnosticInformation (0x14) and ReadDTCInformation (0x19)

use tracing::{info, warn};

use super::{Outcome, ServiceContext, ServiceResult};
use crate::dtc::{self, ClearGroup, DtcError};
use crate::frame::Frame;
use crate::uds::{dtc_report, positive_response, service_id, NegativeResponseCode};

pub fn clear_diagnostic_information(ctx: &ServiceContext, request: &Frame) -> ServiceResult {
    if request.data.len() != 4 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrFormat);
    }
    let raw = [request.data[1], request.data[2], request.data[3]];
    let group = ClearGroup::parse(raw).ok_or(NegativeResponseCode::RequestOutOfRange)?;

    match dtc::clear(ctx.store.as_ref(), ctx.node, group) {
        Ok(cleared) => {
            info!(node = %ctx.node, ?group, cleared, "DTCs cleared");
            Ok(Outcome::Reply(positive_response(
                service_id::CLEAR_DIAGNOSTIC_INFORMATION,
                &[],
            )))
        }
        Err(DtcError::NotFound(_)) => Err(NegativeResponseCode::RequestOutOfRange),
        Err(DtcError::Store(e)) => {
            warn!(node = %ctx.node, error = %e, "Clearing DTCs failed");
            Err(NegativeResponseCode::ConditionsNotCorrect)
        }
    }
}

pub fn read_dtc_information(ctx: &ServiceContext, request: &Frame) -> ServiceResult {
    let sub = request.data[1];
    let mask = request.data[2];

    let stored = dtc::load(ctx.store.as_ref(), ctx.node).map_err(|e| {
        warn!(node = %ctx.node, error = %e, "Reading DTCs failed");
        NegativeResponseCode::RequestOutOfRange
    })?;
    let matched = dtc::matching(&stored, mask);
    let availability = dtc::availability(&matched, ctx.config.dtc.status_availability_mask);

    let mut data = vec![sub, availability];
    match sub {
        dtc_report::NUMBER_BY_STATUS_MASK => {
            let count = matched.len().min(u16::MAX as usize) as u16;
            data.push(dtc_report::FORMAT_ISO14229);
            data.extend_from_slice(&count.to_be_bytes());
        }
        dtc_report::BY_STATUS_MASK => {
            for dtc in &matched {
                data.extend_from_slice(&dtc.to_record());
            }
        }
        _ => return Err(NegativeResponseCode::SubFunctionNotSupported),
    }

    Ok(Outcome::Reply(positive_response(
        service_id::READ_DTC_INFORMATION,
        &data,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeId;
    use crate::services::test_support::{node, reply, request, TestNode};
    use crate::store::DataStore;
    use pretty_assertions::assert_eq;

    fn engine_with_dtcs() -> TestNode {
        let node = node(NodeId::Engine);
        for (code, status) in [(0x0190u16, 0x24u8), (0x0196, 0x2F), (0x9A01, 0x08)] {
            node.store.write("engine.dtc", code, &[status]).unwrap();
        }
        node
    }

    #[test]
    fn test_count_by_status_mask() {
        let node = engine_with_dtcs();
        assert_eq!(
            read_dtc_information(&node.ctx, &request(&[0x19, 0x01, 0x08])),
            reply(&[0x59, 0x01, 0x2F, 0x01, 0x00, 0x02])
        );
    }

    #[test]
    fn test_report_by_status_mask() {
        let node = engine_with_dtcs();
        assert_eq!(
            read_dtc_information(&node.ctx, &request(&[0x19, 0x02, 0x02])),
            reply(&[0x59, 0x02, 0x2F, 0x01, 0x96, 0x2F])
        );
    }

    #[test]
    fn test_report_without_matches() {
        let node = node(NodeId::Hvac);
        assert_eq!(
            read_dtc_information(&node.ctx, &request(&[0x19, 0x02, 0xFF])),
            reply(&[0x59, 0x02, 0x00])
        );
    }

    #[test]
    fn test_clear_all_and_single() {
        let node = engine_with_dtcs();
        assert_eq!(
            clear_diagnostic_information(&node.ctx, &request(&[0x14, 0x01, 0x01, 0x90])),
            reply(&[0x54])
        );
        assert_eq!(
            clear_diagnostic_information(&node.ctx, &request(&[0x14, 0x01, 0x01, 0x90])),
            Err(NegativeResponseCode::RequestOutOfRange)
        );
        assert_eq!(
            clear_diagnostic_information(&node.ctx, &request(&[0x14, 0xFF, 0xFF, 0xFF])),
            reply(&[0x54])
        );
        assert!(node.store.read_all("engine.dtc").unwrap().is_empty());
    }

    #[test]
    fn test_clear_rejects_bad_group_and_length() {
        let node = engine_with_dtcs();
        assert_eq!(
            clear_diagnostic_information(&node.ctx, &request(&[0x14, 0x09, 0x00, 0x00])),
            Err(NegativeResponseCode::RequestOutOfRange)
        );
        assert_eq!(
            clear_diagnostic_information(&node.ctx, &request(&[0x14, 0xFF, 0xFF, 0xFF, 0xFF])),
            Err(NegativeResponseCode::IncorrectMessageLengthOrFormat)
        );
    }

    #[test]
    fn test_clear_store_failure() {
        let node = engine_with_dtcs();
        node.store.set_fail_writes(true);
        assert_eq!(
            clear_diagnostic_information(&node.ctx, &request(&[0x14, 0xFF, 0xFF, 0xFF])),
            Err(NegativeResponseCode::ConditionsNotCorrect)
        );
    }
}
