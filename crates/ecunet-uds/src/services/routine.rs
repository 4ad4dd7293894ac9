//! RoutineControl (0x31)

use tracing::{info, warn};

use super::{Outcome, ServiceContext, ServiceResult};
use crate::frame::Frame;
use crate::session::DiagnosticSession;
use crate::uds::{positive_response, routine, service_id, NegativeResponseCode};

/// Routines that change what the node runs
const EXTENDED_ONLY: [u16; 3] = [
    routine::INIT_OTA,
    routine::ROLLBACK,
    routine::ACTIVATE_SOFTWARE,
];

/// Start an update routine; the reply carries the resulting OTA state
pub fn routine_control(ctx: &ServiceContext, request: &Frame) -> ServiceResult {
    let rid = u16::from_be_bytes([request.data[2], request.data[3]]);

    let session = ctx.session.current();
    if EXTENDED_ONLY.contains(&rid) && session != DiagnosticSession::Extended {
        warn!(
            node = %ctx.node,
            routine = format!("0x{:04X}", rid),
            session = ?session,
            "Routine requires the extended session"
        );
        return Err(NegativeResponseCode::SubFunctionNotSupportedInActiveSession);
    }

    let state = ctx.ota.run_routine(rid, &request.data[4..])?;

    info!(
        node = %ctx.node,
        routine = format!("0x{:04X}", rid),
        state = %state,
        "Routine completed"
    );
    let [hi, lo] = rid.to_be_bytes();
    Ok(Outcome::Reply(positive_response(
        service_id::ROUTINE_CONTROL,
        &[routine::START, hi, lo, state.as_u8()],
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeId;
    use crate::ota::OtaState;
    use crate::services::test_support::{node, reply, request};
    use rstest::rstest;

    fn extended(id: NodeId) -> crate::services::test_support::TestNode {
        let node = node(id);
        node.ctx.session.set_session(0x03).unwrap();
        node
    }

    #[tokio::test]
    async fn test_init_ota_routine() {
        let node = extended(NodeId::Engine);
        assert_eq!(
            routine_control(&node.ctx, &request(&[0x31, 0x01, 0x02, 0x01, 0x21])),
            reply(&[0x71, 0x01, 0x02, 0x01, 0x10])
        );
        assert_eq!(node.ctx.ota.state(), Some(OtaState::Init));
    }

    #[tokio::test]
    async fn test_activation_outside_ready() {
        let node = extended(NodeId::Engine);
        assert_eq!(
            routine_control(&node.ctx, &request(&[0x31, 0x01, 0x06, 0x01])),
            Err(NegativeResponseCode::ConditionsNotCorrect)
        );
    }

    #[tokio::test]
    async fn test_unknown_routine() {
        let node = node(NodeId::Engine);
        assert_eq!(
            routine_control(&node.ctx, &request(&[0x31, 0x01, 0x7F, 0x01])),
            Err(NegativeResponseCode::RequestOutOfRange)
        );
    }

    #[rstest]
    #[case::init(&[0x31, 0x01, 0x02, 0x01, 0x21])]
    #[case::rollback(&[0x31, 0x01, 0x05, 0x01])]
    #[case::activate(&[0x31, 0x01, 0x06, 0x01])]
    #[tokio::test]
    async fn test_lifecycle_routines_need_extended_session(#[case] data: &[u8]) {
        let node = node(NodeId::Doors);
        assert_eq!(
            routine_control(&node.ctx, &request(data)),
            Err(NegativeResponseCode::SubFunctionNotSupportedInActiveSession)
        );
        node.ctx.session.set_session(0x02).unwrap();
        assert_eq!(
            routine_control(&node.ctx, &request(data)),
            Err(NegativeResponseCode::SubFunctionNotSupportedInActiveSession)
        );
    }

    #[tokio::test]
    async fn test_erase_and_verify_run_in_default_session() {
        let node = node(NodeId::Engine);
        assert_eq!(
            routine_control(&node.ctx, &request(&[0x31, 0x01, 0x01, 0x01])),
            reply(&[0x71, 0x01, 0x01, 0x01, OtaState::Idle.as_u8()])
        );
        // Reaches the state machine, which wants a finished transfer
        assert_eq!(
            routine_control(&node.ctx, &request(&[0x31, 0x01, 0x04, 0x01])),
            Err(NegativeResponseCode::ConditionsNotCorrect)
        );
    }
}
