//! DiagnosticSessionControl (0x10) and TesterPresent (0x3E)

use tracing::{debug, info};

use super::{Outcome, ServiceContext, ServiceResult};
use crate::frame::Frame;
use crate::session::DiagnosticSession;
use crate::uds::{positive_response, service_id, tester_present, NegativeResponseCode};

pub fn diagnostic_session_control(ctx: &ServiceContext, request: &Frame) -> ServiceResult {
    let sub = request.data[1];
    let session = ctx
        .session
        .set_session(sub)
        .map_err(|_| NegativeResponseCode::SubFunctionNotSupported)?;

    info!(node = %ctx.node, session = %session, "Diagnostic session control");
    Ok(Outcome::Reply(positive_response(
        service_id::DIAGNOSTIC_SESSION_CONTROL,
        &[session.as_sub_function()],
    )))
}

/// Keep the session alive; from Default this enters Programming
pub fn tester_present(ctx: &ServiceContext, request: &Frame) -> ServiceResult {
    let sub = request.data[1];
    let current = ctx.session.current();
    ctx.session
        .keep_alive(current != DiagnosticSession::Extended);
    debug!(node = %ctx.node, session = %ctx.session.current(), "Tester present");

    if sub & tester_present::SUPPRESS_POSITIVE_RESPONSE != 0 {
        return Ok(Outcome::NoResponse);
    }
    Ok(Outcome::Reply(positive_response(
        service_id::TESTER_PRESENT,
        &[tester_present::ZERO_SUB_FUNCTION],
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeId;
    use crate::services::test_support::{node, reply, request};

    #[tokio::test]
    async fn test_session_control_switches_session() {
        let node = node(NodeId::Mcu);
        assert_eq!(
            diagnostic_session_control(&node.ctx, &request(&[0x10, 0x03])),
            reply(&[0x50, 0x03])
        );
        assert_eq!(node.ctx.session.current(), DiagnosticSession::Extended);

        assert_eq!(
            diagnostic_session_control(&node.ctx, &request(&[0x10, 0x01])),
            reply(&[0x50, 0x01])
        );
        assert_eq!(node.ctx.session.current(), DiagnosticSession::Default);
    }

    #[tokio::test]
    async fn test_tester_present_from_default_enters_programming() {
        let node = node(NodeId::Engine);
        assert_eq!(
            tester_present(&node.ctx, &request(&[0x3E, 0x00])),
            reply(&[0x7E, 0x00])
        );
        assert_eq!(node.ctx.session.current(), DiagnosticSession::Programming);
    }

    #[tokio::test]
    async fn test_tester_present_keeps_extended() {
        let node = node(NodeId::Mcu);
        node.ctx.session.set_session(0x03).unwrap();
        tester_present(&node.ctx, &request(&[0x3E, 0x00])).unwrap();
        assert_eq!(node.ctx.session.current(), DiagnosticSession::Extended);
    }

    #[tokio::test]
    async fn test_tester_present_suppressed_reply() {
        let node = node(NodeId::Mcu);
        assert_eq!(
            tester_present(&node.ctx, &request(&[0x3E, 0x80])),
            Ok(Outcome::NoResponse)
        );
        assert_eq!(node.ctx.session.current(), DiagnosticSession::Programming);
    }
}
