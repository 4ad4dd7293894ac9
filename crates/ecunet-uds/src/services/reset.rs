//! ECUReset (0x11) and the reset strategy it triggers

use tracing::{info, warn};

use super::{Outcome, ServiceContext, ServiceResult};
use crate::frame::Frame;
use crate::uds::{positive_response, reset_type, service_id, NegativeResponseCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Hard,
    KeyOffOn,
}

impl ResetKind {
    pub fn from_sub_function(sub: u8) -> Option<Self> {
        match sub {
            reset_type::HARD_RESET => Some(ResetKind::Hard),
            reset_type::KEY_OFF_ON_RESET => Some(ResetKind::KeyOffOn),
            _ => None,
        }
    }
}

/// What a node does once an ECUReset has been answered
pub trait ResetStrategy: Send + Sync {
    fn perform_reset(&self, ctx: &ServiceContext, kind: ResetKind);
}

/// Records the reset and leaves the node running
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReset;

impl ResetStrategy for LoggingReset {
    fn perform_reset(&self, ctx: &ServiceContext, kind: ResetKind) {
        warn!(node = %ctx.node, ?kind, "Reset requested, nothing to do");
    }
}

pub fn ecu_reset(ctx: &ServiceContext, request: &Frame) -> ServiceResult {
    let sub = request.data[1];
    let kind =
        ResetKind::from_sub_function(sub).ok_or(NegativeResponseCode::SubFunctionNotSupported)?;

    info!(node = %ctx.node, ?kind, "ECU reset");
    Ok(Outcome::ReplyThenReset(
        positive_response(service_id::ECU_RESET, &[sub]),
        kind,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeId;
    use crate::services::test_support::{request, unlocked};

    #[tokio::test]
    async fn test_reset_replies_then_resets() {
        let node = unlocked(NodeId::Doors);
        assert_eq!(
            ecu_reset(&node.ctx, &request(&[0x11, 0x02])),
            Ok(Outcome::ReplyThenReset(vec![0x51, 0x02], ResetKind::KeyOffOn))
        );
        assert_eq!(
            ecu_reset(&node.ctx, &request(&[0x11, 0x03])),
            Err(NegativeResponseCode::SubFunctionNotSupported)
        );
    }
}
