//! SecurityAccess (0x27), coordinator only

use tracing::info;

use super::{Outcome, ServiceContext, ServiceResult};
use crate::frame::Frame;
use crate::security::{KeyOutcome, SeedOutcome};
use crate::uds::{positive_response, security_level, service_id, NegativeResponseCode};

pub fn security_access(ctx: &ServiceContext, request: &Frame) -> ServiceResult {
    match request.data[1] {
        security_level::REQUEST_SEED => match ctx.security.request_seed(request.sender)? {
            SeedOutcome::Issued(seed) => {
                let mut data = vec![security_level::REQUEST_SEED];
                data.extend_from_slice(&seed);
                Ok(Outcome::Reply(positive_response(
                    service_id::SECURITY_ACCESS,
                    &data,
                )))
            }
            SeedOutcome::AlreadyUnlocked | SeedOutcome::Refused => Ok(Outcome::NoResponse),
        },
        security_level::SEND_KEY => match ctx.security.send_key(&request.data[2..])? {
            KeyOutcome::Granted => {
                info!(node = %ctx.node, "Security access granted");
                Ok(Outcome::Reply(positive_response(
                    service_id::SECURITY_ACCESS,
                    &[security_level::SEND_KEY],
                )))
            }
            KeyOutcome::AlreadyUnlocked => Ok(Outcome::NoResponse),
        },
        _ => Err(NegativeResponseCode::SubFunctionNotSupported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeId;
    use crate::security::compute_key;
    use crate::services::test_support::{node, request};

    #[tokio::test]
    async fn test_seed_then_key_unlocks() {
        let node = node(NodeId::Mcu);
        let Ok(Outcome::Reply(seed_reply)) = security_access(&node.ctx, &request(&[0x27, 0x01]))
        else {
            panic!("expected seed");
        };
        assert_eq!(&seed_reply[..2], &[0x67, 0x01]);
        assert_eq!(seed_reply.len(), 2 + 4);

        let mut key_request = vec![0x27, 0x02];
        key_request.extend(compute_key(&seed_reply[2..]));
        assert_eq!(
            security_access(&node.ctx, &request(&key_request)),
            Ok(Outcome::Reply(vec![0x67, 0x02]))
        );
        assert!(node.ctx.is_unlocked());

        // A second seed or key is an informational no-op
        assert_eq!(
            security_access(&node.ctx, &request(&[0x27, 0x01])),
            Ok(Outcome::NoResponse)
        );
        assert_eq!(
            security_access(&node.ctx, &request(&key_request)),
            Ok(Outcome::NoResponse)
        );
        assert!(node.ctx.is_unlocked());
    }

    #[tokio::test]
    async fn test_key_without_seed() {
        let node = node(NodeId::Mcu);
        assert_eq!(
            security_access(&node.ctx, &request(&[0x27, 0x02, 0x01, 0x02])),
            Err(NegativeResponseCode::RequestSequenceError)
        );
    }

    #[tokio::test]
    async fn test_seed_from_peripheral_is_ignored() {
        let node = node(NodeId::Mcu);
        let from_engine = Frame::new(0x12, 0x10, vec![0x27, 0x01]);
        assert_eq!(
            security_access(&node.ctx, &from_engine),
            Ok(Outcome::NoResponse)
        );
    }
}
