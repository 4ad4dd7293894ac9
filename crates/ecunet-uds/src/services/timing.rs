//! AccessTimingParameter (0x83)

use super::{Outcome, ServiceContext, ServiceResult};
use crate::frame::Frame;
use crate::timing::Budgets;
use crate::uds::{positive_response, service_id, timing_parameter, NegativeResponseCode};

fn encode(sub: u8, budgets: Budgets) -> Vec<u8> {
    let mut data = vec![sub];
    data.extend_from_slice(&budgets.p2_max.to_be_bytes());
    data.extend_from_slice(&budgets.p2_star_max.to_be_bytes());
    positive_response(service_id::ACCESS_TIMING_PARAMETER, &data)
}

pub fn access_timing_parameter(ctx: &ServiceContext, request: &Frame) -> ServiceResult {
    let sub = request.data[1];
    let reply = match sub {
        timing_parameter::READ_EXTENDED => encode(sub, ctx.timing.default_budgets()),
        timing_parameter::READ_ACTIVE => encode(sub, ctx.timing.budgets()),
        timing_parameter::SET_TO_DEFAULT => {
            ctx.timing.reset_budgets();
            positive_response(service_id::ACCESS_TIMING_PARAMETER, &[sub])
        }
        timing_parameter::SET_GIVEN => {
            let [_, _, p2_hi, p2_lo, star_hi, star_lo] = request.data[..] else {
                return Err(NegativeResponseCode::IncorrectMessageLengthOrFormat);
            };
            ctx.timing.set_budgets(Budgets {
                p2_max: u16::from_be_bytes([p2_hi, p2_lo]),
                p2_star_max: u16::from_be_bytes([star_hi, star_lo]),
            });
            positive_response(service_id::ACCESS_TIMING_PARAMETER, &[sub])
        }
        _ => return Err(NegativeResponseCode::SubFunctionNotSupported),
    };
    Ok(Outcome::Reply(reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeId;
    use crate::services::test_support::{node, reply, request};
    use crate::uds::TimingClass;
    use std::time::Duration;

    #[test]
    fn test_read_defaults() {
        let node = node(NodeId::Mcu);
        assert_eq!(
            access_timing_parameter(&node.ctx, &request(&[0x83, 0x01])),
            reply(&[0xC3, 0x01, 0x00, 0x28, 0x01, 0x90])
        );
    }

    #[test]
    fn test_set_then_reset() {
        let node = node(NodeId::Engine);
        assert_eq!(
            access_timing_parameter(&node.ctx, &request(&[0x83, 0x04, 0x00, 0x14, 0x00, 0x28])),
            reply(&[0xC3, 0x04])
        );
        assert_eq!(
            access_timing_parameter(&node.ctx, &request(&[0x83, 0x03])),
            reply(&[0xC3, 0x03, 0x00, 0x14, 0x00, 0x28])
        );
        assert_eq!(
            node.ctx.timing.budget_for(TimingClass::P2),
            Some(Duration::from_secs(1))
        );

        assert_eq!(
            access_timing_parameter(&node.ctx, &request(&[0x83, 0x02])),
            reply(&[0xC3, 0x02])
        );
        assert_eq!(
            access_timing_parameter(&node.ctx, &request(&[0x83, 0x03])),
            reply(&[0xC3, 0x03, 0x00, 0x28, 0x01, 0x90])
        );
    }

    #[test]
    fn test_set_requires_four_value_bytes() {
        let node = node(NodeId::Engine);
        assert_eq!(
            access_timing_parameter(&node.ctx, &request(&[0x83, 0x04, 0x00, 0x14])),
            Err(NegativeResponseCode::IncorrectMessageLengthOrFormat)
        );
    }
}
