//! Service dispatcher
//!
//! Looks up the request's SID in the node's service table, evaluates the
//! descriptor's preconditions in a fixed order and runs the handler:
//!
//! 1. service exists (0x11)
//! 2. minimum length (0x13)
//! 3. sub-function accepted (0x12)
//! 4. security unlocked (0x33)
//! 5. session (0x7E / 0x7F)
//!
//! A failing check produces a negative response without invoking the handler.

use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use crate::address::NodeId;
use crate::frame::{Frame, MAX_MESSAGE_LEN};
use crate::services::{
    catalogue, Outcome, ServiceContext, ServiceDescriptor, ServiceResult, SessionRequirement,
};
use crate::session::DiagnosticSession;
use crate::transport::Outbox;
use crate::uds::{NegativeResponseCode, TimingClass};

pub struct Dispatcher {
    node: NodeId,
    services: HashMap<u8, ServiceDescriptor>,
}

impl Dispatcher {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            services: catalogue(node).into_iter().map(|d| (d.sid, d)).collect(),
        }
    }

    pub fn descriptor(&self, sid: u8) -> Option<&ServiceDescriptor> {
        self.services.get(&sid)
    }

    pub fn supports(&self, sid: u8) -> bool {
        self.services.contains_key(&sid)
    }

    /// Run preconditions and handler without touching timers or the wire
    pub fn evaluate(&self, ctx: &ServiceContext, request: &Frame) -> ServiceResult {
        let sid = request
            .sid()
            .ok_or(NegativeResponseCode::IncorrectMessageLengthOrFormat)?;
        let descriptor = self
            .descriptor(sid)
            .ok_or(NegativeResponseCode::ServiceNotSupported)?;

        check_preconditions(descriptor, ctx, request)?;
        (descriptor.handler)(ctx, request)
    }

    /// Serve one request: supervise timing, evaluate, answer, then run any reset
    ///
    /// Returns the frame that went on the wire; `None` when nothing was sent
    /// or the send failed.
    pub async fn dispatch(
        &self,
        ctx: &ServiceContext,
        request: &Frame,
        outbox: &Outbox,
    ) -> Option<Frame> {
        let sid = request.sid()?;
        let class = self
            .descriptor(sid)
            .map(|d| d.timing)
            .unwrap_or(TimingClass::Untimed);

        debug!(
            node = %self.node,
            sid = format!("0x{:02X}", sid),
            from = format!("0x{:02X}", request.sender),
            "Dispatching request"
        );

        ctx.timing.start(request, class, outbox);
        let result = self.evaluate(ctx, request);
        if let Some(elapsed) = ctx.timing.stop(sid) {
            debug!(
                node = %self.node,
                sid = format!("0x{:02X}", sid),
                elapsed_ms = elapsed.as_millis() as u64,
                "Request processed"
            );
        }

        let (result, reset) = match result {
            Ok(Outcome::Reply(data)) => (fit_message(sid, data), None),
            Ok(Outcome::ReplyThenReset(data, kind)) => (fit_message(sid, data), Some(kind)),
            Ok(Outcome::NoResponse) => return None,
            Err(nrc) => (Err(nrc), None),
        };
        let response = match result {
            Ok(data) => request.reply(data),
            Err(nrc) => {
                info!(
                    node = %self.node,
                    sid = format!("0x{:02X}", sid),
                    nrc = %nrc,
                    "Negative response"
                );
                request.negative_reply(sid, nrc)
            }
        };

        let sent = match outbox.send(&response).await {
            Ok(()) => Some(response),
            Err(e) => {
                error!(node = %self.node, frame = %response, error = %e, "Failed to send response");
                None
            }
        };
        if let Some(kind) = reset {
            ctx.reset.perform_reset(ctx, kind);
        }
        sent
    }
}

/// Positive response data, or 0x14 when it cannot be carried in one message
fn fit_message(sid: u8, data: Vec<u8>) -> Result<Vec<u8>, NegativeResponseCode> {
    if data.len() > MAX_MESSAGE_LEN {
        warn!(
            sid = format!("0x{:02X}", sid),
            len = data.len(),
            max = MAX_MESSAGE_LEN,
            "Response exceeds the transport limit"
        );
        return Err(NegativeResponseCode::ResponseTooLong);
    }
    Ok(data)
}

fn check_preconditions(
    descriptor: &ServiceDescriptor,
    ctx: &ServiceContext,
    request: &Frame,
) -> Result<(), NegativeResponseCode> {
    if request.data.len() < descriptor.min_len {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrFormat);
    }

    if let Some(accepted) = descriptor.sub_functions {
        let sub = request
            .sub_function()
            .ok_or(NegativeResponseCode::IncorrectMessageLengthOrFormat)?;
        let sub = if descriptor.suppressible { sub & 0x7F } else { sub };
        if !accepted.contains(&sub) {
            return Err(NegativeResponseCode::SubFunctionNotSupported);
        }
    }

    if descriptor.requires_security && !ctx.is_unlocked() {
        warn!(
            node = %ctx.node,
            service = descriptor.name,
            "Security access denied"
        );
        return Err(NegativeResponseCode::SecurityAccessDenied);
    }

    let session = ctx.session.current();
    match descriptor.session {
        SessionRequirement::Any => {}
        SessionRequirement::Extended if session != DiagnosticSession::Extended => {
            return Err(NegativeResponseCode::SubFunctionNotSupportedInActiveSession);
        }
        SessionRequirement::NonDefault if session.is_default() => {
            return Err(NegativeResponseCode::ServiceNotSupportedInActiveSession);
        }
        _ => {}
    }

    Ok(())
}
