//! Coordinator (MCU) workers
//!
//! The coordinator sits between the API channel and the shared bus. Requests
//! for itself are dispatched locally; requests for peripherals are forwarded
//! unchanged and their replies relayed back to the API. It also owns the
//! security authority and tracks which peripherals are alive.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{control_frame, ensure_connected, is_for_coordinator, Node, Runtime};
use crate::address::{address, is_known_node, NodeId};
use crate::error::{NodeError, Result};
use crate::frame::Frame;
use crate::liveness::LivenessTable;
use crate::queue::{FrameQueue, Origin, Queued, ReceiverFilter};
use crate::services::ServiceContext;
use crate::transport::{BusChannel, Outbox};
use crate::uds::{control, NegativeResponseCode};

impl Node {
    /// Start the coordinator on `bus`, serving the API actor on `api`
    pub async fn start_coordinator(
        ctx: ServiceContext,
        bus: Arc<dyn BusChannel>,
        api: Arc<dyn BusChannel>,
    ) -> Result<Node> {
        if !ctx.node.is_coordinator() {
            return Err(NodeError::WrongRole(ctx.node));
        }
        ensure_connected(&bus, "bus").await?;
        ensure_connected(&api, "api").await?;
        ctx.ota.ensure_initialized()?;

        let ctx = Arc::new(ctx);
        let queue = Arc::new(FrameQueue::new(ReceiverFilter::Coordinator));
        let outbox = Outbox::new(bus.clone(), Some(api.clone()));
        let (runtime, stop) = Runtime::new(ctx.clone(), queue, outbox);
        let liveness = Arc::new(LivenessTable::new());

        let workers = vec![
            runtime.spawn_reader(bus, Origin::Bus),
            runtime.spawn_reader(api, Origin::Api),
            spawn_egress(runtime.clone(), liveness.clone()),
            spawn_liveness_sweep(runtime.clone(), liveness.clone()),
        ];

        info!(node = %ctx.node, "Coordinator started");
        Ok(runtime.into_node(stop, Some(liveness), workers))
    }
}

fn spawn_egress(runtime: Runtime, liveness: Arc<LivenessTable>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(Queued { frame, origin }) = runtime.queue.dequeue().await {
            if !runtime.is_running() {
                break;
            }
            match origin {
                Origin::Api => route_from_api(&runtime, &liveness, frame).await,
                Origin::Bus => route_from_bus(&runtime, &liveness, frame).await,
            }
        }
        debug!(node = %runtime.node(), "Egress worker stopped");
    })
}

async fn route_from_api(runtime: &Runtime, liveness: &LivenessTable, frame: Frame) {
    if is_for_coordinator(frame.receiver) {
        serve(runtime, liveness, frame).await;
    } else if is_known_node(frame.receiver) {
        debug!(frame = %frame, "Forwarding request to peripheral");
        if let Err(e) = runtime.outbox.bus().send_frame(&frame).await {
            warn!(frame = %frame, error = %e, "Forwarding to bus failed");
        }
    } else if let Some(sid) = frame.sid() {
        // Nobody else will answer for an address that does not exist
        warn!(
            receiver = format!("0x{:02X}", frame.receiver),
            sid = format!("0x{:02X}", sid),
            "Request for unknown node"
        );
        let reply = frame.negative_reply(
            sid,
            NegativeResponseCode::SubFunctionNotSupportedInActiveSession,
        );
        runtime.outbox.send_logged(&reply).await;
    }
}

async fn route_from_bus(runtime: &Runtime, liveness: &LivenessTable, frame: Frame) {
    if frame.receiver == address::API {
        debug!(frame = %frame, "Relaying peripheral reply to API");
        runtime.outbox.send_logged(&frame).await;
    } else {
        serve(runtime, liveness, frame).await;
    }
}

/// Handle a frame addressed to the coordinator itself
async fn serve(runtime: &Runtime, liveness: &LivenessTable, frame: Frame) {
    let Some(sid) = frame.sid() else {
        return;
    };
    let own = runtime.node().address();

    match sid {
        control::UP_NOTIFICATION => {
            liveness.mark_up(frame.sender);
        }
        control::LIVENESS_PROBE => {
            if frame.sender == address::API {
                let mut status = vec![control::UP_NOTIFICATION, own];
                status.extend(liveness.status_bytes());
                runtime.outbox.send_logged(&frame.reply(status)).await;
            }
        }
        control::SECURITY_UNLOCKED | control::SECURITY_LOCKED => {
            debug!(sender = format!("0x{:02X}", frame.sender), "Ignoring lock notification");
        }
        _ => {
            runtime
                .dispatcher
                .dispatch(&runtime.ctx, &frame, &runtime.outbox)
                .await;
            broadcast_lock_state(runtime).await;
        }
    }
}

/// Mirror the coordinator's unlock flag to every peripheral
async fn broadcast_lock_state(runtime: &Runtime) {
    let marker = if runtime.ctx.is_unlocked() {
        control::SECURITY_UNLOCKED
    } else {
        control::SECURITY_LOCKED
    };
    for peripheral in NodeId::PERIPHERALS {
        let frame = control_frame(address::MCU, peripheral.address(), marker);
        runtime.outbox.send_logged(&frame).await;
    }
}

async fn probe_peripherals(runtime: &Runtime) {
    for peripheral in NodeId::PERIPHERALS {
        let frame = control_frame(address::MCU, peripheral.address(), control::LIVENESS_PROBE);
        runtime.outbox.send_logged(&frame).await;
    }
}

fn spawn_liveness_sweep(runtime: Runtime, liveness: Arc<LivenessTable>) -> JoinHandle<()> {
    let config = runtime.ctx.config.liveness.clone();

    tokio::spawn(async move {
        let mut stop = runtime.stop.clone();
        probe_peripherals(&runtime).await;

        let mut ticker = interval(config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while runtime.is_running() {
            tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => {}
            }

            let down = liveness.sweep(Instant::now(), config.timeout());
            if !down.is_empty() {
                warn!(
                    nodes = ?down.iter().map(|n| format!("0x{:02X}", n)).collect::<Vec<_>>(),
                    "Peripherals stopped reporting, probing"
                );
                probe_peripherals(&runtime).await;
            }
        }
        debug!(node = %runtime.node(), "Liveness sweep stopped");
    })
}
