//! Peripheral workers

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::{control_frame, ensure_connected, Node, Runtime};
use crate::address::address;
use crate::error::{NodeError, Result};
use crate::ota::VersionCheck;
use crate::queue::{FrameQueue, Origin, Queued, ReceiverFilter};
use crate::services::ServiceContext;
use crate::transport::{BusChannel, Outbox};
use crate::uds::control;

impl Node {
    /// Start a peripheral on `bus`
    pub async fn start_peripheral(ctx: ServiceContext, bus: Arc<dyn BusChannel>) -> Result<Node> {
        if ctx.node.is_coordinator() {
            return Err(NodeError::WrongRole(ctx.node));
        }
        ensure_connected(&bus, "bus").await?;
        ctx.ota.ensure_initialized()?;

        let own = ctx.node.address();
        let ctx = Arc::new(ctx);
        let queue = Arc::new(FrameQueue::new(ReceiverFilter::Peripheral(own)));
        let outbox = Outbox::new(bus.clone(), None);
        let (runtime, stop) = Runtime::new(ctx.clone(), queue, outbox);

        let workers = vec![
            runtime.spawn_reader(bus, Origin::Bus),
            spawn_egress(runtime.clone()),
            spawn_heartbeat(runtime.clone()),
        ];

        announce_up(&runtime).await;
        match ctx.ota.check_sw_version() {
            Ok(VersionCheck::Updated { previous, current }) => info!(
                node = %ctx.node,
                previous = format!("0x{:02X}", previous),
                current = format!("0x{:02X}", current),
                "Pending update committed at startup"
            ),
            Ok(_) => {}
            Err(nrc) => error!(node = %ctx.node, nrc = %nrc, "Startup version check failed"),
        }

        info!(node = %ctx.node, "Peripheral started");
        Ok(runtime.into_node(stop, None, workers))
    }
}

async fn announce_up(runtime: &Runtime) {
    let up = control_frame(
        runtime.node().address(),
        address::MCU,
        control::UP_NOTIFICATION,
    );
    runtime.outbox.send_logged(&up).await;
}

fn spawn_egress(runtime: Runtime) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(Queued { frame, .. }) = runtime.queue.dequeue().await {
            if !runtime.is_running() {
                break;
            }
            match frame.sid() {
                Some(control::LIVENESS_PROBE) => announce_up(&runtime).await,
                Some(control::SECURITY_UNLOCKED) => runtime.ctx.security.apply_notification(true),
                Some(control::SECURITY_LOCKED) => runtime.ctx.security.apply_notification(false),
                Some(control::UP_NOTIFICATION) | None => {}
                Some(_) => {
                    runtime
                        .dispatcher
                        .dispatch(&runtime.ctx, &frame, &runtime.outbox)
                        .await;
                }
            }
        }
        debug!(node = %runtime.node(), "Egress worker stopped");
    })
}

fn spawn_heartbeat(runtime: Runtime) -> JoinHandle<()> {
    let period = runtime.ctx.config.liveness.heartbeat_interval();

    tokio::spawn(async move {
        let mut stop = runtime.stop.clone();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while runtime.is_running() {
            tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => announce_up(&runtime).await,
            }
        }
        debug!(node = %runtime.node(), "Heartbeat stopped");
    })
}
