//! Node runtime
//!
//! A running node is a handful of tokio tasks around one [`ServiceContext`]:
//!
//! ```text
//!   bus reader ──┐
//!                ├──> FrameQueue ──> egress worker ──> Dispatcher ──> Outbox
//!   api reader ──┘        (FIFO)      (one at a time)
//!
//!   coordinator: liveness sweep        peripheral: heartbeat
//! ```
//!
//! Readers reassemble physical frames and push the logical frames this node
//! accepts. The egress worker intercepts control frames and hands everything
//! else to the dispatcher.

mod coordinator;
mod peripheral;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::address::{address, is_known_node, NodeAddress, NodeId};
use crate::dispatch::Dispatcher;
use crate::error::{NodeError, Result};
use crate::frame::{Frame, FrameError, Reassembler};
use crate::liveness::LivenessTable;
use crate::queue::{FrameQueue, Origin};
use crate::services::ServiceContext;
use crate::transport::{BusChannel, Outbox};
use crate::uds::NegativeResponseCode;

/// How long shutdown waits for each worker before aborting it
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle to a running node
pub struct Node {
    ctx: Arc<ServiceContext>,
    queue: Arc<FrameQueue>,
    outbox: Outbox,
    liveness: Option<Arc<LivenessTable>>,
    running: Arc<AtomicBool>,
    stop: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// State shared by the worker tasks of one node
#[derive(Clone)]
struct Runtime {
    ctx: Arc<ServiceContext>,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<FrameQueue>,
    outbox: Outbox,
    running: Arc<AtomicBool>,
    stop: watch::Receiver<bool>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.ctx.node
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.ctx
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Coordinator's view of peripheral liveness
    pub fn liveness(&self) -> Option<&Arc<LivenessTable>> {
        self.liveness.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop every worker; safe to call more than once
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(node = %self.ctx.node, "Shutting down node");

        let _ = self.stop.send(true);
        self.queue.shutdown();
        let watchdogs = self.ctx.timing.deactivate_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers.into_iter().chain(watchdogs) {
            let abort = handle.abort_handle();
            if tokio::time::timeout(WORKER_JOIN_TIMEOUT, handle).await.is_err() {
                warn!(node = %self.ctx.node, "Worker did not stop in time, aborting");
                abort.abort();
            }
        }
        self.queue.clear();
    }
}

impl Runtime {
    fn new(
        ctx: Arc<ServiceContext>,
        queue: Arc<FrameQueue>,
        outbox: Outbox,
    ) -> (Self, watch::Sender<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let runtime = Self {
            dispatcher: Arc::new(Dispatcher::new(ctx.node)),
            ctx,
            queue,
            outbox,
            running: Arc::new(AtomicBool::new(true)),
            stop: stop_rx,
        };
        (runtime, stop_tx)
    }

    fn node(&self) -> NodeId {
        self.ctx.node
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn into_node(
        self,
        stop: watch::Sender<bool>,
        liveness: Option<Arc<LivenessTable>>,
        workers: Vec<JoinHandle<()>>,
    ) -> Node {
        Node {
            ctx: self.ctx,
            queue: self.queue,
            outbox: self.outbox,
            liveness,
            running: self.running,
            stop,
            workers: Mutex::new(workers),
        }
    }

    /// Read physical frames from `channel` and queue what this node accepts
    ///
    /// Subscribes before returning, so nothing sent afterwards is missed.
    fn spawn_reader(&self, channel: Arc<dyn BusChannel>, origin: Origin) -> JoinHandle<()> {
        let mut rx = channel.subscribe();
        let runtime = self.clone();

        tokio::spawn(async move {
            let mut stop = runtime.stop.clone();
            let mut reassembler = Reassembler::new();
            let filter = runtime.queue.filter();
            let own = runtime.node().address();

            while runtime.is_running() {
                let can = tokio::select! {
                    _ = stop.changed() => break,
                    received = rx.recv() => match received {
                        Ok(can) => can,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(node = %runtime.node(), skipped, ?origin, "Reader lagged, frames dropped");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };

                let accepted = match origin {
                    Origin::Bus => filter.accepts_bus(can.receiver()),
                    Origin::Api => filter.accepts_api(can.receiver()),
                };
                if !accepted {
                    continue;
                }

                match reassembler.push(&can) {
                    Ok(Some(frame)) => match origin {
                        Origin::Bus => {
                            runtime.queue.enqueue(frame);
                        }
                        Origin::Api => {
                            runtime.queue.enqueue_from_api(frame);
                        }
                    },
                    Ok(None) => {}
                    Err(FrameError::Truncated { sid: Some(sid), .. })
                        if answers_for(own, origin, can.receiver()) =>
                    {
                        warn!(
                            node = %runtime.node(),
                            sid = format!("0x{:02X}", sid),
                            "Truncated request"
                        );
                        let request = Frame::from_routing_id(can.id, vec![sid]);
                        runtime
                            .outbox
                            .send_logged(&request.negative_reply(
                                sid,
                                NegativeResponseCode::IncorrectMessageLengthOrFormat,
                            ))
                            .await;
                    }
                    Err(e) => {
                        debug!(node = %runtime.node(), frame = %can, error = %e, "Dropping malformed frame");
                    }
                }
            }
            debug!(node = %runtime.node(), ?origin, "Reader stopped");
        })
    }
}

async fn ensure_connected(channel: &Arc<dyn BusChannel>, name: &str) -> Result<()> {
    if channel.is_connected().await {
        Ok(())
    } else {
        Err(NodeError::ChannelUnavailable(name.to_string()))
    }
}

/// Single-byte control frame from `from` to `to`
fn control_frame(from: NodeAddress, to: NodeAddress, marker: u8) -> Frame {
    Frame::new(from, to, vec![marker])
}

/// Whether a node answers malformed frames for `receiver`
///
/// The coordinator answers for every node reached through the API channel,
/// since only complete frames are forwarded to the bus.
fn answers_for(own: NodeAddress, origin: Origin, receiver: NodeAddress) -> bool {
    receiver == own || (origin == Origin::Api && is_known_node(receiver))
}

fn is_for_coordinator(receiver: NodeAddress) -> bool {
    matches!(receiver, address::MCU | address::BROADCAST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_answers_malformed_api_frames_for_known_nodes() {
        assert!(answers_for(address::MCU, Origin::Api, address::MCU));
        assert!(answers_for(address::MCU, Origin::Api, address::HVAC));
        assert!(!answers_for(address::MCU, Origin::Api, 0x42));
        assert!(!answers_for(address::MCU, Origin::Bus, address::ENGINE));
        assert!(answers_for(address::ENGINE, Origin::Bus, address::ENGINE));
    }
}
