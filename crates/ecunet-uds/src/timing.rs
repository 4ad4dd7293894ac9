//! Response timing supervision
//!
//! Every supervised request gets a watchdog task. If the handler is still
//! running when the P2 (or P2*) budget runs out, the watchdog sends one
//! "response pending" (NRC 0x78) to the requester and goes quiet. The handler
//! is never aborted; its real answer follows whenever it is ready.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::address::NodeId;
use crate::config::TimingConfig;
use crate::frame::Frame;
use crate::transport::Outbox;
use crate::uds::{NegativeResponseCode, TimingClass};

/// Cancel handle of one in-flight watchdog
pub struct TimerHandle {
    active: Arc<AtomicBool>,
    started: Instant,
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Idempotent; the task notices on its next poll and exits
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// P2 / P2* values in protocol units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budgets {
    pub p2_max: u16,
    pub p2_star_max: u16,
}

/// Per-node map of SID to watchdog
pub struct TimingSupervisor {
    node: NodeId,
    config: TimingConfig,
    budgets: RwLock<Budgets>,
    untimed: HashSet<u8>,
    timers: Mutex<HashMap<u8, TimerHandle>>,
    last_elapsed: Mutex<HashMap<u8, Duration>>,
}

impl TimingSupervisor {
    pub fn new(node: NodeId, config: TimingConfig) -> Self {
        let budgets = Budgets {
            p2_max: config.p2_max,
            p2_star_max: config.p2_star_max,
        };
        Self {
            node,
            config,
            budgets: RwLock::new(budgets),
            untimed: HashSet::new(),
            timers: Mutex::new(HashMap::new()),
            last_elapsed: Mutex::new(HashMap::new()),
        }
    }

    /// Exclude SIDs from supervision on this node
    pub fn with_untimed(mut self, sids: impl IntoIterator<Item = u8>) -> Self {
        self.untimed.extend(sids);
        self
    }

    pub fn budgets(&self) -> Budgets {
        *self.budgets.read()
    }

    pub fn default_budgets(&self) -> Budgets {
        Budgets {
            p2_max: self.config.p2_max,
            p2_star_max: self.config.p2_star_max,
        }
    }

    pub fn set_budgets(&self, budgets: Budgets) {
        debug!(
            node = %self.node,
            p2 = format!("0x{:04X}", budgets.p2_max),
            p2_star = format!("0x{:04X}", budgets.p2_star_max),
            "Timing budgets updated"
        );
        *self.budgets.write() = budgets;
    }

    pub fn reset_budgets(&self) {
        self.set_budgets(self.default_budgets());
    }

    /// Wall-clock budget for a timing class, if it is supervised at all
    pub fn budget_for(&self, class: TimingClass) -> Option<Duration> {
        let budgets = self.budgets();
        let units = match class {
            TimingClass::P2 => budgets.p2_max,
            TimingClass::P2Star => budgets.p2_star_max,
            TimingClass::Untimed => return None,
        };
        Some(Duration::from_secs_f64(
            units as f64 / self.config.budget_divisor,
        ))
    }

    /// Start supervising `request`; a previous timer for the same SID is replaced
    pub fn start(&self, request: &Frame, class: TimingClass, outbox: &Outbox) {
        let Some(sid) = request.sid() else {
            return;
        };
        if self.untimed.contains(&sid) {
            return;
        }
        let Some(budget) = self.budget_for(class) else {
            return;
        };

        let active = Arc::new(AtomicBool::new(true));
        let started = Instant::now();
        let task = tokio::runtime::Handle::try_current().ok().map(|runtime| {
            runtime.spawn(watchdog(
                self.node,
                active.clone(),
                started,
                budget,
                self.config.poll_interval(),
                request.negative_reply(sid, NegativeResponseCode::ResponsePending),
                outbox.clone(),
            ))
        });

        let handle = TimerHandle {
            active,
            started,
            task,
        };
        if let Some(previous) = self.timers.lock().insert(sid, handle) {
            previous.deactivate();
        }
    }

    /// Stop supervising `sid`; returns the processing time, or `None` if no timer existed
    pub fn stop(&self, sid: u8) -> Option<Duration> {
        let handle = self.timers.lock().remove(&sid)?;
        handle.deactivate();
        let elapsed = handle.elapsed();
        self.last_elapsed.lock().insert(sid, elapsed);
        debug!(
            node = %self.node,
            sid = format!("0x{:02X}", sid),
            elapsed_ms = elapsed.as_millis() as u64,
            "Request processed"
        );
        Some(elapsed)
    }

    pub fn is_active(&self, sid: u8) -> bool {
        self.timers
            .lock()
            .get(&sid)
            .map(TimerHandle::is_active)
            .unwrap_or(false)
    }

    pub fn last_elapsed(&self, sid: u8) -> Option<Duration> {
        self.last_elapsed.lock().get(&sid).copied()
    }

    /// Deactivate every watchdog and forget it; returns the task handles
    pub fn deactivate_all(&self) -> Vec<JoinHandle<()>> {
        self.timers
            .lock()
            .drain()
            .filter_map(|(_, mut handle)| {
                handle.deactivate();
                handle.task.take()
            })
            .collect()
    }
}

async fn watchdog(
    node: NodeId,
    active: Arc<AtomicBool>,
    started: Instant,
    budget: Duration,
    poll: Duration,
    pending: Frame,
    outbox: Outbox,
) {
    loop {
        tokio::time::sleep(poll).await;
        if !active.load(Ordering::SeqCst) {
            return;
        }
        if started.elapsed() > budget {
            // Only one "pending" per request
            if active.swap(false, Ordering::SeqCst) {
                warn!(
                    node = %node,
                    sid = format!("0x{:02X}", pending.data.get(1).copied().unwrap_or_default()),
                    budget_ms = budget.as_millis() as u64,
                    "Response time exceeded, sending response pending"
                );
                outbox.send_logged(&pending).await;
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BusChannel, VirtualBus};

    fn supervisor() -> TimingSupervisor {
        TimingSupervisor::new(NodeId::Mcu, TimingConfig::default())
    }

    fn outbox() -> (Outbox, Arc<VirtualBus>) {
        let bus = Arc::new(VirtualBus::new("bus"));
        let api = Arc::new(VirtualBus::new("api"));
        let api_channel: Arc<dyn BusChannel> = api.clone();
        (Outbox::new(bus, Some(api_channel)), api)
    }

    #[test]
    fn test_budget_conversion() {
        let timing = supervisor();
        assert_eq!(
            timing.budget_for(TimingClass::P2),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            timing.budget_for(TimingClass::P2Star),
            Some(Duration::from_secs(20))
        );
        assert_eq!(timing.budget_for(TimingClass::Untimed), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_gets_one_response_pending() {
        let timing = supervisor();
        let (outbox, api) = outbox();
        let mut rx = api.subscribe();
        let request = Frame::new(0xFA, 0x10, vec![0x22, 0xF1, 0x90]);

        timing.start(&request, TimingClass::P2, &outbox);
        tokio::time::sleep(Duration::from_millis(2100)).await;

        let pending = rx.recv().await.unwrap();
        assert_eq!(pending.id, 0x10FA);
        assert_eq!(pending.data, vec![0x03, 0x7F, 0x22, 0x78]);
        assert!(!timing.is_active(0x22));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert!(timing.stop(0x22).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_handler_sends_nothing() {
        let timing = supervisor();
        let (outbox, api) = outbox();
        let mut rx = api.subscribe();
        let request = Frame::new(0xFA, 0x10, vec![0x27, 0x01]);

        timing.start(&request, TimingClass::P2Star, &outbox);
        tokio::time::sleep(Duration::from_millis(500)).await;
        let elapsed = timing.stop(0x27).unwrap();
        assert!(elapsed >= Duration::from_millis(500));
        assert_eq!(timing.last_elapsed(0x27), Some(elapsed));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_unknown_sid_is_a_no_op() {
        let timing = supervisor();
        assert_eq!(timing.stop(0x31), None);
        assert_eq!(timing.stop(0x31), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_timer() {
        let timing = supervisor();
        let (outbox, api) = outbox();
        let mut rx = api.subscribe();
        let request = Frame::new(0xFA, 0x10, vec![0x22, 0xF1, 0x90]);

        timing.start(&request, TimingClass::P2, &outbox);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        timing.start(&request, TimingClass::P2, &outbox);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // First watchdog was deactivated, second has not expired yet
        assert!(rx.try_recv().is_err());
        assert!(timing.is_active(0x22));
        timing.deactivate_all();
        assert!(!timing.is_active(0x22));
    }

    #[tokio::test(start_paused = true)]
    async fn test_untimed_sid_is_not_supervised() {
        let timing = supervisor().with_untimed([0x36]);
        let (outbox, _api) = outbox();
        timing.start(
            &Frame::new(0x10, 0x11, vec![0x36, 0x01, 0xAA]),
            TimingClass::P2Star,
            &outbox,
        );
        assert_eq!(timing.stop(0x36), None);
    }

    #[test]
    fn test_set_and_reset_budgets() {
        let timing = supervisor();
        timing.set_budgets(Budgets {
            p2_max: 0x0050,
            p2_star_max: 0x0200,
        });
        assert_eq!(
            timing.budget_for(TimingClass::P2),
            Some(Duration::from_secs(4))
        );
        timing.reset_budgets();
        assert_eq!(timing.budgets(), timing.default_budgets());
    }
}
