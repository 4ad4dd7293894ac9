//! Security access state machine
//!
//! The coordinator is the authority: it issues seeds, checks keys and counts
//! failed attempts. Peripherals keep only a mirror of the unlock flag, updated
//! from the lock/unlock notifications the coordinator broadcasts.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rand::Rng;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use crate::address::{address, NodeAddress};
use crate::config::SecurityConfig;
use crate::uds::NegativeResponseCode;

/// Result of a seed request that did not fail outright
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    /// New pending seed
    Issued(Vec<u8>),
    /// Nothing to do, no response is sent
    AlreadyUnlocked,
    /// Requester is not the API actor, no response is sent
    Refused,
}

/// Result of a key submission that did not fail outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Granted,
    /// Nothing to do, no response is sent
    AlreadyUnlocked,
}

#[derive(Debug, Default)]
struct SecurityState {
    pending_seed: Option<Vec<u8>>,
    failed_attempts: u8,
    lockout_until: Option<Instant>,
    /// 0x36 already sent for the current lockout
    exceeded_reported: bool,
}

/// Per-node security access state
pub struct SecurityAccess {
    config: SecurityConfig,
    unlocked: AtomicBool,
    state: Mutex<SecurityState>,
}

/// Expected key for a seed: two's-complement negation of every byte
pub fn compute_key(seed: &[u8]) -> Vec<u8> {
    seed.iter().map(|b| (!b).wrapping_add(1)).collect()
}

impl SecurityAccess {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config,
            unlocked: AtomicBool::new(false),
            state: Mutex::new(SecurityState::default()),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    /// Mirror a lock/unlock notification from the coordinator
    pub fn apply_notification(&self, unlocked: bool) {
        self.unlocked.store(unlocked, Ordering::SeqCst);
    }

    /// Drop the unlock and any pending seed
    pub fn lock(&self) {
        self.unlocked.store(false, Ordering::SeqCst);
        self.state.lock().pending_seed = None;
    }

    pub fn is_locked_out(&self) -> bool {
        let mut state = self.state.lock();
        self.refresh_lockout(&mut state);
        state.lockout_until.is_some()
    }

    /// Seed request (UDS 0x27 0x01)
    pub fn request_seed(&self, sender: NodeAddress) -> Result<SeedOutcome, NegativeResponseCode> {
        if sender != address::API {
            warn!(
                sender = format!("0x{:02X}", sender),
                "Security service can be accessed only from API."
            );
            return Ok(SeedOutcome::Refused);
        }

        let mut state = self.state.lock();
        self.refresh_lockout(&mut state);

        if state.lockout_until.is_some() {
            warn!("Please wait: security access is locked out");
            return Err(NegativeResponseCode::RequiredTimeDelayNotExpired);
        }

        if self.is_unlocked() {
            info!("Server is already unlocked.");
            return Ok(SeedOutcome::AlreadyUnlocked);
        }

        let mut rng = rand::thread_rng();
        let seed: Vec<u8> = (0..self.config.seed_length)
            .map(|_| rng.gen_range(1..=0xFF))
            .collect();
        state.pending_seed = Some(seed.clone());

        info!(seed = %hex::encode_upper(&seed), "Security seed issued");
        Ok(SeedOutcome::Issued(seed))
    }

    /// Key submission (UDS 0x27 0x02)
    ///
    /// The first key during a lockout gets 0x36, later ones 0x37 until it ends.
    pub fn send_key(&self, key: &[u8]) -> Result<KeyOutcome, NegativeResponseCode> {
        let mut state = self.state.lock();
        self.refresh_lockout(&mut state);

        if self.is_unlocked() {
            info!("Server is already unlocked.");
            return Ok(KeyOutcome::AlreadyUnlocked);
        }

        if state.lockout_until.is_some() {
            if state.exceeded_reported {
                warn!("Please wait: security access is locked out");
                return Err(NegativeResponseCode::RequiredTimeDelayNotExpired);
            }
            state.exceeded_reported = true;
            warn!("Too many invalid keys");
            return Err(NegativeResponseCode::ExceededNumberOfAttempts);
        }

        let Some(seed) = state.pending_seed.as_deref() else {
            return Err(NegativeResponseCode::RequestSequenceError);
        };

        if compute_key(seed) != key {
            state.failed_attempts += 1;
            warn!(
                attempts = state.failed_attempts,
                max = self.config.max_attempts,
                "Invalid security key"
            );
            if state.failed_attempts >= self.config.max_attempts {
                let until = Instant::now() + Duration::from_secs(self.config.lockout_secs);
                state.lockout_until = Some(until);
                warn!(
                    lockout_secs = self.config.lockout_secs,
                    "Security access locked out"
                );
            }
            return Err(NegativeResponseCode::InvalidKey);
        }

        state.pending_seed = None;
        state.failed_attempts = 0;
        self.unlocked.store(true, Ordering::SeqCst);
        info!("Security access granted");
        Ok(KeyOutcome::Granted)
    }

    fn refresh_lockout(&self, state: &mut SecurityState) {
        if let Some(until) = state.lockout_until {
            if Instant::now() >= until {
                info!("Security lockout elapsed");
                *state = SecurityState::default();
            }
        }
    }
}
