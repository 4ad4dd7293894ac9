//! Per-node session manager with inactivity expiry

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{DiagnosticSession, SessionError};
use crate::address::NodeId;
use crate::config::SessionConfig;

/// Owns the current diagnostic session of one node
///
/// Entering a non-default session arms an expiry task that falls back to
/// [`DiagnosticSession::Default`] unless a keep-alive re-arms it first.
pub struct SessionManager {
    node: NodeId,
    config: SessionConfig,
    current: Arc<RwLock<DiagnosticSession>>,
    expiry_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(node: NodeId, config: SessionConfig) -> Self {
        Self {
            node,
            config,
            current: Arc::new(RwLock::new(DiagnosticSession::Default)),
            expiry_handle: Mutex::new(None),
        }
    }

    /// Get the current session
    pub fn current(&self) -> DiagnosticSession {
        *self.current.read()
    }

    /// Switch session (UDS 0x10)
    pub fn set_session(&self, sub_function: u8) -> Result<DiagnosticSession, SessionError> {
        let target = DiagnosticSession::from_sub_function(sub_function)
            .ok_or(SessionError::UnsupportedSession(sub_function))?;

        self.enter(target, self.timeout_for(target));
        Ok(target)
    }

    /// Refresh the inactivity countdown (UDS 0x3E)
    ///
    /// With `enter_programming` the node moves to Programming and the short
    /// S3 window applies; otherwise the countdown of the current session is
    /// re-armed. A keep-alive in Default without `enter_programming` does nothing.
    pub fn keep_alive(&self, enter_programming: bool) {
        if enter_programming {
            self.enter(
                DiagnosticSession::Programming,
                Duration::from_secs(self.config.s3_timeout_secs),
            );
            return;
        }

        let current = self.current();
        if !current.is_default() {
            self.arm_expiry(self.timeout_for(current));
        }
    }

    /// Drop back to Default immediately and disarm the countdown
    pub fn reset(&self) {
        self.disarm();
        let previous = std::mem::replace(&mut *self.current.write(), DiagnosticSession::Default);
        if !previous.is_default() {
            info!(node = %self.node, from = %previous, "Session reset to default");
        }
    }

    fn timeout_for(&self, session: DiagnosticSession) -> Duration {
        match session {
            DiagnosticSession::Programming => Duration::from_secs(self.config.s3_timeout_secs),
            _ => Duration::from_secs(self.config.non_default_timeout_secs),
        }
    }

    fn enter(&self, target: DiagnosticSession, timeout: Duration) {
        let previous = std::mem::replace(&mut *self.current.write(), target);
        if previous != target {
            info!(node = %self.node, from = %previous, to = %target, "Session changed");
        }

        if target.is_default() {
            self.disarm();
        } else {
            self.arm_expiry(timeout);
        }
    }

    fn arm_expiry(&self, timeout: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(node = %self.node, "No runtime, session expiry not armed");
            return;
        };

        let current = self.current.clone();
        let node = self.node;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let previous = std::mem::replace(&mut *current.write(), DiagnosticSession::Default);
            info!(node = %node, from = %previous, "Session expired, back to default");
        });

        if let Some(old) = self.expiry_handle.lock().replace(handle) {
            old.abort();
        }
    }

    fn disarm(&self) {
        if let Some(old) = self.expiry_handle.lock().take() {
            old.abort();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.disarm();
    }
}
