//! Process-level reset: a node restarts in place

use ecunet_uds::ota::VersionCheck;
use ecunet_uds::{ResetKind, ResetStrategy, ServiceContext};
use tracing::{error, info};

/// Re-initialise a node as if it had been power cycled
///
/// Volatile state returns to power-on values (Default session, no transfer,
/// no timers, security locked). Persisted state survives, and the startup
/// version check runs again so an activated update is committed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeRestart;

impl ResetStrategy for NodeRestart {
    fn perform_reset(&self, ctx: &ServiceContext, kind: ResetKind) {
        info!(node = %ctx.node, ?kind, "Restarting node");
        ctx.reinitialize();
        ctx.security.lock();

        match ctx.ota.check_sw_version() {
            Ok(VersionCheck::Updated { previous, current }) => info!(
                node = %ctx.node,
                previous = format!("0x{:02X}", previous),
                current = format!("0x{:02X}", current),
                "Pending update committed on restart"
            ),
            Ok(_) => {}
            Err(nrc) => error!(node = %ctx.node, nrc = %nrc, "Version check after restart failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ecunet_uds::{
        DiagnosticSession, MemoryBackingStore, MemoryStore, NodeConfig, NodeId,
    };

    use super::*;

    #[tokio::test]
    async fn test_restart_returns_volatile_state_to_defaults() {
        let config = NodeConfig::default();
        let backing = Arc::new(MemoryBackingStore::new(config.ota.partition_size()));
        let ctx = ServiceContext::new(NodeId::Mcu, config, Arc::new(MemoryStore::new()), backing);
        ctx.ota.ensure_initialized().unwrap();

        ctx.session.set_session(0x03).unwrap();
        ctx.security.apply_notification(true);
        assert_eq!(ctx.session.current(), DiagnosticSession::Extended);

        NodeRestart.perform_reset(&ctx, ResetKind::Hard);

        assert_eq!(ctx.session.current(), DiagnosticSession::Default);
        assert!(!ctx.is_unlocked());
    }
}
