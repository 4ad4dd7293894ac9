//! Service handlers and their descriptor table
//!
//! Each service is a [`ServiceDescriptor`]: the preconditions the dispatcher
//! evaluates uniformly (length, sub-function, security, session) plus a plain
//! handler function. Handlers see a [`ServiceContext`] holding the node's own
//! state and collaborators; there is no shared global state.

pub mod data;
pub mod dtc;
pub mod memory;
pub mod reset;
pub mod routine;
pub mod security;
pub mod session;
pub mod timing;
pub mod transfer;

use std::collections::HashSet;
use std::sync::Arc;

pub use reset::{LoggingReset, ResetKind, ResetStrategy};

use crate::address::NodeId;
use crate::config::NodeConfig;
use crate::frame::Frame;
use crate::ota::OtaMachine;
use crate::security::SecurityAccess;
use crate::session::SessionManager;
use crate::store::{BackingStore, DataStore};
use crate::timing::TimingSupervisor;
use crate::uds::{service_id, NegativeResponseCode, TimingClass};

/// What a handler wants sent back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Positive response bytes, starting with SID + 0x40
    Reply(Vec<u8>),
    /// Reply first, then run the node's reset strategy
    ReplyThenReset(Vec<u8>, ResetKind),
    /// Nothing is sent
    NoResponse,
}

pub type ServiceResult = Result<Outcome, NegativeResponseCode>;

pub type Handler = fn(&ServiceContext, &Frame) -> ServiceResult;

/// Session a service insists on, and the NRC used when it is not met
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRequirement {
    Any,
    /// Extended only; 0x7E when violated
    Extended,
    /// Programming or Extended; 0x7F when violated
    NonDefault,
}

/// Static description of one service
#[derive(Clone)]
pub struct ServiceDescriptor {
    pub sid: u8,
    pub name: &'static str,
    /// Minimum request length, SID included
    pub min_len: usize,
    /// Accepted sub-functions, if the service has any
    pub sub_functions: Option<&'static [u8]>,
    /// Bit 7 of the sub-function suppresses the positive response
    pub suppressible: bool,
    pub requires_security: bool,
    pub session: SessionRequirement,
    pub timing: TimingClass,
    pub handler: Handler,
}

impl std::fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("sid", &format_args!("0x{:02X}", self.sid))
            .field("name", &self.name)
            .finish()
    }
}

impl ServiceDescriptor {
    const fn new(sid: u8, name: &'static str, min_len: usize, handler: Handler) -> Self {
        Self {
            sid,
            name,
            min_len,
            sub_functions: None,
            suppressible: false,
            requires_security: false,
            session: SessionRequirement::Any,
            timing: TimingClass::P2,
            handler,
        }
    }

    const fn sub_functions(mut self, subs: &'static [u8]) -> Self {
        self.sub_functions = Some(subs);
        self
    }

    const fn suppressible(mut self) -> Self {
        self.suppressible = true;
        self
    }

    const fn secured(mut self) -> Self {
        self.requires_security = true;
        self
    }

    const fn session(mut self, requirement: SessionRequirement) -> Self {
        self.session = requirement;
        self
    }

    const fn timing(mut self, class: TimingClass) -> Self {
        self.timing = class;
        self
    }
}

/// Services every node offers; the coordinator adds SecurityAccess
pub fn catalogue(node: NodeId) -> Vec<ServiceDescriptor> {
    use service_id::*;
    use SessionRequirement::*;

    let mut services = vec![
        ServiceDescriptor::new(
            DIAGNOSTIC_SESSION_CONTROL,
            "DiagnosticSessionControl",
            2,
            session::diagnostic_session_control,
        )
        .sub_functions(&[0x01, 0x02, 0x03]),
        ServiceDescriptor::new(ECU_RESET, "ECUReset", 2, reset::ecu_reset)
            .sub_functions(&[0x01, 0x02])
            .secured(),
        ServiceDescriptor::new(
            CLEAR_DIAGNOSTIC_INFORMATION,
            "ClearDiagnosticInformation",
            4,
            dtc::clear_diagnostic_information,
        ),
        ServiceDescriptor::new(
            READ_DTC_INFORMATION,
            "ReadDTCInformation",
            3,
            dtc::read_dtc_information,
        )
        .sub_functions(&[0x01, 0x02]),
        ServiceDescriptor::new(
            READ_DATA_BY_IDENTIFIER,
            "ReadDataByIdentifier",
            3,
            data::read_data_by_identifier,
        )
        .secured(),
        ServiceDescriptor::new(
            READ_MEMORY_BY_ADDRESS,
            "ReadMemoryByAddress",
            4,
            memory::read_memory_by_address,
        )
        .secured(),
        ServiceDescriptor::new(
            WRITE_DATA_BY_IDENTIFIER,
            "WriteDataByIdentifier",
            4,
            data::write_data_by_identifier,
        )
        .secured(),
        // Session is checked per routine
        ServiceDescriptor::new(ROUTINE_CONTROL, "RoutineControl", 4, routine::routine_control)
            .sub_functions(&[0x01])
            .secured()
            .timing(TimingClass::P2Star),
        ServiceDescriptor::new(
            REQUEST_UPDATE_STATUS,
            "RequestUpdateStatus",
            1,
            transfer::request_update_status,
        ),
        ServiceDescriptor::new(REQUEST_DOWNLOAD, "RequestDownload", 4, transfer::request_download)
            .secured()
            .session(NonDefault)
            .timing(TimingClass::P2Star),
        ServiceDescriptor::new(TRANSFER_DATA, "TransferData", 3, transfer::transfer_data)
            .timing(TimingClass::P2Star),
        ServiceDescriptor::new(
            REQUEST_TRANSFER_EXIT,
            "RequestTransferExit",
            2,
            transfer::request_transfer_exit,
        )
        .timing(TimingClass::P2Star),
        ServiceDescriptor::new(TESTER_PRESENT, "TesterPresent", 2, session::tester_present)
            .sub_functions(&[0x00])
            .suppressible(),
        ServiceDescriptor::new(
            ACCESS_TIMING_PARAMETER,
            "AccessTimingParameter",
            2,
            timing::access_timing_parameter,
        )
        .sub_functions(&[0x01, 0x02, 0x03, 0x04]),
    ];

    if node.is_coordinator() {
        services.push(
            ServiceDescriptor::new(SECURITY_ACCESS, "SecurityAccess", 2, security::security_access)
                .sub_functions(&[0x01, 0x02])
                .timing(TimingClass::P2Star),
        );
    }

    services
}

/// Everything a handler may touch on its own node
pub struct ServiceContext {
    pub node: NodeId,
    pub config: NodeConfig,
    pub session: SessionManager,
    pub security: SecurityAccess,
    pub timing: TimingSupervisor,
    pub ota: OtaMachine,
    pub store: Arc<dyn DataStore>,
    pub backing: Arc<dyn BackingStore>,
    pub writable_dids: HashSet<u16>,
    pub reset: Arc<dyn ResetStrategy>,
}

impl ServiceContext {
    pub fn new(
        node: NodeId,
        config: NodeConfig,
        store: Arc<dyn DataStore>,
        backing: Arc<dyn BackingStore>,
    ) -> Self {
        let mut timing = TimingSupervisor::new(node, config.timing.clone());
        if !node.is_coordinator() {
            timing = timing.with_untimed([service_id::TRANSFER_DATA]);
        }

        Self {
            node,
            session: SessionManager::new(node, config.session.clone()),
            security: SecurityAccess::new(config.security.clone()),
            ota: OtaMachine::new(node, config.ota.clone(), store.clone(), backing.clone()),
            timing,
            config,
            store,
            backing,
            writable_dids: HashSet::new(),
            reset: Arc::new(LoggingReset),
        }
    }

    pub fn with_writable_dids(mut self, dids: impl IntoIterator<Item = u16>) -> Self {
        self.writable_dids = dids.into_iter().collect();
        self
    }

    pub fn with_reset_strategy(mut self, reset: Arc<dyn ResetStrategy>) -> Self {
        self.reset = reset;
        self
    }

    /// Path of this node in the data store
    pub fn store_path(&self) -> &'static str {
        self.node.name()
    }

    pub fn is_unlocked(&self) -> bool {
        self.security.is_unlocked()
    }

    /// Return volatile state to power-on values
    pub fn reinitialize(&self) {
        self.session.reset();
        self.ota.reset_volatile();
        // Handles are dropped; the watchdogs exit on their next poll
        drop(self.timing.deactivate_all());
        self.timing.reset_budgets();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::store::{MemoryBackingStore, MemoryStore};

    pub struct TestNode {
        pub ctx: ServiceContext,
        pub store: Arc<MemoryStore>,
        pub backing: Arc<MemoryBackingStore>,
    }

    pub fn node(id: NodeId) -> TestNode {
        let config = NodeConfig::default();
        let store = Arc::new(MemoryStore::new());
        let backing = Arc::new(MemoryBackingStore::new(config.ota.partition_size()));
        let ctx = ServiceContext::new(id, config, store.clone(), backing.clone())
            .with_writable_dids([0xF1A0, 0xF1A2, 0xF1A5, 0xF1A8, 0xF1A9]);
        ctx.ota.ensure_initialized().unwrap();
        TestNode {
            ctx,
            store,
            backing,
        }
    }

    pub fn unlocked(id: NodeId) -> TestNode {
        let node = node(id);
        node.ctx.security.apply_notification(true);
        node
    }

    pub fn request(data: &[u8]) -> Frame {
        Frame::new(0xFA, 0x10, data.to_vec())
    }

    pub fn reply(data: &[u8]) -> ServiceResult {
        Ok(Outcome::Reply(data.to_vec()))
    }
}
