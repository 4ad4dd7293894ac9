//! OTA transfer state machine
//!
//! The state lives in the node's data store (DID 0x01E0) so it survives a
//! restart; the open transfer and the last completed download are volatile.
//! Every collaborator failure is turned into a negative response here and
//! never propagates further.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{FirmwareImage, FirmwareImageError, OtaState};
use crate::address::NodeId;
use crate::config::OtaConfig;
use crate::store::{BackingStore, DataStore, StoreError};
use crate::uds::{did, routine, NegativeResponseCode};

/// A finished download, handed to the transfer-complete hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    pub address: u64,
    pub size: u64,
}

/// Decides whether a finished download is accepted on RequestTransferExit
pub type TransferCompleteHook = Arc<dyn Fn(&DownloadSummary) -> bool + Send + Sync>;

/// Outcome of the software version check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// Not in the Activate state, nothing checked
    NotActivating,
    /// Installed version already matches
    Unchanged,
    Updated { previous: u8, current: u8 },
}

#[derive(Debug)]
struct Transfer {
    address: u64,
    size: u64,
    written: u64,
    next_block: u8,
}

#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Image(#[from] FirmwareImageError),

    #[error("{0}")]
    Missing(&'static str),
}

pub struct OtaMachine {
    node: NodeId,
    config: OtaConfig,
    store: Arc<dyn DataStore>,
    backing: Arc<dyn BackingStore>,
    transfer: Mutex<Option<Transfer>>,
    downloaded: Mutex<Option<DownloadSummary>>,
    on_transfer_complete: RwLock<TransferCompleteHook>,
}

impl OtaMachine {
    pub fn new(
        node: NodeId,
        config: OtaConfig,
        store: Arc<dyn DataStore>,
        backing: Arc<dyn BackingStore>,
    ) -> Self {
        Self {
            node,
            config,
            store,
            backing,
            transfer: Mutex::new(None),
            downloaded: Mutex::new(None),
            on_transfer_complete: RwLock::new(Arc::new(|_: &DownloadSummary| true)),
        }
    }

    pub fn set_transfer_complete_hook(&self, hook: TransferCompleteHook) {
        *self.on_transfer_complete.write() = hook;
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    // =========================================================================
    // State persistence
    // =========================================================================

    /// Persist Idle if no state has been stored yet
    pub fn ensure_initialized(&self) -> Result<(), StoreError> {
        match self.store.read(self.node.name(), did::OTA_UPDATE_STATUS) {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound { .. }) => self
                .store
                .write(self.node.name(), did::OTA_UPDATE_STATUS, &[OtaState::Idle.as_u8()]),
            Err(e) => Err(e),
        }
    }

    /// Current persisted state; `None` if missing, unreadable or not a known value
    pub fn state(&self) -> Option<OtaState> {
        match self.store.read(self.node.name(), did::OTA_UPDATE_STATUS) {
            Ok(value) => value.first().copied().and_then(OtaState::from_u8),
            Err(e) => {
                debug!(node = %self.node, error = %e, "OTA state unavailable");
                None
            }
        }
    }

    fn set_state(&self, state: OtaState) -> Result<(), NegativeResponseCode> {
        let previous = self.state();
        self.store
            .write(self.node.name(), did::OTA_UPDATE_STATUS, &[state.as_u8()])
            .map_err(|e| {
                error!(node = %self.node, error = %e, "Failed to persist OTA state");
                NegativeResponseCode::RequestOutOfRange
            })?;
        if previous != Some(state) {
            info!(node = %self.node, state = %state, "OTA state changed");
        }
        Ok(())
    }

    fn require(&self, allowed: &[OtaState]) -> Result<OtaState, NegativeResponseCode> {
        match self.state() {
            Some(state) if allowed.contains(&state) => Ok(state),
            state => {
                warn!(
                    node = %self.node,
                    state = ?state,
                    "Operation not allowed in current OTA state"
                );
                Err(NegativeResponseCode::ConditionsNotCorrect)
            }
        }
    }

    /// Drop volatile transfer bookkeeping
    pub fn reset_volatile(&self) {
        *self.transfer.lock() = None;
    }

    fn version_slot(&self) -> u64 {
        self.config.version_table + (self.node.address() % 0x10) as u64
    }

    /// Version byte currently recorded in the version table
    pub fn installed_version(&self) -> Result<u8, StoreError> {
        let bytes = self.backing.read_from_address(self.version_slot(), 1)?;
        bytes.first().copied().ok_or(StoreError::OutOfRange {
            address: self.version_slot(),
            size: 1,
        })
    }

    fn target_version(&self) -> Result<u8, StepError> {
        self.store
            .read(self.node.name(), did::OTA_TARGET_VERSION)?
            .first()
            .copied()
            .ok_or(StepError::Missing("empty target version"))
    }

    // =========================================================================
    // Download (0x34 / 0x36 / 0x37)
    // =========================================================================

    /// Open a transfer; returns the maximum block length
    pub fn request_download(
        &self,
        address: u64,
        size: u64,
        version: Option<u8>,
    ) -> Result<u16, NegativeResponseCode> {
        self.require(&[OtaState::Init])?;

        let area_end = self.config.download_area_start + self.config.download_area_size;
        let in_area = address >= self.config.download_area_start
            && address.checked_add(size).is_some_and(|end| end <= area_end);
        if size == 0
            || !in_area
            || !self.backing.available_address(address)
            || !self.backing.available_memory(address, size)
        {
            warn!(
                node = %self.node,
                address = format!("0x{:X}", address),
                size,
                backing = %self.backing.path(),
                "Download rejected by backing store"
            );
            self.set_state(OtaState::WaitDownloadFailed)?;
            return Err(NegativeResponseCode::UploadDownloadNotAccepted);
        }

        if let Some(version) = version {
            self.store
                .write(self.node.name(), did::OTA_TARGET_VERSION, &[version])
                .map_err(|_| NegativeResponseCode::RequestOutOfRange)?;
        }

        *self.transfer.lock() = Some(Transfer {
            address,
            size,
            written: 0,
            next_block: 1,
        });
        *self.downloaded.lock() = None;
        self.set_state(OtaState::Wait)?;

        info!(
            node = %self.node,
            address = format!("0x{:X}", address),
            size,
            "Download accepted"
        );
        Ok(self.config.max_block_length)
    }

    /// Store one block; returns the state after the block
    pub fn transfer_data(&self, block: u8, data: &[u8]) -> Result<OtaState, NegativeResponseCode> {
        let mut guard = self.transfer.lock();
        let Some(transfer) = guard.as_mut() else {
            return Err(NegativeResponseCode::RequestSequenceError);
        };

        if block != transfer.next_block {
            warn!(
                node = %self.node,
                expected = transfer.next_block,
                got = block,
                "Wrong block sequence counter"
            );
            return Err(NegativeResponseCode::WrongBlockSequenceCounter);
        }
        if data.len() > self.config.max_block_length as usize {
            return Err(NegativeResponseCode::IncorrectMessageLengthOrFormat);
        }
        if transfer.written + data.len() as u64 > transfer.size {
            warn!(
                node = %self.node,
                announced = transfer.size,
                received = transfer.written + data.len() as u64,
                "Transfer exceeds announced size"
            );
            return Err(NegativeResponseCode::TransferDataSuspended);
        }

        let address = transfer.address + transfer.written;
        if let Err(e) = self.backing.write_to_address(address, data) {
            error!(node = %self.node, error = %e, "Transfer write failed");
            *guard = None;
            self.set_state(OtaState::ProcessingTransferFailed)?;
            return Err(NegativeResponseCode::GeneralProgrammingFailure);
        }

        transfer.written += data.len() as u64;
        transfer.next_block = block.wrapping_add(1);
        let state = if transfer.written == transfer.size {
            OtaState::ProcessingTransferComplete
        } else {
            OtaState::Processing
        };
        self.set_state(state)?;
        Ok(state)
    }

    /// Close the transfer and run the transfer-complete hook
    pub fn transfer_exit(&self) -> Result<(), NegativeResponseCode> {
        if self.state() != Some(OtaState::ProcessingTransferComplete) {
            return Err(NegativeResponseCode::RequestSequenceError);
        }
        let transfer = self
            .transfer
            .lock()
            .take()
            .ok_or(NegativeResponseCode::RequestSequenceError)?;

        let summary = DownloadSummary {
            address: transfer.address,
            size: transfer.size,
        };
        let hook = self.on_transfer_complete.read().clone();
        if !hook(&summary) {
            warn!(node = %self.node, "Transfer rejected on exit");
            self.set_state(OtaState::ProcessingTransferFailed)?;
            return Err(NegativeResponseCode::GeneralProgrammingFailure);
        }

        *self.downloaded.lock() = Some(summary);
        self.set_state(OtaState::Ready)
    }

    // =========================================================================
    // Routines (0x31)
    // =========================================================================

    /// Run an update routine; returns the resulting state
    pub fn run_routine(&self, id: u16, args: &[u8]) -> Result<OtaState, NegativeResponseCode> {
        match id {
            routine::ERASE_MEMORY => self.erase_memory(),
            routine::INIT_OTA => self.init(args),
            routine::WRITE_TO_INSTALL_AREA => self.write_to_install_area(),
            routine::VERIFY_DATA => self.verify(),
            routine::ROLLBACK => self.rollback(),
            routine::ACTIVATE_SOFTWARE => self.activate(),
            _ => Err(NegativeResponseCode::RequestOutOfRange),
        }
    }

    fn erase_memory(&self) -> Result<OtaState, NegativeResponseCode> {
        if self.state() == Some(OtaState::Processing) {
            return Err(NegativeResponseCode::ConditionsNotCorrect);
        }

        let zeros = vec![0u8; self.config.download_area_size as usize];
        self.backing
            .write_to_address(self.config.download_area_start, &zeros)
            .map_err(|e| {
                error!(node = %self.node, error = %e, "Erase failed");
                NegativeResponseCode::GeneralProgrammingFailure
            })?;

        *self.transfer.lock() = None;
        *self.downloaded.lock() = None;
        self.set_state(OtaState::Idle)?;
        Ok(OtaState::Idle)
    }

    fn init(&self, args: &[u8]) -> Result<OtaState, NegativeResponseCode> {
        self.require(&[OtaState::Idle, OtaState::Init])?;
        let version = *args
            .first()
            .ok_or(NegativeResponseCode::IncorrectMessageLengthOrFormat)?;

        self.store
            .write(self.node.name(), did::OTA_TARGET_VERSION, &[version])
            .map_err(|_| NegativeResponseCode::RequestOutOfRange)?;
        self.set_state(OtaState::Init)?;
        info!(
            node = %self.node,
            version = format!("0x{:02X}", version),
            "OTA initialised"
        );
        Ok(OtaState::Init)
    }

    fn read_download(&self) -> Result<FirmwareImage, StepError> {
        let summary = (*self.downloaded.lock()).ok_or(StepError::Missing("no completed download"))?;
        let bytes = self
            .backing
            .read_from_address(summary.address, summary.size)?;
        Ok(FirmwareImage::parse(&bytes)?)
    }

    fn verify(&self) -> Result<OtaState, NegativeResponseCode> {
        self.require(&[OtaState::Ready])?;
        self.set_state(OtaState::Verify)?;

        let outcome = self.read_download().and_then(|image| {
            image.verify_target(self.node.address())?;
            match self.target_version() {
                Ok(expected) => image.verify_version(expected)?,
                Err(StepError::Store(StoreError::NotFound { .. })) => {
                    self.store
                        .write(self.node.name(), did::OTA_TARGET_VERSION, &[image.version])?;
                }
                Err(e) => return Err(e),
            }
            Ok(image)
        });

        match outcome {
            Ok(image) => {
                info!(
                    node = %self.node,
                    version = format!("0x{:02X}", image.version),
                    payload = image.payload.len(),
                    "Image verified"
                );
                self.set_state(OtaState::VerifyComplete)?;
                Ok(OtaState::VerifyComplete)
            }
            Err(e) => {
                warn!(node = %self.node, error = %e, "Image verification failed");
                self.set_state(OtaState::VerifyFailed)?;
                Err(NegativeResponseCode::GeneralProgrammingFailure)
            }
        }
    }

    fn write_to_install_area(&self) -> Result<OtaState, NegativeResponseCode> {
        self.require(&[OtaState::VerifyComplete])?;

        let image = self.read_download().map_err(|e| {
            error!(node = %self.node, error = %e, "Cannot read verified image");
            NegativeResponseCode::GeneralProgrammingFailure
        })?;
        if image.payload.len() as u64 > self.config.install_area_size {
            error!(node = %self.node, "Image does not fit the install area");
            return Err(NegativeResponseCode::GeneralProgrammingFailure);
        }
        self.backing
            .write_to_address(self.config.install_area_start, &image.payload)
            .map_err(|e| {
                error!(node = %self.node, error = %e, "Install write failed");
                NegativeResponseCode::GeneralProgrammingFailure
            })?;

        info!(node = %self.node, bytes = image.payload.len(), "Image installed");
        Ok(OtaState::VerifyComplete)
    }

    fn rollback(&self) -> Result<OtaState, NegativeResponseCode> {
        self.require(&[
            OtaState::ActivateInstallComplete,
            OtaState::ActivateInstallFailed,
        ])?;

        let previous = match self.store.read(self.node.name(), did::ROLLBACK_INFO) {
            Ok(info) if info.len() == 2 && info[0] == 0x01 => info[1],
            _ => {
                warn!(node = %self.node, "No rollback point available");
                return Err(NegativeResponseCode::ConditionsNotCorrect);
            }
        };

        self.backing
            .write_to_address(self.version_slot(), &[previous])
            .map_err(|e| {
                error!(node = %self.node, error = %e, "Rollback write failed");
                NegativeResponseCode::GeneralProgrammingFailure
            })?;
        self.store
            .write(self.node.name(), did::SOFTWARE_VERSION, &[previous])
            .and_then(|_| {
                self.store
                    .write(self.node.name(), did::ROLLBACK_INFO, &[0x00, previous])
            })
            .map_err(|_| NegativeResponseCode::RequestOutOfRange)?;

        info!(
            node = %self.node,
            version = format!("0x{:02X}", previous),
            "Rolled back"
        );
        self.set_state(OtaState::Idle)?;
        Ok(OtaState::Idle)
    }

    fn activate(&self) -> Result<OtaState, NegativeResponseCode> {
        self.require(&[OtaState::Ready, OtaState::VerifyComplete])?;

        let current = self.installed_version().map_err(|e| {
            error!(node = %self.node, error = %e, "Cannot read installed version");
            NegativeResponseCode::GeneralProgrammingFailure
        })?;
        self.store
            .write(self.node.name(), did::ROLLBACK_INFO, &[0x01, current])
            .map_err(|_| NegativeResponseCode::RequestOutOfRange)?;
        self.set_state(OtaState::Activate)?;

        self.check_sw_version()?;
        Ok(self.state().unwrap_or(OtaState::Activate))
    }

    // =========================================================================
    // Version check
    // =========================================================================

    /// Commit the pending version if the node is activating
    ///
    /// Runs at activation and at peripheral startup.
    pub fn check_sw_version(&self) -> Result<VersionCheck, NegativeResponseCode> {
        if self.state() != Some(OtaState::Activate) {
            return Ok(VersionCheck::NotActivating);
        }

        match self.install_version() {
            Ok(check) => Ok(check),
            Err(e) => {
                error!(node = %self.node, error = %e, "Software version check failed");
                self.set_state(OtaState::ActivateInstallFailed)?;
                Err(NegativeResponseCode::GeneralProgrammingFailure)
            }
        }
    }

    fn install_version(&self) -> Result<VersionCheck, StepError> {
        let previous = self.installed_version()?;
        let current = self.target_version()?;

        if previous == current {
            debug!(node = %self.node, "Software version unchanged");
            return Ok(VersionCheck::Unchanged);
        }

        self.backing
            .write_to_address(self.version_slot(), &[current])?;
        self.store
            .write(self.node.name(), did::SOFTWARE_VERSION, &[current])?;
        self.set_state(OtaState::ActivateInstallComplete)
            .map_err(|_| StepError::Missing("state not persisted"))?;

        info!(
            node = %self.node,
            previous = format!("0x{:02X}", previous),
            current = format!("0x{:02X}", current),
            "Software version updated"
        );
        Ok(VersionCheck::Updated { previous, current })
    }
}
