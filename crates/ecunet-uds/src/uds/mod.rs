//! UDS protocol constants and response helpers

mod nrc;

pub use nrc::NegativeResponseCode;

/// Service IDs understood on the network
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const CLEAR_DIAGNOSTIC_INFORMATION: u8 = 0x14;
    pub const READ_DTC_INFORMATION: u8 = 0x19;
    pub const READ_DATA_BY_IDENTIFIER: u8 = 0x22;
    pub const READ_MEMORY_BY_ADDRESS: u8 = 0x23;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const WRITE_DATA_BY_IDENTIFIER: u8 = 0x2E;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const REQUEST_UPDATE_STATUS: u8 = 0x32;
    pub const REQUEST_DOWNLOAD: u8 = 0x34;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const REQUEST_TRANSFER_EXIT: u8 = 0x37;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const ACCESS_TIMING_PARAMETER: u8 = 0x83;

    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
    pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
}

/// Single-byte control frames exchanged between nodes
pub mod control {
    /// Peripheral announces it is alive
    pub const UP_NOTIFICATION: u8 = 0xD9;
    /// Coordinator asks a peripheral (or the API asks the coordinator) for status
    pub const LIVENESS_PROBE: u8 = 0x99;
    pub const SECURITY_UNLOCKED: u8 = 0xCE;
    pub const SECURITY_LOCKED: u8 = 0xCF;

    pub fn is_control(sid: u8) -> bool {
        matches!(
            sid,
            UP_NOTIFICATION | LIVENESS_PROBE | SECURITY_UNLOCKED | SECURITY_LOCKED
        )
    }
}

/// Diagnostic session sub-functions (0x10)
pub mod session_type {
    pub const DEFAULT: u8 = 0x01;
    pub const PROGRAMMING: u8 = 0x02;
    pub const EXTENDED: u8 = 0x03;
}

/// ECU reset sub-functions (0x11)
pub mod reset_type {
    pub const HARD_RESET: u8 = 0x01;
    pub const KEY_OFF_ON_RESET: u8 = 0x02;
}

/// Security access sub-functions (0x27)
pub mod security_level {
    pub const REQUEST_SEED: u8 = 0x01;
    pub const SEND_KEY: u8 = 0x02;
}

/// DTC report sub-functions (0x19)
pub mod dtc_report {
    pub const NUMBER_BY_STATUS_MASK: u8 = 0x01;
    pub const BY_STATUS_MASK: u8 = 0x02;
    /// DTC format identifier reported with a count
    pub const FORMAT_ISO14229: u8 = 0x01;
}

/// Access timing parameter sub-functions (0x83)
pub mod timing_parameter {
    pub const READ_EXTENDED: u8 = 0x01;
    pub const SET_TO_DEFAULT: u8 = 0x02;
    pub const READ_ACTIVE: u8 = 0x03;
    pub const SET_GIVEN: u8 = 0x04;
}

/// Tester present sub-function bits (0x3E)
pub mod tester_present {
    pub const ZERO_SUB_FUNCTION: u8 = 0x00;
    pub const SUPPRESS_POSITIVE_RESPONSE: u8 = 0x80;
}

/// Routine control sub-functions and routine identifiers (0x31)
pub mod routine {
    pub const START: u8 = 0x01;

    pub const ERASE_MEMORY: u16 = 0x0101;
    pub const INIT_OTA: u16 = 0x0201;
    pub const WRITE_TO_INSTALL_AREA: u16 = 0x0301;
    pub const VERIFY_DATA: u16 = 0x0401;
    pub const ROLLBACK: u16 = 0x0501;
    pub const ACTIVATE_SOFTWARE: u16 = 0x0601;
}

/// Well-known data identifiers
pub mod did {
    pub const VIN: u16 = 0xF190;
    pub const SOFTWARE_VERSION: u16 = 0xF1A2;
    /// Persisted OTA state
    pub const OTA_UPDATE_STATUS: u16 = 0x01E0;
    /// Version the pending update installs
    pub const OTA_TARGET_VERSION: u16 = 0x01E1;
    /// `[available, previous_version]`
    pub const ROLLBACK_INFO: u16 = 0xEEEE;
}

/// Response time budget a service is supervised against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingClass {
    /// Regular P2 budget
    P2,
    /// Extended P2* budget for long-running services
    P2Star,
    /// Not supervised
    Untimed,
}

impl TimingClass {
    /// Default class for a SID
    pub fn for_sid(sid: u8) -> Self {
        use service_id::*;
        match sid {
            DIAGNOSTIC_SESSION_CONTROL
            | ECU_RESET
            | CLEAR_DIAGNOSTIC_INFORMATION
            | READ_DTC_INFORMATION
            | READ_DATA_BY_IDENTIFIER
            | READ_MEMORY_BY_ADDRESS
            | WRITE_DATA_BY_IDENTIFIER
            | REQUEST_UPDATE_STATUS
            | TESTER_PRESENT
            | ACCESS_TIMING_PARAMETER => TimingClass::P2,
            SECURITY_ACCESS | ROUTINE_CONTROL | REQUEST_DOWNLOAD | TRANSFER_DATA
            | REQUEST_TRANSFER_EXIT => TimingClass::P2Star,
            _ => TimingClass::Untimed,
        }
    }
}

/// Build a positive response: SID + 0x40 followed by `data`
pub fn positive_response(sid: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + data.len());
    response.push(sid.wrapping_add(service_id::POSITIVE_RESPONSE_OFFSET));
    response.extend_from_slice(data);
    response
}

/// Build a negative response: 0x7F, SID, NRC
pub fn negative_response(sid: u8, nrc: NegativeResponseCode) -> Vec<u8> {
    vec![service_id::NEGATIVE_RESPONSE, sid, nrc.into()]
}

/// Split a big-endian integer field of `len` bytes off the front of `data`
pub fn read_be(data: &[u8], len: usize) -> Option<(u64, &[u8])> {
    if len == 0 || len > 8 || data.len() < len {
        return None;
    }
    let value = data[..len]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);
    Some((value, &data[len..]))
}
