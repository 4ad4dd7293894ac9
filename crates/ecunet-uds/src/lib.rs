//! ecunet-uds - UDS protocol engine for a simulated vehicle diagnostic network
//!
//! One coordinator (MCU, 0x10) and four peripherals (Battery, Engine, Doors,
//! HVAC) share a bus. The external API actor (0xFA) talks only to the
//! coordinator, which serves its own requests and forwards the rest.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Node                                │
//! │                                                              │
//! │  readers ──> FrameQueue ──> egress ──> Dispatcher            │
//! │                                          │                   │
//! │              ┌───────────────────────────┼──────────────┐    │
//! │              │            ServiceContext │              │    │
//! │              │  ┌──────────┐ ┌──────────┐ ┌───────────┐ │    │
//! │              │  │ Session  │ │ Security │ │ Timing    │ │    │
//! │              │  │ Manager  │ │ Access   │ │ Supervisor│ │    │
//! │              │  └──────────┘ └──────────┘ └───────────┘ │    │
//! │              │  ┌──────────┐ ┌──────────┐ ┌───────────┐ │    │
//! │              │  │ OTA      │ │DataStore │ │ Backing   │ │    │
//! │              │  │ Machine  │ │          │ │ Store     │ │    │
//! │              │  └──────────┘ └──────────┘ └───────────┘ │    │
//! │              └──────────────────────────────────────────┘    │
//! │                                          │                   │
//! │                                       Outbox                 │
//! │                                          │                   │
//! │                                  BusChannel (bus / api)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod address;
pub mod config;
pub mod dispatch;
pub mod dtc;
pub mod error;
pub mod frame;
pub mod liveness;
pub mod node;
pub mod ota;
pub mod queue;
pub mod security;
pub mod services;
pub mod session;
pub mod store;
pub mod timing;
pub mod transport;
pub mod uds;

pub use address::{NodeAddress, NodeId};
pub use config::{ConfigError, NodeConfig};
pub use dispatch::Dispatcher;
pub use error::NodeError;
pub use frame::{CanFrame, Frame, FrameError};
pub use node::Node;
pub use ota::{OtaMachine, OtaState};
pub use services::{LoggingReset, ResetKind, ResetStrategy, ServiceContext};
pub use session::{DiagnosticSession, SessionError, SessionManager};
pub use store::{BackingStore, DataStore, FileBackingStore, FileStore, MemoryBackingStore, MemoryStore, StoreError};
pub use transport::{BusChannel, Outbox, TransportError, VirtualBus};
pub use uds::NegativeResponseCode;
