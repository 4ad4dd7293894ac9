//! Transport layer
//!
//! Nodes talk through [`BusChannel`] implementations. The simulator and the
//! tests wire every node to one shared [`VirtualBus`], plus a second
//! `VirtualBus` carrying traffic between the coordinator and the API actor.

mod adapter;
pub mod error;
pub mod outbox;
pub mod virtual_bus;

pub use adapter::BusChannel;
pub use error::TransportError;
pub use outbox::Outbox;
pub use virtual_bus::VirtualBus;
