//! ecunet-sim - runs the simulated vehicle network in one process
//!
//! Builds the stores, seeds each node's default identifiers, starts the
//! coordinator and its peripherals on an in-process bus, and drives the
//! network from a console acting as the external API actor.

pub mod client;
pub mod config;
pub mod console;
pub mod network;
pub mod reset;

pub use client::{ApiClient, ClientError};
pub use config::{NodeSpec, SimConfig, SimConfigError};
pub use console::Console;
pub use network::{Network, NetworkError};
pub use reset::NodeRestart;
