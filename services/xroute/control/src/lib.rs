//! Control loop, timers and control-message transport for xroute.
//!
//! A router is one [`ControlLoop`] driving the tables from `xroute-topology`
//! and pushing routes through `xroute-routing`, fed by a [`ControlTransport`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod control_loop;
pub mod error;
pub mod stats;
pub mod transport;

pub use config::RouterConfig;
pub use control_loop::{ControlLoop, LoopState};
pub use error::{ConfigError, ControlError, TransportError};
pub use stats::ControlStats;
pub use transport::{ControlTransport, Envelope, InboundMessage, Outbound, PeerConfig, UdpTransport};
