//! Control plane error types.

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Router id missing
    #[error("node id must not be empty")]
    EmptyNodeId,

    /// A period or expiry time is zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Window does not fit the sequence space
    #[error("sequence window {window} must be in (0, {max})")]
    SequenceWindow {
        /// Configured window
        window: u32,
        /// Configured sequence space
        max: u32,
    },
}

/// Control-message transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message could not be encoded or decoded
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Transport has been stopped or never started
    #[error("transport closed")]
    Closed,

    /// Call did not complete in time
    #[error("transport call timed out")]
    Timeout,

    /// Unicast to a node with no known address
    #[error("unknown peer {0}")]
    UnknownPeer(String),

    /// Flood reached only some peers
    #[error("flood failed for {failed} of {attempted} peers")]
    FloodFailed {
        /// Peers the send failed for
        failed: usize,
        /// Peers the flood was sent to
        attempted: usize,
    },
}

impl TransportError {
    /// Number of individual sends this error stands for
    pub fn failed_sends(&self) -> u64 {
        match self {
            TransportError::FloodFailed { failed, .. } => *failed as u64,
            _ => 1,
        }
    }
}

/// Errors that end a control loop
#[derive(Error, Debug)]
pub enum ControlError {
    /// Transport could not be started
    #[error("transport startup failed: {0}")]
    Startup(#[source] TransportError),

    /// Inbound message stream ended while running
    #[error("control transport exhausted")]
    TransportExhausted,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// `run` called on a loop that is not idle
    #[error("control loop already started")]
    AlreadyStarted,
}
