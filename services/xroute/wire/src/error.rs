//! Control message validation errors.

use thiserror::Error;

/// Reasons a decoded control message is rejected as malformed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// A required identifier is empty
    #[error("empty {0} identifier")]
    EmptyId(&'static str),

    /// Sequence number outside [0, max_seqnum)
    #[error("sequence number {seq} out of range (max {max})")]
    SequenceOutOfRange {
        /// Offending sequence number
        seq: u32,
        /// Exclusive upper bound
        max: u32,
    },

    /// LSA lists its own originator as a neighbor
    #[error("originator {0} advertises itself as a neighbor")]
    SelfLoop(String),

    /// Weighted path with zero weight
    #[error("zero weight for {0}")]
    ZeroWeight(String),

    /// Service path using the index reserved for host and router routes
    #[error("service {0} uses the primary path index")]
    PrimaryPathIndex(String),

    /// Same path index listed twice in one group
    #[error("duplicate path index {index} for {destination}")]
    DuplicatePathIndex {
        /// Destination of the group
        destination: String,
        /// Repeated index
        index: u32,
    },
}
