//! Route entries, forwarding-table contract and route synchronization for xroute.
//!
//! This crate turns the network table computed by `xroute-topology` into
//! forwarding entries, keeps administratively injected routes, and pushes the
//! minimal set of install/update/remove operations to the forwarding element.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod forwarding;
pub mod route;
pub mod statics;
pub mod sync;
pub mod table;

pub use forwarding::*;
pub use route::*;
pub use statics::*;
pub use sync::*;
pub use table::*;
