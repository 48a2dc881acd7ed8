//! Typed control messages and node identifiers for xroute.
//!
//! This crate defines the decoded form of every control message exchanged by
//! xroute routers: neighbor discovery Hellos, link-state advertisements, host
//! joins and administratively injected table updates. Byte-level encoding is
//! left to the transport; messages here derive `serde` so any transport can
//! pick its own format.
//!
//! ## Message kinds
//!
//! ```text
//! +----------------------+--------------------------------------------+
//! | Hello                | periodic neighbor keepalive + link cost    |
//! +----------------------+--------------------------------------------+
//! | Lsa                  | originator's neighbors and service adverts |
//! +----------------------+--------------------------------------------+
//! | HostJoin             | host attaching to this router              |
//! +----------------------+--------------------------------------------+
//! | TableUpdate          | controller-supplied single-path routes     |
//! +----------------------+--------------------------------------------+
//! | ServiceIdTableUpdate | controller-supplied weighted service paths |
//! +----------------------+--------------------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod message;
pub mod node;

pub use error::MessageError;
pub use message::{
    ControlMessage, Hello, HostJoin, LinkStateAdvertisement, NeighborInfo, ServiceAdvert,
    ServiceBinding, ServiceIdTableUpdate, ServicePath, ServiceRouteGroup, StaticRouteSpec,
    TableUpdate,
};
pub use node::{NodeId, PathIndex};
