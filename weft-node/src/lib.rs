#![allow(clippy::too_many_arguments)]
#![allow(clippy::collapsible_if)]
#![warn(clippy::unwrap_used)]
pub mod control;
pub mod runtime;
pub mod service;
pub mod signals;
pub mod transport;
pub mod wire;
pub mod xds;

#[cfg(any(test, feature = "test"))]
pub mod test;

pub use runtime::Runtime;
pub use weft::{config, node, peer, route};
pub use weft::{LocalDuration, LocalTime, Timestamp};

/// Version of the peering protocol, advertised as an OPEN capability.
pub const PROTOCOL_VERSION: u32 = 1;

pub mod prelude {
    //! Common types, re-exported.
    pub use crate::service::message::{Message, RouteUpdate};
    pub use crate::service::rib::{Action, CommitResult, Propagation};
    pub use crate::wire::{Decode, Encode};
    pub use weft::prelude::*;
    pub use weft::{LocalDuration, LocalTime, Timestamp};
}
