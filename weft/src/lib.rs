//! The weft standard library.
//!
//! This crate holds the data model and local interfaces shared between the
//! weft node daemon and anything that talks to it: routes and their learned
//! counterparts, peer identities and trust domains, node configuration, and
//! the control-socket command protocol with its client.
pub mod config;
#[cfg(feature = "logger")]
pub mod logger;
pub mod node;
pub mod peer;
pub mod route;
#[cfg(any(test, feature = "test"))]
pub mod test;

pub use localtime::{LocalDuration, LocalTime};

/// Milliseconds since the UNIX epoch.
pub type Timestamp = u64;

pub mod prelude {
    //! Common types, re-exported.
    pub use crate::config::{Config, PortEntry};
    pub use crate::node::{ConnectionStatus, Event, PeerRecord, RouteList};
    pub use crate::peer::{Address, HostName, NodeName, PeerInfo, TrustDomain};
    pub use crate::route::{Endpoint, NodePath, Protocol, Route, RouteEntry};
    pub use crate::{LocalDuration, LocalTime, Timestamp};
}
