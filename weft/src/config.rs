//! Node configuration.
use std::io;
use std::net;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use serde_json as json;
use thiserror::Error;

use crate::peer::{NodeName, PeerInfo, TrustDomain};

/// Hold time proposed to peers, in seconds.
pub const DEFAULT_HOLD_TIME: u64 = 180;
/// Smallest non-zero hold time we accept from configuration.
pub const MIN_HOLD_TIME: u64 = 3;
/// How often the service clock ticks, in milliseconds.
pub const DEFAULT_KEEPALIVE_TICK: u64 = 1000;
/// Default peer listen port.
pub const DEFAULT_PEER_PORT: u16 = 8441;
/// Default xDS listen port.
pub const DEFAULT_XDS_PORT: u16 = 8442;

#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse configuration: {0}")]
    Json(#[from] json::Error),
    #[error("invalid port entry: start {0} exceeds end {1}")]
    InvalidPortRange(u16, u16),
    #[error("invalid port entry: port 0 is not usable")]
    PortZero,
    #[error("invalid port entry `{0}`")]
    InvalidPortEntry(String),
    #[error("hold time {0} is below the minimum of {MIN_HOLD_TIME} seconds")]
    HoldTimeTooSmall(u64),
}

/// A data-plane listener port, or an inclusive range of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortEntry {
    /// A single port.
    Single(u16),
    /// An inclusive `[start, end]` range.
    Range(u16, u16),
}

impl PortEntry {
    /// Canonical inclusive bounds.
    pub fn bounds(&self) -> (u16, u16) {
        match *self {
            Self::Single(port) => (port, port),
            Self::Range(start, end) => (start, end),
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        let (start, end) = self.bounds();
        port >= start && port <= end
    }

    /// Ports covered, ascending.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        let (start, end) = self.bounds();
        start..=end
    }

    pub fn validate(&self) -> Result<(), Error> {
        let (start, end) = self.bounds();

        if start == 0 {
            return Err(Error::PortZero);
        }
        if start > end {
            return Err(Error::InvalidPortRange(start, end));
        }
        Ok(())
    }
}

/// Node configuration. Loaded from a JSON file at startup; there is no other
/// persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// This node's name. Inserted into the path of every route we advertise.
    pub node_name: NodeName,
    /// Trust domains we belong to. Never empty.
    pub domains: NonEmpty<TrustDomain>,
    /// Hold time proposed at OPEN, in seconds. Zero disables hold-timer
    /// expiry and keepalives entirely.
    #[serde(default = "defaults::hold_time", rename = "holdTimeSec")]
    pub hold_time: u64,
    /// Ports available for data-plane listeners.
    pub port_range: NonEmpty<PortEntry>,
    /// Addresses to accept peer connections on.
    #[serde(default)]
    pub listen: Vec<net::SocketAddr>,
    /// Address the xDS server binds to.
    #[serde(default = "defaults::xds_bind_address")]
    pub xds_bind_address: net::IpAddr,
    /// Port the xDS server binds to.
    #[serde(default = "defaults::xds_port")]
    pub xds_port: u16,
    /// Address data-plane listeners bind to, as programmed into snapshots.
    #[serde(default = "defaults::listener_bind")]
    pub listener_bind: net::IpAddr,
    /// Service clock tick period, in milliseconds.
    #[serde(default = "defaults::keepalive_tick", rename = "keepaliveTickMs")]
    pub keepalive_tick: u64,
    /// Peers configured statically. These are created at startup as if added
    /// over the control socket.
    #[serde(default)]
    pub peers: Vec<PeerInfo>,
}

mod defaults {
    use std::net;

    pub fn hold_time() -> u64 {
        super::DEFAULT_HOLD_TIME
    }

    pub fn xds_bind_address() -> net::IpAddr {
        net::Ipv4Addr::LOCALHOST.into()
    }

    pub fn xds_port() -> u16 {
        super::DEFAULT_XDS_PORT
    }

    pub fn listener_bind() -> net::IpAddr {
        net::Ipv4Addr::UNSPECIFIED.into()
    }

    pub fn keepalive_tick() -> u64 {
        super::DEFAULT_KEEPALIVE_TICK
    }
}

impl Config {
    /// Load a configuration from a JSON file and validate it.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        let config: Self = json::from_reader(io::BufReader::new(file))?;

        config.validate()?;

        Ok(config)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        if self.hold_time != 0 && self.hold_time < MIN_HOLD_TIME {
            return Err(Error::HoldTimeTooSmall(self.hold_time));
        }
        for entry in self.port_range.iter() {
            entry.validate()?;
        }
        Ok(())
    }

    /// Socket address of the xDS server.
    pub fn xds_addr(&self) -> net::SocketAddr {
        net::SocketAddr::new(self.xds_bind_address, self.xds_port)
    }
}

/// Default location of the control socket, relative to the runtime
/// directory.
pub fn socket_path(base: &Path) -> PathBuf {
    base.join("weft.sock")
}

/// Parse a `PortEntry` from command-line notation: either `N` or `N-M`.
impl FromStr for PortEntry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidPortEntry(s.to_owned());

        let entry = if let Some((start, end)) = s.split_once('-') {
            let start = start.trim().parse::<u16>().map_err(|_| invalid())?;
            let end = end.trim().parse::<u16>().map_err(|_| invalid())?;

            Self::Range(start, end)
        } else {
            Self::Single(s.trim().parse::<u16>().map_err(|_| invalid())?)
        };
        entry.validate()?;

        Ok(entry)
    }
}
