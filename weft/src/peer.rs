//! Peer identities, trust domains and network addresses.
use std::str::FromStr;
use std::{fmt, net};

use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a node name, in bytes.
pub const MAX_NODE_NAME_LENGTH: usize = 255;

#[derive(Error, Debug)]
pub enum NodeNameError {
    #[error("node name cannot be empty")]
    Empty,
    #[error("node name exceeds {MAX_NODE_NAME_LENGTH} bytes")]
    TooLong,
    #[error("invalid character `{0}` in node name")]
    InvalidCharacter(char),
    #[error("node name labels cannot be empty")]
    EmptyLabel,
}

/// A node's globally unique name, in fully-qualified domain form,
/// eg. `edge-1.fra.example.com`. Node names appear in route paths and are
/// the identity used for loop prevention.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeName(String);

impl NodeName {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for NodeName {
    type Err = NodeNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(NodeNameError::Empty);
        }
        if s.len() > MAX_NODE_NAME_LENGTH {
            return Err(NodeNameError::TooLong);
        }
        for label in s.split('.') {
            if label.is_empty() {
                return Err(NodeNameError::EmptyLabel);
            }
            if let Some(c) = label
                .chars()
                .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
            {
                return Err(NodeNameError::InvalidCharacter(c));
            }
        }
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for NodeName {
    type Error = NodeNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value)
    }
}

impl From<NodeName> for String {
    fn from(name: NodeName) -> Self {
        name.0
    }
}

impl AsRef<str> for NodeName {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum TrustDomainError {
    #[error("trust domain cannot be empty")]
    Empty,
    #[error("invalid character `{0}` in trust domain")]
    InvalidCharacter(char),
}

/// A trust domain. Two nodes federate only if their configured domain sets
/// intersect.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrustDomain(String);

impl TrustDomain {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for TrustDomain {
    type Err = TrustDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(TrustDomainError::Empty);
        }
        if let Some(c) = s
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '.' && *c != '_')
        {
            return Err(TrustDomainError::InvalidCharacter(c));
        }
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for TrustDomain {
    type Error = TrustDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value)
    }
}

impl From<TrustDomain> for String {
    fn from(domain: TrustDomain) -> Self {
        domain.0
    }
}

impl fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host part of a peer address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostName {
    /// An IP address.
    Ip(net::IpAddr),
    /// A DNS name.
    Dns(String),
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(net::IpAddr::V6(ip)) => write!(f, "[{ip}]"),
            Self::Ip(net::IpAddr::V4(ip)) => write!(f, "{ip}"),
            Self::Dns(host) => write!(f, "{host}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AddressParseError {
    #[error("missing port in address `{0}`")]
    MissingPort(String),
    #[error("invalid port: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
    #[error("invalid host name `{0}`")]
    InvalidHost(String),
}

/// Peer connect address: an IP address or DNS name, plus a TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    pub host: HostName,
    pub port: u16,
}

impl Address {
    pub fn new(host: HostName, port: u16) -> Self {
        Self { host, port }
    }

    /// Resolve to socket addresses for dialing.
    pub fn to_socket_addrs(&self) -> std::io::Result<Vec<net::SocketAddr>> {
        use std::net::ToSocketAddrs as _;

        match &self.host {
            HostName::Ip(ip) => Ok(vec![net::SocketAddr::new(*ip, self.port)]),
            HostName::Dns(host) => Ok((host.as_str(), self.port).to_socket_addrs()?.collect()),
        }
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = net::SocketAddr::from_str(s) {
            return Ok(addr.into());
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError::MissingPort(s.to_owned()))?;
        let port = port.parse()?;

        if host.is_empty()
            || host
                .chars()
                .any(|c| !c.is_ascii_alphanumeric() && c != '-' && c != '.')
        {
            return Err(AddressParseError::InvalidHost(host.to_owned()));
        }
        Ok(Self {
            host: HostName::Dns(host.to_owned()),
            port,
        })
    }
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

impl From<net::SocketAddr> for Address {
    fn from(addr: net::SocketAddr) -> Self {
        Self {
            host: HostName::Ip(addr.ip()),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A peer as configured by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// The peer's node name.
    pub name: NodeName,
    /// Address to connect to.
    pub endpoint: Address,
    /// Trust domains advertised by the peer. Never empty.
    pub domains: NonEmpty<TrustDomain>,
    /// Credential presented on outbound connect, and expected from the peer
    /// on inbound accept, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_token: Option<String>,
}

impl PeerInfo {
    /// Whether any of the given domains is shared with this peer.
    pub fn trusts<'a>(&self, domains: impl IntoIterator<Item = &'a TrustDomain>) -> bool {
        domains.into_iter().any(|d| self.domains.contains(d))
    }
}
