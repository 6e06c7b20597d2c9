//! Routes, upstream endpoints and node paths.
use std::str::FromStr;
use std::{fmt, slice};

use localtime::LocalTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::peer::NodeName;

/// Application protocol spoken by a route's upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Plain HTTP.
    #[serde(rename = "http")]
    Http,
    /// GraphQL over HTTP.
    #[serde(rename = "http:graphql")]
    Graphql,
    /// gRPC over HTTP/2.
    #[serde(rename = "http:grpc")]
    Grpc,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Graphql => write!(f, "http:graphql"),
            Self::Grpc => write!(f, "http:grpc"),
        }
    }
}

#[derive(Error, Debug)]
#[error("unknown protocol `{0}`")]
pub struct ProtocolParseError(String);

impl FromStr for Protocol {
    type Err = ProtocolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            "http:graphql" => Ok(Self::Graphql),
            "http:grpc" => Ok(Self::Grpc),
            other => Err(ProtocolParseError(other.to_owned())),
        }
    }
}

#[derive(Error, Debug)]
pub enum EndpointParseError {
    #[error("missing scheme in `{0}`")]
    MissingScheme(String),
    #[error("missing host in `{0}`")]
    MissingHost(String),
    #[error("no default port for scheme `{0}`")]
    MissingPort(String),
    #[error("invalid port: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Upstream target of a route, eg. `http://10.9.0.4:8080`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| EndpointParseError::MissingScheme(s.to_owned()))?;
        let rest = rest.split(['/', '?', '#']).next().unwrap_or(rest);

        let default_port = || match scheme {
            "http" | "ws" => Ok(80),
            "https" | "wss" => Ok(443),
            other => Err(EndpointParseError::MissingPort(other.to_owned())),
        };
        // Bracketed IPv6 hosts keep their brackets, so the endpoint's
        // display form parses back to itself.
        let (host, port) = if rest.starts_with('[') {
            match rest.split_once(']') {
                Some((host, remainder)) => {
                    let host = format!("{host}]");
                    match remainder.strip_prefix(':') {
                        Some(port) => (host, port.parse::<u16>()?),
                        None => (host, default_port()?),
                    }
                }
                None => return Err(EndpointParseError::MissingHost(s.to_owned())),
            }
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) if !port.is_empty() => {
                    (host.to_owned(), port.parse::<u16>()?)
                }
                _ => (rest.to_owned(), default_port()?),
            }
        };
        if host.is_empty() || host == "[]" {
            return Err(EndpointParseError::MissingHost(s.to_owned()));
        }
        Ok(Self {
            scheme: scheme.to_owned(),
            host,
            port,
        })
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// A service route, as published by its owning node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Route name, unique per node and protocol.
    pub name: String,
    /// Protocol spoken by the upstream.
    pub protocol: Protocol,
    /// Where the upstream lives.
    pub endpoint: Endpoint,
    /// Optional deployment region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Ordered list of node names a route advertisement has traversed, most
/// recent advertiser first. The path analog of a BGP AS path: used for loop
/// prevention and split-horizon filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(Vec<NodeName>);

impl NodePath {
    /// The empty path.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// A path rooted at the given node: the path a node attaches to its own
    /// routes when advertising them.
    pub fn root(node: NodeName) -> Self {
        Self(vec![node])
    }

    /// Whether the given node appears anywhere in the path.
    pub fn contains(&self, node: &NodeName) -> bool {
        self.0.contains(node)
    }

    /// The path as seen after traversing the given node: the node is
    /// prepended as the most recent advertiser.
    pub fn through(&self, node: NodeName) -> Self {
        let mut path = Vec::with_capacity(self.0.len() + 1);
        path.push(node);
        path.extend(self.0.iter().cloned());

        Self(path)
    }

    /// Most recent advertiser, if any.
    pub fn head(&self) -> Option<&NodeName> {
        self.0.first()
    }

    pub fn iter(&self) -> slice::Iter<'_, NodeName> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<NodeName>> for NodePath {
    fn from(path: Vec<NodeName>) -> Self {
        Self(path)
    }
}

impl FromIterator<NodeName> for NodePath {
    fn from_iter<T: IntoIterator<Item = NodeName>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for NodePath {
    type Item = NodeName;
    type IntoIter = std::vec::IntoIter<NodeName>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.0.iter();

        if let Some(name) = names.next() {
            write!(f, "{name}")?;
        }
        for name in names {
            write!(f, " < {name}")?;
        }
        Ok(())
    }
}

/// A route learned from the network, together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    /// The route itself.
    pub service: Route,
    /// Peer this route was learned from.
    pub origin: NodeName,
    /// Nodes the advertisement traversed. Never contains the local node.
    pub node_path: NodePath,
    /// When the route was installed.
    pub learned_at: LocalTime,
}

impl RouteEntry {
    /// Whether this entry carries the same routing information as another,
    /// ignoring when it was learned.
    pub fn same_as(&self, other: &Self) -> bool {
        self.service == other.service
            && self.origin == other.origin
            && self.node_path == other.node_path
    }
}
