//! Protocol messages exchanged between peered nodes.
use std::fmt;

use weft::peer::{NodeName, TrustDomain};
use weft::route::{NodePath, Route};

use crate::wire;
use crate::PROTOCOL_VERSION;

/// An optional capability advertised at OPEN time. Unknown tags are ignored
/// by the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub tag: u16,
    pub data: Vec<u8>,
}

impl Capability {
    /// Capability carrying the peering protocol version.
    pub const VERSION: u16 = 0;

    /// The protocol version capability we advertise.
    pub fn version() -> Self {
        Self {
            tag: Self::VERSION,
            data: wire::serialize(&PROTOCOL_VERSION),
        }
    }

    /// Decode this capability as a protocol version, if it is one.
    pub fn as_version(&self) -> Option<u32> {
        if self.tag != Self::VERSION {
            return None;
        }
        wire::deserialize(&self.data).ok()
    }
}

/// Session handshake message. The first message on every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Open {
    /// The sender's node name.
    pub node: NodeName,
    /// Trust domains the sender belongs to.
    pub domains: Vec<TrustDomain>,
    /// Proposed hold time in seconds. Zero disables expiry and keepalives.
    pub hold_time: u16,
    /// Shared credential, when the receiving peer requires one.
    pub token: Option<String>,
    /// Optional capabilities.
    pub capabilities: Vec<Capability>,
}

impl Open {
    /// The protocol version advertised, if any.
    pub fn version(&self) -> Option<u32> {
        self.capabilities.iter().find_map(Capability::as_version)
    }
}

/// A single route advertisement or withdrawal inside an UPDATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteUpdate {
    /// Advertise a route, with the node path it traversed.
    Add { route: Route, node_path: NodePath },
    /// Withdraw a route by name.
    Remove { name: String },
}

impl RouteUpdate {
    /// Name of the route this update concerns.
    pub fn name(&self) -> &str {
        match self {
            Self::Add { route, .. } => route.name.as_str(),
            Self::Remove { name } => name.as_str(),
        }
    }
}

/// Route table delta, carrying one or more advertisements and withdrawals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Update {
    pub updates: Vec<RouteUpdate>,
}

/// Session teardown message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Close {
    pub reason: Option<String>,
}

/// Message payload.
/// These are the messages peers send to each other.
#[derive(Clone, PartialEq, Eq)]
pub enum Message {
    /// Session handshake.
    Open(Open),
    /// Route table delta.
    Update(Update),
    /// Session heartbeat.
    Keepalive,
    /// Session teardown.
    Close(Close),
}

impl Message {
    /// Build the OPEN message for this node.
    pub fn open(
        node: NodeName,
        domains: impl IntoIterator<Item = TrustDomain>,
        hold_time: u16,
        token: Option<String>,
    ) -> Self {
        Self::Open(Open {
            node,
            domains: domains.into_iter().collect(),
            hold_time,
            token,
            capabilities: vec![Capability::version()],
        })
    }

    /// Build an UPDATE carrying the given entries.
    pub fn update(updates: impl IntoIterator<Item = RouteUpdate>) -> Self {
        Self::Update(Update {
            updates: updates.into_iter().collect(),
        })
    }

    /// Build a CLOSE with the given reason.
    pub fn close(reason: impl ToString) -> Self {
        Self::Close(Close {
            reason: Some(reason.to_string()),
        })
    }
}

impl From<Open> for Message {
    fn from(open: Open) -> Self {
        Self::Open(open)
    }
}

impl From<Update> for Message {
    fn from(update: Update) -> Self {
        Self::Update(update)
    }
}

impl From<Close> for Message {
    fn from(close: Close) -> Self {
        Self::Close(close)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(Open {
                node, hold_time, ..
            }) => write!(f, "Open({node}, hold={hold_time})"),
            Self::Update(Update { updates }) => {
                write!(f, "Update(")?;
                for (ix, update) in updates.iter().enumerate() {
                    if ix > 0 {
                        write!(f, ", ")?;
                    }
                    match update {
                        RouteUpdate::Add { route, node_path } => {
                            write!(f, "+{} [{node_path}]", route.name)?
                        }
                        RouteUpdate::Remove { name } => write!(f, "-{name}")?,
                    }
                }
                write!(f, ")")
            }
            Self::Keepalive => write!(f, "Keepalive"),
            Self::Close(Close { reason }) => match reason {
                Some(reason) => write!(f, "Close({reason})"),
                None => write!(f, "Close"),
            },
        }
    }
}
