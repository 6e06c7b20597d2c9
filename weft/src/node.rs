//! Node control interface.
//!
//! Defines the JSON line protocol spoken over the node's control socket, the
//! [`Handle`] trait abstracting a running node, and [`Node`], the Unix-socket
//! client implementing it.
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::{fmt, io};

use crossbeam_channel as chan;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json as json;
use thiserror::Error;

use crate::config::Config;
use crate::peer::{NodeName, PeerInfo};
use crate::route::{Route, RouteEntry};
use crate::Timestamp;

/// Connection state of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    /// No transport established.
    Disconnected,
    /// Dialing or handshaking.
    Connecting,
    /// Session established; routes may be exchanged.
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Runtime view of a configured peer, as reported over the control socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    /// The peer's static configuration.
    #[serde(flatten)]
    pub info: PeerInfo,
    /// Session state.
    pub connection_status: ConnectionStatus,
    /// Negotiated hold time in seconds, once connected. Zero means the
    /// session never expires and exchanges no keepalives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_time: Option<u64>,
    /// When we last received a frame from the peer, in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_received: Option<Timestamp>,
    /// When we last sent a frame to the peer, in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent: Option<Timestamp>,
    /// Next reconnect attempt, in epoch milliseconds, while disconnected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_until: Option<Timestamp>,
}

/// Routes known to the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteList {
    /// Routes published by this node.
    pub local: Vec<Route>,
    /// Routes learned from peers.
    pub internal: Vec<RouteEntry>,
}

/// Node status summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// This node's name.
    pub node_name: NodeName,
    /// When the node started, in epoch milliseconds.
    pub started_at: Timestamp,
    /// Configured peers.
    pub peers: usize,
    /// Peers currently connected.
    pub connected: usize,
    /// Local route count.
    pub local_routes: usize,
    /// Learned route count.
    pub learned_routes: usize,
    /// Version of the latest published snapshot, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_version: Option<String>,
}

/// Events published by the node, streamed to `subscribe` clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Event {
    /// A peer session reached the established state.
    #[serde(rename_all = "camelCase")]
    PeerConnected { name: NodeName },
    /// A peer session ended.
    #[serde(rename_all = "camelCase")]
    PeerDisconnected { name: NodeName, reason: String },
    /// A route was installed in the table.
    #[serde(rename_all = "camelCase")]
    RouteAdded { name: String, origin: NodeName },
    /// A route was removed from the table.
    #[serde(rename_all = "camelCase")]
    RouteRemoved { name: String, origin: NodeName },
    /// A new snapshot was published to the data plane.
    #[serde(rename_all = "camelCase")]
    SnapshotPublished { version: String },
}

/// Commands sent over the control socket, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "command")]
pub enum Command {
    /// Configure a new peer.
    #[serde(rename_all = "camelCase")]
    AddPeer { peer: PeerInfo },
    /// Remove a configured peer, closing its session.
    #[serde(rename_all = "camelCase")]
    DeletePeer { name: NodeName },
    /// List configured peers with their session state.
    ListPeers,
    /// Publish a local route.
    #[serde(rename_all = "camelCase")]
    AddRoute { route: Route },
    /// Withdraw a local route.
    #[serde(rename_all = "camelCase")]
    DeleteRoute { name: String },
    /// List local and learned routes.
    ListRoutes,
    /// Get the node's status.
    Status,
    /// Get the node's configuration.
    Config,
    /// Stream node events.
    Subscribe,
    /// Shut the node down.
    Shutdown,
}

impl Command {
    pub const SHUTDOWN: Command = Command::Shutdown;

    /// Write this command to a stream, including a terminating LF character.
    pub fn to_writer(&self, mut w: impl io::Write) -> io::Result<()> {
        json::to_writer(&mut w, self).map_err(|_| io::ErrorKind::InvalidInput)?;
        w.write_all(b"\n")
    }
}

/// Payload of a plain "it worked" response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Success {
    /// Whether something was changed.
    #[serde(default)]
    pub updated: bool,
}

/// Result of a control command, written as a single JSON line shaped
/// `{"success": true, …}` or `{"success": false, "error": …}`.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult<T> {
    /// The command succeeded, with a payload.
    Okay(T),
    /// The command failed.
    Error { error: String },
}

impl CommandResult<Success> {
    /// Create an "updated" response.
    pub fn updated(updated: bool) -> Self {
        Self::Okay(Success { updated })
    }

    /// Create an "ok" response.
    pub fn ok() -> Self {
        Self::Okay(Success::default())
    }
}

impl<T> CommandResult<T> {
    /// Create an error result.
    pub fn error(err: impl std::error::Error) -> Self {
        Self::Error {
            error: err.to_string(),
        }
    }

    /// Unwrap into a `Result`.
    pub fn result(self) -> Result<T, String> {
        match self {
            Self::Okay(value) => Ok(value),
            Self::Error { error } => Err(error),
        }
    }
}

impl<T: Serialize> CommandResult<T> {
    /// Write this result to a stream, including a terminating LF character.
    pub fn to_writer(&self, mut w: impl io::Write) -> io::Result<()> {
        json::to_writer(&mut w, self).map_err(|_| io::ErrorKind::InvalidInput)?;
        w.write_all(b"\n")
    }
}

impl<T: Serialize> Serialize for CommandResult<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error as _;

        let value = match self {
            Self::Okay(payload) => {
                let payload = json::to_value(payload).map_err(S::Error::custom)?;
                match payload {
                    json::Value::Object(mut obj) => {
                        obj.insert("success".to_owned(), json::Value::Bool(true));
                        json::Value::Object(obj)
                    }
                    other => json::json!({ "success": true, "result": other }),
                }
            }
            Self::Error { error } => json::json!({ "success": false, "error": error }),
        };
        value.serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for CommandResult<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;

        let mut value = json::Map::deserialize(deserializer)?;
        match value.remove("success") {
            Some(json::Value::Bool(true)) => {
                let payload = match value.remove("result") {
                    Some(result) if value.is_empty() => result,
                    _ => json::Value::Object(value),
                };
                let payload = json::from_value(payload).map_err(D::Error::custom)?;

                Ok(Self::Okay(payload))
            }
            Some(json::Value::Bool(false)) => {
                let error = value
                    .remove("error")
                    .and_then(|e| e.as_str().map(|s| s.to_owned()))
                    .unwrap_or_default();

                Ok(Self::Error { error })
            }
            _ => Err(D::Error::custom("missing `success` discriminant")),
        }
    }
}

/// An error resulting from a [`Handle`] or [`Node`] call.
#[derive(Error, Debug)]
pub enum Error {
    /// The node is not running, or the socket path is wrong.
    #[error("failed to connect to node control socket: {0}")]
    Connect(io::Error),
    /// An I/O error while talking to the node.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// A protocol-level decoding error.
    #[error("invalid response: {0}")]
    Json(#[from] json::Error),
    /// The connection ended before a reply arrived.
    #[error("empty response from node")]
    EmptyResponse,
    /// The node replied with an error.
    #[error("node error: {0}")]
    Node(String),
}

/// A handle on a running node. Implemented by the in-process runtime handle
/// and by the [`Node`] socket client, so tests and glue code share one
/// interface.
pub trait Handle: Clone {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether a node is listening on the other end.
    fn is_running(&self) -> bool;
    /// Configure a new peer. Returns `true` if the peer was added.
    fn add_peer(&mut self, peer: PeerInfo) -> Result<bool, Self::Error>;
    /// Remove a configured peer. Returns `true` if the peer existed.
    fn delete_peer(&mut self, name: NodeName) -> Result<bool, Self::Error>;
    /// List configured peers.
    fn peers(&self) -> Result<Vec<PeerRecord>, Self::Error>;
    /// Publish a local route. Returns `true` if the route was added.
    fn add_route(&mut self, route: Route) -> Result<bool, Self::Error>;
    /// Withdraw a local route. Returns `true` if the route existed.
    fn delete_route(&mut self, name: String) -> Result<bool, Self::Error>;
    /// List local and learned routes.
    fn routes(&self) -> Result<RouteList, Self::Error>;
    /// Get the node's status.
    fn status(&self) -> Result<Status, Self::Error>;
    /// Get the node's configuration.
    fn config(&self) -> Result<Config, Self::Error>;
    /// Subscribe to node events.
    fn subscribe(&self) -> Result<chan::Receiver<Event>, Self::Error>;
    /// Shut the node down.
    fn shutdown(self) -> Result<(), Self::Error>;
}

/// Iterator of newline-delimited JSON values read from a stream.
pub struct LineIter<T> {
    stream: BufReader<UnixStream>,
    item: PhantomData<T>,
}

impl<T: DeserializeOwned> Iterator for LineIter<T> {
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        match self.stream.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(json::from_str(line.trim_end()).map_err(Error::from)),
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Client for the node's control socket.
#[derive(Debug, Clone)]
pub struct Node {
    socket: PathBuf,
}

impl Node {
    pub fn new(socket: impl AsRef<Path>) -> Self {
        Self {
            socket: socket.as_ref().to_path_buf(),
        }
    }

    /// Send a command and return an iterator over the reply lines.
    pub fn call<T: DeserializeOwned>(&self, cmd: &Command) -> Result<LineIter<T>, Error> {
        let stream = UnixStream::connect(&self.socket).map_err(Error::Connect)?;
        cmd.to_writer(&stream)?;

        Ok(LineIter {
            stream: BufReader::new(stream),
            item: PhantomData,
        })
    }

    /// Send a command expecting a single reply line.
    fn call_one<T: DeserializeOwned>(&self, cmd: &Command) -> Result<T, Error> {
        let mut lines = self.call::<CommandResult<T>>(cmd)?;
        let reply = lines.next().ok_or(Error::EmptyResponse)??;

        reply.result().map_err(Error::Node)
    }

    /// Subscribe to node events. The iterator ends when the node shuts down.
    pub fn events(&self) -> Result<impl Iterator<Item = Result<Event, Error>>, Error> {
        self.call::<Event>(&Command::Subscribe)
    }
}

impl Handle for Node {
    type Error = Error;

    fn is_running(&self) -> bool {
        self.call_one::<Status>(&Command::Status).is_ok()
    }

    fn add_peer(&mut self, peer: PeerInfo) -> Result<bool, Error> {
        let success = self.call_one::<Success>(&Command::AddPeer { peer })?;
        Ok(success.updated)
    }

    fn delete_peer(&mut self, name: NodeName) -> Result<bool, Error> {
        let success = self.call_one::<Success>(&Command::DeletePeer { name })?;
        Ok(success.updated)
    }

    fn peers(&self) -> Result<Vec<PeerRecord>, Error> {
        self.call_one(&Command::ListPeers)
    }

    fn add_route(&mut self, route: Route) -> Result<bool, Error> {
        let success = self.call_one::<Success>(&Command::AddRoute { route })?;
        Ok(success.updated)
    }

    fn delete_route(&mut self, name: String) -> Result<bool, Error> {
        let success = self.call_one::<Success>(&Command::DeleteRoute { name })?;
        Ok(success.updated)
    }

    fn routes(&self) -> Result<RouteList, Error> {
        self.call_one(&Command::ListRoutes)
    }

    fn status(&self) -> Result<Status, Error> {
        self.call_one(&Command::Status)
    }

    fn config(&self) -> Result<Config, Error> {
        self.call_one(&Command::Config)
    }

    fn subscribe(&self) -> Result<chan::Receiver<Event>, Error> {
        let lines = self.events()?;
        let (sender, receiver) = chan::unbounded();

        // Pump the line stream into a channel, so subscribers get the same
        // interface as in-process handles.
        std::thread::spawn(move || {
            for event in lines {
                let Ok(event) = event else {
                    break;
                };
                if sender.send(event).is_err() {
                    break;
                }
            }
        });
        Ok(receiver)
    }

    fn shutdown(self) -> Result<(), Error> {
        match self.call::<CommandResult<Success>>(&Command::SHUTDOWN) {
            Ok(_) => Ok(()),
            // The node may drop the connection while shutting down.
            Err(Error::Connect(_)) | Err(Error::Io(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_json() {
        let cmd = Command::DeleteRoute {
            name: "billing".to_owned(),
        };
        assert_eq!(
            json::to_string(&cmd).unwrap(),
            r#"{"command":"deleteRoute","name":"billing"}"#
        );

        let cmd: Command = json::from_str(r#"{"command":"listPeers"}"#).unwrap();
        assert!(matches!(cmd, Command::ListPeers));
    }

    #[test]
    fn test_command_result_success() {
        let result = CommandResult::updated(true);
        assert_eq!(
            json::to_string(&result).unwrap(),
            r#"{"updated":true,"success":true}"#
        );

        let decoded: CommandResult<Success> =
            json::from_str(r#"{"success":true,"updated":true}"#).unwrap();
        assert_eq!(decoded, CommandResult::Okay(Success { updated: true }));
    }

    #[test]
    fn test_command_result_error() {
        let result = CommandResult::<Success>::Error {
            error: "route `billing` already exists".to_owned(),
        };
        let encoded = json::to_string(&result).unwrap();
        assert_eq!(
            encoded,
            r#"{"success":false,"error":"route `billing` already exists"}"#
        );

        let decoded: CommandResult<Success> = json::from_str(&encoded).unwrap();
        assert_eq!(decoded, result);
    }

    #[test]
    fn test_command_result_scalar_payload() {
        let result = CommandResult::Okay(42u32);
        let encoded = json::to_string(&result).unwrap();
        assert_eq!(encoded, r#"{"success":true,"result":42}"#);

        let decoded: CommandResult<u32> = json::from_str(&encoded).unwrap();
        assert_eq!(decoded, CommandResult::Okay(42));
    }

    #[test]
    fn test_event_json() {
        let event = Event::SnapshotPublished {
            version: "3".to_owned(),
        };
        assert_eq!(
            json::to_string(&event).unwrap(),
            r#"{"type":"snapshotPublished","version":"3"}"#
        );
    }
}
