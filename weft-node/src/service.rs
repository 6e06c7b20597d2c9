//! The node service: the single writer of the route table.
//!
//! Every input, whether a control command, an inbound peer frame, a
//! connection event or a clock tick, is funneled here, converted into a
//! route table [`Action`], planned and committed, and the commit's side
//! effects are fanned out: propagations become frames on the outbox, port
//! operations trigger a snapshot publish, expiries tear sessions down.
pub mod events;
pub mod io;
pub mod message;
pub mod ports;
pub mod rib;
pub mod session;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_channel as chan;
use localtime::LocalTime;
use log::*;
use nonempty::NonEmpty;

use weft::config::Config;
use weft::node::{Event, PeerRecord, RouteList, Status};
use weft::peer::{NodeName, PeerInfo, TrustDomain};
use weft::route::Route;

use crate::service::events::Emitter;
use crate::service::io::{Io, Outbox};
use crate::service::message::{Message, Open, RouteUpdate};
use crate::service::rib::{Action, CommitResult, PlanError, Propagation, RouteTable};
use crate::service::session::{Link, Session, State};
use crate::xds::cache::Cache;
use crate::xds::{Cluster, Listener};
use crate::PROTOCOL_VERSION;

pub use self::events::Events;
pub use self::rib::Peer;

/// How long a dial plus OPEN handshake may take before the attempt is
/// abandoned and rescheduled.
pub const HANDSHAKE_TIMEOUT: localtime::LocalDuration = localtime::LocalDuration::from_secs(10);

/// Command-related errors.
#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Commands sent to the service by the operator.
pub enum Command {
    /// Configure a new peer and start dialing it.
    AddPeer(PeerInfo, chan::Sender<Result<(), CommandError>>),
    /// Remove a configured peer, closing its session.
    DeletePeer(NodeName, chan::Sender<Result<(), CommandError>>),
    /// List configured peers with their session state.
    ListPeers(chan::Sender<Vec<PeerRecord>>),
    /// Publish a local route.
    AddRoute(Route, chan::Sender<Result<(), CommandError>>),
    /// Withdraw a local route.
    DeleteRoute(String, chan::Sender<Result<(), CommandError>>),
    /// List local and learned routes.
    ListRoutes(chan::Sender<RouteList>),
    /// Get the node's status.
    Status(chan::Sender<Status>),
    /// Get the node configuration.
    Config(chan::Sender<Config>),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddPeer(info, _) => write!(f, "AddPeer({})", info.name),
            Self::DeletePeer(name, _) => write!(f, "DeletePeer({name})"),
            Self::ListPeers(_) => write!(f, "ListPeers"),
            Self::AddRoute(route, _) => write!(f, "AddRoute({})", route.name),
            Self::DeleteRoute(name, _) => write!(f, "DeleteRoute({name})"),
            Self::ListRoutes(_) => write!(f, "ListRoutes"),
            Self::Status(_) => write!(f, "Status"),
            Self::Config(_) => write!(f, "Config"),
        }
    }
}

/// Why a session ended or was refused.
#[derive(Debug, Clone)]
pub enum DisconnectReason {
    /// Outbound dial failed.
    Dial(String),
    /// The transport failed mid-session.
    Connection(String),
    /// The peer violated the protocol.
    Session(String),
    /// The peer's send queue overflowed.
    Backpressure,
    /// The operator asked for it.
    Command,
    /// The peer sent CLOSE.
    Peer { reason: Option<String> },
    /// The hold timer expired.
    Expired,
    /// The node is shutting down.
    Shutdown,
}

impl DisconnectReason {
    /// Whether a CLOSE frame should be written before tearing the
    /// connection down. Pointless when the peer already closed on us, or
    /// when there is no connection to write to.
    pub fn notify_peer(&self) -> bool {
        !matches!(self, Self::Peer { .. } | Self::Dial(_))
    }
}

impl From<session::Error> for DisconnectReason {
    fn from(err: session::Error) -> Self {
        Self::Session(err.to_string())
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dial(err) => write!(f, "dial: {err}"),
            Self::Connection(err) => write!(f, "connection: {err}"),
            Self::Session(err) => write!(f, "session: {err}"),
            Self::Backpressure => write!(f, "backpressure"),
            Self::Command => write!(f, "command"),
            Self::Peer { reason: Some(r) } => write!(f, "peer: {r}"),
            Self::Peer { reason: None } => write!(f, "peer"),
            Self::Expired => write!(f, "hold timer expired"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// External authentication and authorization predicate, consulted once per
/// inbound session at OPEN time. Token verification and policy evaluation
/// live behind this seam.
pub trait Authorizer {
    /// Decide whether an inbound OPEN from the given configured peer is
    /// acceptable.
    fn accept(&self, peer: &PeerInfo, open: &Open) -> Result<(), session::Error>;
}

/// The built-in authorizer: shared-token equality and trust domain
/// intersection with the local domain set.
#[derive(Debug, Clone)]
pub struct DefaultAuthorizer {
    domains: NonEmpty<TrustDomain>,
}

impl DefaultAuthorizer {
    pub fn new(domains: NonEmpty<TrustDomain>) -> Self {
        Self { domains }
    }
}

impl Authorizer for DefaultAuthorizer {
    fn accept(&self, peer: &PeerInfo, open: &Open) -> Result<(), session::Error> {
        if let Some(expected) = &peer.peer_token {
            if open.token.as_ref() != Some(expected) {
                return Err(session::Error::TokenMismatch);
            }
        }
        // The advertised domains must intersect both our own domain set and
        // the set this peer was configured with.
        if !open.domains.iter().any(|d| self.domains.contains(d)) {
            return Err(session::Error::NoSharedDomain);
        }
        if !peer.trusts(open.domains.iter()) {
            return Err(session::Error::NoSharedDomain);
        }
        Ok(())
    }
}

/// Peer sessions, currently or recently connected.
#[derive(Debug, Default)]
pub struct Sessions(BTreeMap<NodeName, Session>);

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions in the established state.
    pub fn established(&self) -> impl Iterator<Item = (&NodeName, &Session)> {
        self.0.iter().filter(|(_, s)| s.is_established())
    }

    pub fn is_established(&self, name: &NodeName) -> bool {
        self.0.get(name).map(Session::is_established).unwrap_or(false)
    }
}

impl Deref for Sessions {
    type Target = BTreeMap<NodeName, Session>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Sessions {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// The node service.
pub struct Service<A> {
    /// Service configuration.
    config: Config,
    /// The routing information base.
    rib: RouteTable,
    /// Peer sessions.
    sessions: Sessions,
    /// I/O outbox.
    outbox: Outbox,
    /// Clock. Tells the time; advanced by [`Service::tick`].
    clock: LocalTime,
    /// Peer handshake predicate.
    authorizer: A,
    /// Snapshot cache feeding the discovery server.
    cache: Arc<Cache>,
    /// Publishes events to subscribers.
    emitter: Emitter<Event>,
    /// Source of entropy.
    rng: fastrand::Rng,
    /// Time the service was initialized, or `None` if it wasn't yet.
    started_at: Option<LocalTime>,
}

impl<A: Authorizer> Service<A> {
    pub fn new(
        config: Config,
        authorizer: A,
        cache: Arc<Cache>,
        emitter: Emitter<Event>,
        rng: fastrand::Rng,
    ) -> Self {
        let rib = RouteTable::new(
            config.node_name.clone(),
            config.port_range.iter().copied(),
        );

        Self {
            config,
            rib,
            sessions: Sessions::new(),
            outbox: Outbox::default(),
            clock: LocalTime::default(),
            authorizer,
            cache,
            emitter,
            rng,
            started_at: None,
        }
    }

    /// This node's name.
    pub fn node(&self) -> &NodeName {
        self.rib.node()
    }

    /// The local service time.
    pub fn local_time(&self) -> LocalTime {
        self.clock
    }

    /// The routing information base.
    pub fn rib(&self) -> &RouteTable {
        &self.rib
    }

    /// The peer sessions.
    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    /// The snapshot cache.
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Subscribe to service events.
    pub fn events(&self) -> Events {
        Events::from(self.emitter.subscribe())
    }

    /// Return the next I/O action to execute.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Io> {
        self.outbox.next()
    }

    /// Get the I/O outbox directly. Used by tests to inspect queued I/O.
    #[cfg(any(test, feature = "test"))]
    pub fn outbox(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    /// Initialize the service with the current time, creating the peers
    /// from configuration. Call this once.
    pub fn initialize(&mut self, time: LocalTime) {
        debug!(target: "service", "Init @{}", time.as_millis());

        self.clock = time;
        self.started_at = Some(time);

        for info in self.config.peers.clone() {
            let name = info.name.clone();
            if let Err(e) = self.apply(Action::PeerCreate(info)) {
                error!(target: "service", "Error creating configured peer {name}: {e}");
                continue;
            }
            self.sessions.insert(
                name.clone(),
                Session::idle(name, self.clock, self.rng.clone()),
            );
        }
        self.maintain_connections();
    }

    /// Advance the clock and drive timers: hold-timer expiry, keepalives,
    /// and reconnections.
    pub fn tick(&mut self, now: LocalTime) {
        trace!(target: "service", "Tick @{}", now.as_millis());

        if now >= self.clock {
            self.clock = now;
        }
        if let Err(e) = self.apply(Action::Tick) {
            error!(target: "service", "Error applying tick: {e}");
        }
        self.maintain_connections();
    }

    /// Handle an operator command.
    pub fn command(&mut self, cmd: Command) {
        info!(target: "service", "Received command {cmd:?}");

        match cmd {
            Command::AddPeer(info, resp) => {
                let name = info.name.clone();
                let result = self.apply(Action::PeerCreate(info)).map(|_| ());

                if result.is_ok() {
                    self.sessions.insert(
                        name.clone(),
                        Session::idle(name, self.clock, self.rng.clone()),
                    );
                    self.maintain_connections();
                }
                resp.send(result.map_err(CommandError::from)).ok();
            }
            Command::DeletePeer(name, resp) => {
                let result = self.apply(Action::PeerDelete(name.clone())).map(|_| ());

                if result.is_ok() {
                    if self.sessions.remove(&name).is_some() {
                        self.outbox.disconnect(name.clone(), DisconnectReason::Command);
                    }
                }
                resp.send(result.map_err(CommandError::from)).ok();
            }
            Command::ListPeers(resp) => {
                resp.send(self.peer_records()).ok();
            }
            Command::AddRoute(route, resp) => {
                let result = self.apply(Action::RouteCreate(route)).map(|_| ());
                resp.send(result.map_err(CommandError::from)).ok();
            }
            Command::DeleteRoute(name, resp) => {
                let result = self.apply(Action::RouteDelete(name)).map(|_| ());
                resp.send(result.map_err(CommandError::from)).ok();
            }
            Command::ListRoutes(resp) => {
                resp.send(RouteList {
                    local: self.rib.local().cloned().collect(),
                    internal: self.rib.learned().cloned().collect(),
                })
                .ok();
            }
            Command::Status(resp) => {
                resp.send(self.status()).ok();
            }
            Command::Config(resp) => {
                resp.send(self.config.clone()).ok();
            }
        }
    }

    /// Whether an outbound dial for the given peer is pending. A dial that
    /// completes after the session moved on, eg. because a competing
    /// inbound connection won, must be dropped by the caller.
    pub fn is_dialing(&self, name: &NodeName) -> bool {
        matches!(
            self.sessions.get(name).map(|s| &s.state),
            Some(State::Connecting { .. })
        )
    }

    /// An outbound dial succeeded and the transport is registered: send our
    /// OPEN.
    pub fn connected(&mut self, remote: NodeName, link: Link) {
        info!(target: "service", "Connected to {remote} ({link:?})");

        debug_assert!(link.is_outbound());

        let Some(session) = self.sessions.get_mut(&remote) else {
            // The peer was deleted while the dial was in flight.
            self.outbox
                .disconnect(remote, DisconnectReason::Command);
            return;
        };
        let token = self
            .rib
            .peer(&remote)
            .and_then(|p| p.info.peer_token.clone());
        let hold_time = self.config.hold_time.min(u16::MAX as u64) as u16;

        self.outbox.write(
            &remote,
            Message::open(
                self.config.node_name.clone(),
                self.config.domains.clone(),
                hold_time,
                token,
            ),
        );
        session.to_open_sent(self.clock);
    }

    /// Validate an inbound OPEN. Called before the connection is registered;
    /// does not mutate state. Returns the negotiated hold time.
    pub fn accept(&self, open: &Open) -> Result<u64, session::Error> {
        if open.node == self.config.node_name {
            return Err(session::Error::SelfConnection);
        }
        let Some(peer) = self.rib.peer(&open.node) else {
            return Err(session::Error::Unauthorized(format!(
                "unknown peer `{}`",
                open.node
            )));
        };
        if let Some(version) = open.version() {
            if version != PROTOCOL_VERSION {
                return Err(session::Error::WrongVersion(version));
            }
        }
        self.authorizer.accept(&peer.info, open)?;

        match self.sessions.get(&open.node).map(|s| &s.state) {
            Some(State::Established { .. }) => {
                // Already connected; the existing session wins.
                return Err(session::Error::Collision);
            }
            Some(State::Connecting { .. } | State::OpenSent { .. }) => {
                // Simultaneous dial. Exactly one side yields: the one with
                // the lexicographically smaller name keeps its outbound
                // connection.
                if open.node < self.config.node_name {
                    return Err(session::Error::Collision);
                }
            }
            _ => {}
        }
        Ok(negotiate_hold(self.config.hold_time, open.hold_time))
    }

    /// An inbound OPEN passed [`Service::accept`] and its transport is
    /// registered: answer with our OPEN and a confirming KEEPALIVE.
    pub fn accepted(&mut self, open: Open, hold_time: u64) {
        let remote = open.node.clone();

        info!(target: "service", "Accepted inbound session from {remote}");

        let token = self
            .rib
            .peer(&remote)
            .and_then(|p| p.info.peer_token.clone());
        let proposed = self.config.hold_time.min(u16::MAX as u64) as u16;

        self.sessions.insert(
            remote.clone(),
            Session::inbound(remote.clone(), hold_time, self.clock, self.rng.clone()),
        );
        self.outbox.write_all(
            &remote,
            [
                Message::open(
                    self.config.node_name.clone(),
                    self.config.domains.clone(),
                    proposed,
                    token,
                ),
                Message::Keepalive,
            ],
        );
    }

    /// A session's transport went away, or we tore it down.
    pub fn disconnected(&mut self, remote: &NodeName, reason: &DisconnectReason) {
        let since = self.clock;
        let Some(session) = self.sessions.get_mut(remote) else {
            trace!(target: "service", "Disconnection from unknown session {remote} ({reason})");
            return;
        };
        if session.is_disconnected() {
            // We sometimes disconnect eagerly, so a second disconnection
            // event for the same transport is not unusual.
            trace!(target: "service", "Redundant disconnection for {remote} ({reason})");
            return;
        }
        info!(target: "service", "Disconnected from {remote} ({reason})");

        let was_established = session.is_established();
        session.to_disconnected(since);

        if let Err(e) = self.apply(Action::ProtocolClose {
            peer: remote.clone(),
        }) {
            error!(target: "service", "Error closing peer {remote}: {e}");
        }
        if was_established {
            self.emitter.emit(Event::PeerDisconnected {
                name: remote.clone(),
                reason: reason.to_string(),
            });
        }
    }

    /// Handle a decoded frame from an established or handshaking session.
    pub fn received_message(&mut self, remote: &NodeName, message: Message) {
        if let Err(err) = self.handle_message(remote, message) {
            // Stop processing messages from this peer.
            self.outbox
                .disconnect(remote.clone(), DisconnectReason::from(err));
        }
    }

    fn handle_message(
        &mut self,
        remote: &NodeName,
        message: Message,
    ) -> Result<(), session::Error> {
        let Some(session) = self.sessions.get_mut(remote) else {
            debug!(target: "service", "Dropping message from unknown session {remote}");
            return Ok(());
        };

        /// What remains to be done once the session borrow is released.
        enum Followup {
            Establish { hold_time: u64 },
            Apply(Action),
            Nothing,
        }

        let state = session.state.clone();
        let followup = match (message, state) {
            // The dialer's OPEN was answered.
            (Message::Open(open), State::OpenSent { .. }) => {
                if open.node != *remote {
                    return Err(session::Error::WrongPeer {
                        expected: remote.clone(),
                        actual: open.node,
                    });
                }
                if let Some(version) = open.version() {
                    if version != PROTOCOL_VERSION {
                        return Err(session::Error::WrongVersion(version));
                    }
                }
                let Some(peer) = self.rib.peer(remote) else {
                    return Err(session::Error::Unauthorized(format!(
                        "unknown peer `{remote}`"
                    )));
                };
                self.authorizer.accept(&peer.info, &open)?;

                let hold_time = negotiate_hold(self.config.hold_time, open.hold_time);

                session.to_established(self.clock);
                // Confirm before any route traffic, so the peer leaves its
                // handshake state on the right frame.
                self.outbox.write(remote, Message::Keepalive);

                Followup::Establish { hold_time }
            }
            // The acceptor's OPEN was confirmed.
            (Message::Keepalive, State::OpenConfirm { hold_time, .. }) => {
                session.to_established(self.clock);

                Followup::Establish { hold_time }
            }
            (Message::Keepalive, State::Established { .. }) => {
                Followup::Apply(Action::ProtocolKeepalive {
                    peer: remote.clone(),
                })
            }
            (Message::Update(update), State::Established { .. }) => {
                Followup::Apply(Action::ProtocolUpdate {
                    peer: remote.clone(),
                    updates: update.updates,
                })
            }
            (Message::Close(close), _) => {
                self.outbox.disconnect(
                    remote.clone(),
                    DisconnectReason::Peer {
                        reason: close.reason,
                    },
                );
                Followup::Nothing
            }
            (message, state) => {
                debug!(
                    target: "service",
                    "Unexpected {message:?} from {remote} in state {state:?}"
                );
                return Err(session::Error::Misbehavior);
            }
        };
        match followup {
            Followup::Establish { hold_time } => {
                self.establish(remote.clone(), hold_time);
            }
            Followup::Apply(action) => {
                if let Err(e) = self.apply(action) {
                    error!(target: "service", "Error applying message from {remote}: {e}");
                }
            }
            Followup::Nothing => {}
        }
        Ok(())
    }

    /// Tear all sessions down for shutdown.
    pub fn shutdown(&mut self) {
        let names: Vec<NodeName> = self
            .sessions
            .iter()
            .filter(|(_, s)| !s.is_disconnected())
            .map(|(name, _)| name.clone())
            .collect();

        for name in names {
            self.outbox
                .disconnect(name.clone(), DisconnectReason::Shutdown);
            self.disconnected(&name, &DisconnectReason::Shutdown);
        }
    }

    /// A session reached the established state.
    fn establish(&mut self, remote: NodeName, hold_time: u64) {
        match self.apply(Action::ProtocolOpen {
            peer: remote.clone(),
            hold_time,
        }) {
            Ok(_) => {
                self.emitter.emit(Event::PeerConnected {
                    name: remote.clone(),
                });
                debug!(
                    target: "service",
                    "Session with {remote} established (hold={hold_time})"
                );
            }
            Err(e) => {
                error!(target: "service", "Error opening peer {remote}: {e}");
            }
        }
    }

    /// Plan and commit an action, fanning its side effects out.
    fn apply(&mut self, action: Action) -> Result<CommitResult, PlanError> {
        let plan = self.rib.plan(action, self.clock)?;
        let result = self.rib.commit(plan);

        // All of one commit's frames for a given peer are enqueued before
        // any frames from a later commit.
        for propagation in &result.propagations {
            match propagation {
                Propagation::Update { peer, updates } => {
                    self.outbox.write(peer, Message::update(updates.clone()));
                }
                Propagation::Withdraw { peer, routes } => {
                    self.outbox.write(
                        peer,
                        Message::update(
                            routes
                                .iter()
                                .map(|name| RouteUpdate::Remove { name: name.clone() }),
                        ),
                    );
                }
                Propagation::Keepalive { peer } => {
                    self.outbox.write(peer, Message::Keepalive);
                }
            }
        }
        for (name, origin) in &result.routes_added {
            self.emitter.emit(Event::RouteAdded {
                name: name.clone(),
                origin: origin.clone(),
            });
        }
        for (name, origin) in &result.routes_removed {
            self.emitter.emit(Event::RouteRemoved {
                name: name.clone(),
                origin: origin.clone(),
            });
        }
        for peer in &result.expired {
            warn!(target: "service", "Peer {peer} timed out");

            if let Some(session) = self.sessions.get_mut(peer) {
                session.to_disconnected(self.clock);
            }
            self.outbox
                .disconnect(peer.clone(), DisconnectReason::Expired);
            self.emitter.emit(Event::PeerDisconnected {
                name: peer.clone(),
                reason: DisconnectReason::Expired.to_string(),
            });
        }
        if !result.port_ops.is_empty() {
            self.publish_snapshot();
        }
        Ok(result)
    }

    /// Build a snapshot from the current table and publish it.
    fn publish_snapshot(&mut self) {
        let mut clusters = Vec::new();
        let mut listeners = Vec::new();

        for (route, port) in self.rib.routes() {
            let Some(port) = port else {
                continue;
            };
            clusters.push(Cluster {
                name: route.name.clone(),
                address: route.endpoint.host.clone(),
                port: route.endpoint.port,
            });
            listeners.push(Listener {
                name: route.name.clone(),
                bind_address: self.config.listener_bind,
                port,
                upstream_cluster: route.name.clone(),
            });
        }
        let snapshot = self.cache.publish(clusters, listeners);

        debug!(
            target: "service",
            "Published snapshot version {} ({} listeners)",
            snapshot.version,
            snapshot.listeners.len()
        );
        self.emitter.emit(Event::SnapshotPublished {
            version: snapshot.version.clone(),
        });
    }

    /// Dial configured peers whose retry time has come, and abandon
    /// handshakes that have been going for too long.
    fn maintain_connections(&mut self) {
        let now = self.clock;
        let mut dial = Vec::new();
        let mut stale = Vec::new();

        for (name, session) in self.sessions.iter_mut() {
            if let Some(since) = session.handshake_since() {
                if now > since && now - since >= HANDSHAKE_TIMEOUT {
                    stale.push(name.clone());
                }
                continue;
            }
            let Some(retry_at) = session.retry_at() else {
                continue;
            };
            if now < retry_at {
                continue;
            }
            let Some(peer) = self.rib.peer(name) else {
                continue;
            };
            session.attempted();
            session.state = State::Connecting { since: now };

            dial.push((name.clone(), peer.info.endpoint.clone()));
        }
        for name in stale {
            debug!(target: "service", "Handshake with {name} timed out..");
            self.outbox.disconnect(
                name,
                DisconnectReason::Session(session::Error::Timeout.to_string()),
            );
        }
        for (name, addr) in dial {
            debug!(target: "service", "Dialing {name} at {addr}..");
            self.outbox.connect(name, addr);
        }
    }

    /// Runtime view of the configured peers.
    fn peer_records(&self) -> Vec<PeerRecord> {
        self.rib
            .peers()
            .map(|peer| {
                let session = self.sessions.get(&peer.info.name);

                PeerRecord {
                    info: peer.info.clone(),
                    connection_status: session
                        .map(Session::connection_status)
                        .unwrap_or(peer.status),
                    hold_time: peer.hold_time,
                    last_received: peer.last_received.map(|t| t.as_millis()),
                    last_sent: peer.last_sent.map(|t| t.as_millis()),
                    backoff_until: session.and_then(Session::retry_at).map(|t| t.as_millis()),
                }
            })
            .collect()
    }

    fn status(&self) -> Status {
        Status {
            node_name: self.config.node_name.clone(),
            started_at: self.started_at.unwrap_or_default().as_millis(),
            peers: self.rib.peers().count(),
            connected: self.sessions.established().count(),
            local_routes: self.rib.local().count(),
            learned_routes: self.rib.learned().count(),
            snapshot_version: self.cache.version(),
        }
    }
}

/// Hold-time negotiation: the smaller of the two proposals, with zero on
/// either side disabling the timer entirely.
fn negotiate_hold(local: u64, remote: u16) -> u64 {
    let remote = remote as u64;

    if local == 0 || remote == 0 {
        0
    } else {
        local.min(remote)
    }
}
