//! The Routing Information Base.
//!
//! All routing state lives here: local routes, routes learned from peers,
//! peer records and listener port assignments. State changes in two steps:
//! [`RouteTable::plan`] is a pure function computing the would-be next state
//! together with its side effects, and [`RouteTable::commit`] installs a plan
//! atomically. Plans are never partially applied.
use std::collections::BTreeMap;

use localtime::{LocalDuration, LocalTime};
use log::*;
use thiserror::Error;

use weft::config::PortEntry;
use weft::node::ConnectionStatus;
use weft::peer::{NodeName, PeerInfo};
use weft::route::{NodePath, Route, RouteEntry};

use crate::service::message::RouteUpdate;
use crate::service::ports;

/// Inputs to the route table. Everything that can change routing state is
/// expressed as one of these.
#[derive(Debug, Clone)]
pub enum Action {
    /// Publish a local route.
    RouteCreate(Route),
    /// Withdraw a local route.
    RouteDelete(String),
    /// Configure a new peer.
    PeerCreate(PeerInfo),
    /// Remove a configured peer, dropping what was learned from it.
    PeerDelete(NodeName),
    /// A session with the peer reached the established state, with the
    /// negotiated hold time in seconds.
    ProtocolOpen { peer: NodeName, hold_time: u64 },
    /// The peer sent a route table delta.
    ProtocolUpdate {
        peer: NodeName,
        updates: Vec<RouteUpdate>,
    },
    /// The peer sent a heartbeat.
    ProtocolKeepalive { peer: NodeName },
    /// The session with the peer ended.
    ProtocolClose { peer: NodeName },
    /// The service clock ticked.
    Tick,
}

/// Why a plan could not be produced. The action is rejected without any
/// state change.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("route `{0}` already exists")]
    DuplicateRoute(String),
    #[error("route `{0}` does not exist")]
    UnknownRoute(String),
    #[error("peer `{0}` already exists")]
    DuplicatePeer(NodeName),
    #[error("cannot peer with ourselves")]
    SelfPeer,
    #[error("peer `{0}` does not exist")]
    UnknownPeer(NodeName),
    #[error("peer `{0}` is not connected")]
    NotConnected(NodeName),
    #[error(transparent)]
    Ports(#[from] ports::Error),
}

/// A message-bearing side effect of a commit, to be delivered to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Propagation {
    /// Send a batched UPDATE.
    Update {
        peer: NodeName,
        updates: Vec<RouteUpdate>,
    },
    /// Withdraw routes by name.
    Withdraw {
        peer: NodeName,
        routes: Vec<String>,
    },
    /// Send a heartbeat.
    Keepalive { peer: NodeName },
}

impl Propagation {
    /// The peer this propagation is addressed to.
    pub fn peer(&self) -> &NodeName {
        match self {
            Self::Update { peer, .. } => peer,
            Self::Withdraw { peer, .. } => peer,
            Self::Keepalive { peer } => peer,
        }
    }
}

/// A data-plane side effect of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortOp {
    /// A listener port was assigned to the route.
    Allocate { name: String, port: u16 },
    /// The route's listener port was released.
    Release { name: String, port: u16 },
}

/// Peer record, as tracked by the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Static configuration.
    pub info: PeerInfo,
    /// Connection status.
    pub status: ConnectionStatus,
    /// Hold time in seconds, negotiated at OPEN. Zero or unset means the
    /// session never expires and exchanges no keepalives.
    pub hold_time: Option<u64>,
    /// Last time a frame was received from the peer.
    pub last_received: Option<LocalTime>,
    /// Last time a frame was sent to the peer.
    pub last_sent: Option<LocalTime>,
}

impl Peer {
    fn new(info: PeerInfo) -> Self {
        Self {
            info,
            status: ConnectionStatus::Disconnected,
            hold_time: None,
            last_received: None,
            last_sent: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Whether the hold timer has expired at the given time. The comparison
    /// is strictly greater-than: at exactly the hold time, the peer lives.
    fn is_expired(&self, now: LocalTime) -> bool {
        let Some(hold_time) = self.hold_time else {
            return false;
        };
        if hold_time == 0 {
            return false;
        }
        let Some(last_received) = self.last_received else {
            return false;
        };
        if now <= last_received {
            return false;
        }
        now - last_received > LocalDuration::from_millis(hold_time.saturating_mul(1000).into())
    }

    /// Whether a keepalive is due at the given time. Never true without a
    /// prior send; the comparison is strictly greater-than.
    fn keepalive_due(&self, now: LocalTime) -> bool {
        let Some(hold_time) = self.hold_time else {
            return false;
        };
        if hold_time == 0 {
            return false;
        }
        let Some(last_sent) = self.last_sent else {
            return false;
        };
        if now <= last_sent {
            return false;
        }
        now - last_sent > LocalDuration::from_millis((hold_time.saturating_mul(1000) / 3).into())
    }
}

/// The routing state proper. Cloned wholesale by `plan`; swapped wholesale
/// by `commit`.
#[derive(Debug, Clone, Default)]
struct Inner {
    /// Routes published by this node, by name.
    local: BTreeMap<String, Route>,
    /// Routes learned from peers, by name.
    learned: BTreeMap<String, RouteEntry>,
    /// Configured peers, by name.
    peers: BTreeMap<NodeName, Peer>,
    /// Listener port assignments.
    ports: ports::Allocator,
}

/// Side effects accumulated while planning.
#[derive(Debug, Default)]
struct Effects {
    /// Route updates per peer, in emission order.
    updates: BTreeMap<NodeName, Vec<RouteUpdate>>,
    /// Peers due a keepalive.
    keepalives: Vec<NodeName>,
    /// Data-plane operations.
    port_ops: Vec<PortOp>,
    /// Peers expired by the hold timer.
    expired: Vec<NodeName>,
    /// Routes installed, with their origin.
    routes_added: Vec<(String, NodeName)>,
    /// Routes removed, with their origin.
    routes_removed: Vec<(String, NodeName)>,
}

/// The would-be result of applying an action: the next state plus derived
/// side effects. Produced by [`RouteTable::plan`], installed by
/// [`RouteTable::commit`].
#[derive(Debug)]
pub struct Plan {
    next: Inner,
    propagations: Vec<Propagation>,
    port_ops: Vec<PortOp>,
    expired: Vec<NodeName>,
    routes_added: Vec<(String, NodeName)>,
    routes_removed: Vec<(String, NodeName)>,
}

impl Plan {
    /// Propagations this plan will produce when committed.
    pub fn propagations(&self) -> &[Propagation] {
        &self.propagations
    }

    /// Port operations this plan will produce when committed.
    pub fn port_ops(&self) -> &[PortOp] {
        &self.port_ops
    }
}

/// Result of committing a plan.
#[derive(Debug)]
pub struct CommitResult {
    /// Version of the newly installed state. Strictly increasing.
    pub version: u64,
    /// Per-peer message batches to enqueue, each atomic per peer.
    pub propagations: Vec<Propagation>,
    /// Data-plane operations. Non-empty means the snapshot must be rebuilt.
    pub port_ops: Vec<PortOp>,
    /// Peers whose hold timer expired in this commit.
    pub expired: Vec<NodeName>,
    /// Routes installed by this commit, with their origin.
    pub routes_added: Vec<(String, NodeName)>,
    /// Routes removed by this commit, with their origin.
    pub routes_removed: Vec<(String, NodeName)>,
}

/// The Routing Information Base.
#[derive(Debug)]
pub struct RouteTable {
    /// This node's name, as inserted into advertised paths.
    node: NodeName,
    /// Current state.
    inner: Inner,
    /// Commit counter.
    version: u64,
}

impl RouteTable {
    pub fn new(node: NodeName, port_range: impl IntoIterator<Item = PortEntry>) -> Self {
        Self {
            node,
            inner: Inner {
                ports: ports::Allocator::new(port_range),
                ..Inner::default()
            },
            version: 0,
        }
    }

    /// This node's name.
    pub fn node(&self) -> &NodeName {
        &self.node
    }

    /// Version of the current state. Bumped on every commit.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Local routes, by name.
    pub fn local(&self) -> impl Iterator<Item = &Route> {
        self.inner.local.values()
    }

    /// Learned routes, by name.
    pub fn learned(&self) -> impl Iterator<Item = &RouteEntry> {
        self.inner.learned.values()
    }

    /// All routes with their assigned listener ports, local first.
    pub fn routes(&self) -> impl Iterator<Item = (&Route, Option<u16>)> {
        self.inner
            .local
            .values()
            .chain(self.inner.learned.values().map(|e| &e.service))
            .map(|route| (route, self.inner.ports.get(&route.name)))
    }

    /// Configured peers.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.inner.peers.values()
    }

    /// Peers with established sessions.
    pub fn connected(&self) -> impl Iterator<Item = &Peer> {
        self.peers().filter(|p| p.is_connected())
    }

    /// Lookup a peer by name.
    pub fn peer(&self, name: &NodeName) -> Option<&Peer> {
        self.inner.peers.get(name)
    }

    /// Lookup a route's listener port.
    pub fn port(&self, name: &str) -> Option<u16> {
        self.inner.ports.get(name)
    }

    /// Compute the next state and side effects for the given action, without
    /// applying anything. Pure: identical inputs yield identical plans.
    pub fn plan(&self, action: Action, now: LocalTime) -> Result<Plan, PlanError> {
        let mut next = self.inner.clone();
        let mut effects = Effects::default();

        match action {
            Action::RouteCreate(route) => {
                self.plan_route_create(&mut next, &mut effects, route)?;
            }
            Action::RouteDelete(name) => {
                self.plan_route_delete(&mut next, &mut effects, name)?;
            }
            Action::PeerCreate(info) => {
                if info.name == self.node {
                    return Err(PlanError::SelfPeer);
                }
                if next.peers.contains_key(&info.name) {
                    return Err(PlanError::DuplicatePeer(info.name));
                }
                next.peers.insert(info.name.clone(), Peer::new(info));
            }
            Action::PeerDelete(name) => {
                if next.peers.remove(&name).is_none() {
                    return Err(PlanError::UnknownPeer(name));
                }
                Self::drop_learned_from(&mut next, &mut effects, &name, &[name.clone()]);
            }
            Action::ProtocolOpen { peer, hold_time } => {
                self.plan_open(&mut next, &mut effects, peer, hold_time, now)?;
            }
            Action::ProtocolUpdate { peer, updates } => {
                self.plan_update(&mut next, &mut effects, peer, updates, now)?;
            }
            Action::ProtocolKeepalive { peer } => {
                let record = next
                    .peers
                    .get_mut(&peer)
                    .ok_or(PlanError::UnknownPeer(peer.clone()))?;
                if !record.is_connected() {
                    return Err(PlanError::NotConnected(peer));
                }
                record.last_received = Some(now);
            }
            Action::ProtocolClose { peer } => {
                let record = next
                    .peers
                    .get_mut(&peer)
                    .ok_or(PlanError::UnknownPeer(peer.clone()))?;
                if record.is_connected() {
                    record.status = ConnectionStatus::Disconnected;
                    record.hold_time = None;

                    Self::drop_learned_from(&mut next, &mut effects, &peer, &[peer.clone()]);
                }
            }
            Action::Tick => {
                Self::plan_tick(&mut next, &mut effects, now);
            }
        }
        Ok(Self::finalize(next, effects, now))
    }

    /// Install a plan, producing the commit result. Infallible: all
    /// validation happened at planning time.
    pub fn commit(&mut self, plan: Plan) -> CommitResult {
        self.inner = plan.next;
        self.version += 1;

        CommitResult {
            version: self.version,
            propagations: plan.propagations,
            port_ops: plan.port_ops,
            expired: plan.expired,
            routes_added: plan.routes_added,
            routes_removed: plan.routes_removed,
        }
    }

    fn plan_route_create(
        &self,
        next: &mut Inner,
        effects: &mut Effects,
        route: Route,
    ) -> Result<(), PlanError> {
        let name = route.name.clone();

        if next.local.contains_key(&name) {
            return Err(PlanError::DuplicateRoute(name));
        }
        // Local routes take precedence over learned ones on name conflict.
        if let Some(evicted) = next.learned.remove(&name) {
            debug!(
                target: "service",
                "Local route {name} evicts learned route from {}", evicted.origin
            );
            if let Some(port) = next.ports.release(&name) {
                effects.port_ops.push(PortOp::Release {
                    name: name.clone(),
                    port,
                });
            }
            effects
                .routes_removed
                .push((name.clone(), evicted.origin.clone()));
        }
        let port = next.ports.allocate(&name)?;
        effects.port_ops.push(PortOp::Allocate {
            name: name.clone(),
            port,
        });
        effects.routes_added.push((name.clone(), self.node.clone()));

        // Advertise to every connected peer with ourselves as the path root.
        let path = NodePath::root(self.node.clone());
        for peer in next.peers.values().filter(|p| p.is_connected()) {
            effects
                .updates
                .entry(peer.info.name.clone())
                .or_default()
                .push(RouteUpdate::Add {
                    route: route.clone(),
                    node_path: path.clone(),
                });
        }
        next.local.insert(name, route);

        Ok(())
    }

    fn plan_route_delete(
        &self,
        next: &mut Inner,
        effects: &mut Effects,
        name: String,
    ) -> Result<(), PlanError> {
        if next.local.remove(&name).is_none() {
            return Err(PlanError::UnknownRoute(name));
        }
        if let Some(port) = next.ports.release(&name) {
            effects.port_ops.push(PortOp::Release {
                name: name.clone(),
                port,
            });
        }
        effects
            .routes_removed
            .push((name.clone(), self.node.clone()));

        for peer in next.peers.values().filter(|p| p.is_connected()) {
            effects
                .updates
                .entry(peer.info.name.clone())
                .or_default()
                .push(RouteUpdate::Remove { name: name.clone() });
        }
        Ok(())
    }

    fn plan_open(
        &self,
        next: &mut Inner,
        effects: &mut Effects,
        peer: NodeName,
        hold_time: u64,
        now: LocalTime,
    ) -> Result<(), PlanError> {
        let record = next
            .peers
            .get_mut(&peer)
            .ok_or(PlanError::UnknownPeer(peer.clone()))?;

        record.status = ConnectionStatus::Connected;
        record.hold_time = Some(hold_time);
        record.last_received = Some(now);
        record.last_sent = Some(now);

        // Initial full-table sync: one batched UPDATE carrying every route
        // the peer is allowed to see. An empty table yields no propagation.
        let mut updates = Vec::new();

        for route in next.local.values() {
            updates.push(RouteUpdate::Add {
                route: route.clone(),
                node_path: NodePath::root(self.node.clone()),
            });
        }
        for entry in next.learned.values() {
            if entry.origin == peer || entry.node_path.contains(&peer) {
                continue;
            }
            updates.push(RouteUpdate::Add {
                route: entry.service.clone(),
                node_path: entry.node_path.through(self.node.clone()),
            });
        }
        if !updates.is_empty() {
            effects.updates.insert(peer, updates);
        }
        Ok(())
    }

    fn plan_update(
        &self,
        next: &mut Inner,
        effects: &mut Effects,
        peer: NodeName,
        updates: Vec<RouteUpdate>,
        now: LocalTime,
    ) -> Result<(), PlanError> {
        {
            let record = next
                .peers
                .get_mut(&peer)
                .ok_or(PlanError::UnknownPeer(peer.clone()))?;
            if !record.is_connected() {
                return Err(PlanError::NotConnected(peer));
            }
            record.last_received = Some(now);
        }

        for update in updates {
            match update {
                RouteUpdate::Add { route, node_path } => {
                    self.install_learned(next, effects, &peer, route, node_path, now);
                }
                RouteUpdate::Remove { name } => {
                    let Some(entry) = next.learned.get(&name) else {
                        continue;
                    };
                    // Only the peer a route was learned from may withdraw it.
                    if entry.origin != peer {
                        continue;
                    }
                    let entry = next
                        .learned
                        .remove(&name)
                        .expect("RouteTable::plan_update: entry exists");

                    if let Some(port) = next.ports.release(&name) {
                        effects.port_ops.push(PortOp::Release {
                            name: name.clone(),
                            port,
                        });
                    }
                    effects.routes_removed.push((name.clone(), peer.clone()));

                    for q in Self::recipients(next, &entry.node_path, &peer, &[]) {
                        effects
                            .updates
                            .entry(q)
                            .or_default()
                            .push(RouteUpdate::Remove { name: name.clone() });
                    }
                }
            }
        }
        Ok(())
    }

    fn install_learned(
        &self,
        next: &mut Inner,
        effects: &mut Effects,
        peer: &NodeName,
        route: Route,
        node_path: NodePath,
        now: LocalTime,
    ) {
        let name = route.name.clone();

        // Loop prevention: an advertisement that already traversed us is
        // silently dropped. This is steady-state behavior, not a failure.
        if node_path.contains(&self.node) {
            debug!(
                target: "service",
                "Dropping looped route {name} from {peer} (path: {node_path})"
            );
            return;
        }
        // Local routes shadow learned ones.
        if next.local.contains_key(&name) {
            debug!(
                target: "service",
                "Ignoring learned route {name} from {peer}: local route takes precedence"
            );
            return;
        }
        let entry = RouteEntry {
            service: route,
            origin: peer.clone(),
            node_path,
            learned_at: now,
        };
        // A duplicate advertisement is a no-op: no propagation, no port
        // operations.
        if let Some(existing) = next.learned.get(&name) {
            if existing.same_as(&entry) {
                return;
            }
        }
        let port = match next.ports.allocate(&name) {
            Ok(port) => port,
            Err(e) => {
                // Unlike a local route create, a learned route that cannot
                // get a listener is skipped rather than failing the whole
                // inbound update.
                warn!(target: "service", "Not installing learned route {name}: {e}");
                return;
            }
        };
        effects.port_ops.push(PortOp::Allocate {
            name: name.clone(),
            port,
        });
        effects.routes_added.push((name.clone(), peer.clone()));

        let outgoing = entry.node_path.through(self.node.clone());
        for q in Self::recipients(next, &outgoing, peer, &[]) {
            effects.updates.entry(q).or_default().push(RouteUpdate::Add {
                route: entry.service.clone(),
                node_path: outgoing.clone(),
            });
        }
        next.learned.insert(name, entry);
    }

    fn plan_tick(next: &mut Inner, effects: &mut Effects, now: LocalTime) {
        // Expirations strictly before keepalives; an expired peer gets no
        // keepalive in the same tick.
        let expired: Vec<NodeName> = next
            .peers
            .values()
            .filter(|p| p.is_connected() && p.is_expired(now))
            .map(|p| p.info.name.clone())
            .collect();

        for name in &expired {
            if let Some(record) = next.peers.get_mut(name) {
                record.status = ConnectionStatus::Disconnected;
                record.hold_time = None;
            }
            Self::drop_learned_from(next, effects, name, &expired);
        }
        effects.expired = expired;

        let due: Vec<NodeName> = next
            .peers
            .values()
            .filter(|p| p.is_connected() && p.keepalive_due(now))
            .map(|p| p.info.name.clone())
            .collect();

        for name in due {
            if let Some(record) = next.peers.get_mut(&name) {
                record.last_sent = Some(now);
            }
            effects.keepalives.push(name);
        }
    }

    /// Remove every learned route originating at `peer`, withdrawing it from
    /// the remaining connected peers. Peers in `excluded` receive nothing.
    fn drop_learned_from(
        next: &mut Inner,
        effects: &mut Effects,
        peer: &NodeName,
        excluded: &[NodeName],
    ) {
        let removed: Vec<String> = next
            .learned
            .values()
            .filter(|e| e.origin == *peer)
            .map(|e| e.service.name.clone())
            .collect();

        for name in removed {
            let entry = next
                .learned
                .remove(&name)
                .expect("RouteTable::drop_learned_from: entry exists");

            if let Some(port) = next.ports.release(&name) {
                effects.port_ops.push(PortOp::Release {
                    name: name.clone(),
                    port,
                });
            }
            effects.routes_removed.push((name.clone(), peer.clone()));

            for q in Self::recipients(next, &entry.node_path, peer, excluded) {
                effects
                    .updates
                    .entry(q)
                    .or_default()
                    .push(RouteUpdate::Remove { name: name.clone() });
            }
        }
    }

    /// Connected peers a route with the given path may be sent to:
    /// split-horizon excludes the origin, loop prevention excludes anyone
    /// already on the path.
    fn recipients(
        next: &Inner,
        path: &NodePath,
        origin: &NodeName,
        excluded: &[NodeName],
    ) -> Vec<NodeName> {
        next.peers
            .values()
            .filter(|p| p.is_connected())
            .map(|p| p.info.name.clone())
            .filter(|q| q != origin && !path.contains(q) && !excluded.contains(q))
            .collect()
    }

    /// Turn accumulated effects into an ordered propagation list and stamp
    /// `last_sent` on every peer we are about to write to.
    fn finalize(mut next: Inner, effects: Effects, now: LocalTime) -> Plan {
        let mut propagations = Vec::new();

        for (peer, updates) in effects.updates {
            if let Some(record) = next.peers.get_mut(&peer) {
                record.last_sent = Some(now);
            }
            if updates
                .iter()
                .all(|u| matches!(u, RouteUpdate::Remove { .. }))
            {
                propagations.push(Propagation::Withdraw {
                    peer,
                    routes: updates
                        .into_iter()
                        .map(|u| u.name().to_owned())
                        .collect(),
                });
            } else {
                propagations.push(Propagation::Update { peer, updates });
            }
        }
        for peer in effects.keepalives {
            propagations.push(Propagation::Keepalive { peer });
        }

        Plan {
            next,
            propagations,
            port_ops: effects.port_ops,
            expired: effects.expired,
            routes_added: effects.routes_added,
            routes_removed: effects.routes_removed,
        }
    }
}
