#![allow(dead_code)]
//! Deterministic service harness.
//!
//! Drives a [`Service`] directly, with no sockets: handshakes are simulated
//! by feeding the messages one peer's outbox produces into the other
//! service, and time only moves when a test says so.
use std::net;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_channel as chan;
use localtime::{LocalDuration, LocalTime};
use nonempty::NonEmpty;

use weft::config::{Config, PortEntry};
use weft::node::Event;
use weft::peer::{NodeName, PeerInfo};

use crate::service::io::Io;
use crate::service::message::{Capability, Message, Open};
use crate::service::session::Link;
use crate::service::{self, DefaultAuthorizer, DisconnectReason, Service};
use crate::xds::cache::Cache;

/// Hold time used by harness peers, in seconds.
pub const HOLD_TIME: u64 = 60;

/// Service instantiation used for testing.
pub struct Peer {
    pub name: &'static str,
    pub service: Service<DefaultAuthorizer>,

    events: chan::Receiver<Event>,
}

impl Deref for Peer {
    type Target = Service<DefaultAuthorizer>;

    fn deref(&self) -> &Self::Target {
        &self.service
    }
}

impl DerefMut for Peer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.service
    }
}

impl Peer {
    pub fn new(name: &'static str) -> Self {
        Self::config(name, Self::default_config(name))
    }

    pub fn config(name: &'static str, config: Config) -> Self {
        let cache = Arc::new(Cache::new());
        let emitter = service::events::Emitter::new();
        let events = emitter.subscribe();
        let authorizer = DefaultAuthorizer::new(config.domains.clone());
        let mut service = Service::new(
            config,
            authorizer,
            cache,
            emitter,
            fastrand::Rng::with_seed(name.len() as u64),
        );
        service.initialize(LocalTime::from_millis(1000));

        Self {
            name,
            service,
            events,
        }
    }

    pub fn default_config(name: &str) -> Config {
        Config {
            node_name: format!("{name}.example.com")
                .parse()
                .expect("peer names are valid"),
            domains: NonEmpty::new("global".parse().expect("valid domain")),
            hold_time: HOLD_TIME,
            port_range: NonEmpty::new(PortEntry::Range(20000, 20100)),
            listen: vec![],
            xds_bind_address: net::Ipv4Addr::LOCALHOST.into(),
            xds_port: 0,
            listener_bind: net::Ipv4Addr::UNSPECIFIED.into(),
            keepalive_tick: 1000,
            peers: vec![],
        }
    }

    pub fn node_name(&self) -> NodeName {
        self.service.node().clone()
    }

    /// This peer, as another node would configure it.
    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            name: self.node_name(),
            endpoint: format!("{}.example.com:8441", self.name)
                .parse()
                .expect("valid address"),
            domains: NonEmpty::new("global".parse().expect("valid domain")),
            peer_token: None,
        }
    }

    /// The OPEN message this peer would send.
    pub fn open(&self) -> Open {
        Open {
            node: self.node_name(),
            domains: vec!["global".parse().expect("valid domain")],
            hold_time: HOLD_TIME as u16,
            token: None,
            capabilities: vec![Capability::version()],
        }
    }

    /// Configure the given peer over the command interface.
    pub fn add_peer(&mut self, other: &Peer) {
        let (sender, receiver) = chan::bounded(1);
        self.service
            .command(service::Command::AddPeer(other.peer_info(), sender));
        receiver
            .recv()
            .expect("command reply")
            .expect("peer is added");
    }

    /// Publish a local route over the command interface.
    pub fn add_route(&mut self, route: weft::route::Route) {
        let (sender, receiver) = chan::bounded(1);
        self.service
            .command(service::Command::AddRoute(route, sender));
        receiver
            .recv()
            .expect("command reply")
            .expect("route is added");
    }

    /// Withdraw a local route over the command interface.
    pub fn delete_route(&mut self, name: &str) {
        let (sender, receiver) = chan::bounded(1);
        self.service
            .command(service::Command::DeleteRoute(name.to_owned(), sender));
        receiver
            .recv()
            .expect("command reply")
            .expect("route is deleted");
    }

    /// Feed a message from the given remote into the service.
    pub fn receive(&mut self, from: &NodeName, msg: Message) {
        self.service.received_message(from, msg);
    }

    /// Execute queued disconnects the way the runtime would, returning
    /// everything that was drained.
    pub fn run_io(&mut self) -> Vec<Io> {
        let ios = self.outbox_drain();

        for io in &ios {
            if let Io::Disconnect(name, reason) = io {
                self.service.disconnected(name, reason);
            }
        }
        ios
    }

    /// Establish an outbound session to the given peer, consuming the
    /// handshake frames on this side.
    pub fn connect_to(&mut self, other: &Peer) {
        let remote = other.node_name();

        if self.service.rib().peer(&remote).is_none() {
            self.add_peer(other);
        }
        // The dial request is queued by the command.
        let dialed = self
            .outbox_drain()
            .iter()
            .any(|io| matches!(io, Io::Connect(name, _) if *name == remote));
        assert!(dialed, "a dial for {remote} is queued");

        self.service.connected(remote.clone(), Link::Outbound);
        self.messages(&remote)
            .iter()
            .find(|m| matches!(m, Message::Open(_)))
            .expect("OPEN is sent");

        self.receive(&remote, Message::Open(other.open()));
        assert!(self.service.sessions().is_established(&remote));
    }

    /// Establish an inbound session from the given peer.
    pub fn connect_from(&mut self, other: &Peer) {
        let remote = other.node_name();

        if self.service.rib().peer(&remote).is_none() {
            self.add_peer(other);
        }
        // Fail the automatic outbound dial, so the inbound OPEN isn't
        // treated as a connection collision.
        self.outbox_drain();
        self.service.disconnected(
            &remote,
            &DisconnectReason::Dial(String::from("connection refused")),
        );

        let open = other.open();
        let hold_time = self.service.accept(&open).expect("inbound OPEN accepted");
        self.service.accepted(open, hold_time);

        self.messages(&remote)
            .iter()
            .find(|m| matches!(m, Message::Open(_)))
            .expect("OPEN is answered");

        self.receive(&remote, Message::Keepalive);
        assert!(self.service.sessions().is_established(&remote));
    }

    /// Drain outgoing messages sent from this peer to the remote.
    pub fn messages(&mut self, remote: &NodeName) -> Vec<Message> {
        let mut msgs = Vec::new();

        self.service.outbox().queue().retain(|io| match io {
            Io::Write(a, messages) if a == remote => {
                msgs.extend(messages.clone());
                false
            }
            _ => true,
        });
        msgs
    }

    /// Drain the full I/O outbox.
    pub fn outbox_drain(&mut self) -> Vec<Io> {
        std::iter::from_fn(|| self.service.next()).collect()
    }

    /// Drain the peer's emitted events.
    pub fn events(&mut self) -> Vec<Event> {
        self.events.try_iter().collect()
    }

    /// Move the clock forward and tick.
    pub fn elapse(&mut self, duration: LocalDuration) {
        let now = self.service.local_time() + duration;
        self.service.tick(now);
    }

    /// Tick at an absolute time.
    pub fn tick_at(&mut self, millis: u64) {
        self.service.tick(LocalTime::from_millis(millis.into()));
    }
}
