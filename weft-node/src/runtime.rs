//! Node runtime.
//!
//! Wires the service loop, peer transport, discovery server, control socket
//! and ticker together, and owns the threads running them. The service loop
//! is the single writer of the route table; everything else talks to it
//! over the control channel.
mod handle;
pub mod thread;

use std::net::TcpStream;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::{fs, io, net, time};

use crossbeam_channel as chan;
use localtime::LocalTime;
use log::*;
use thiserror::Error;

use weft::config::Config;
use weft::peer::NodeName;

use crate::control;
use crate::service;
use crate::service::events::Emitter;
use crate::service::io::Io;
use crate::service::message::{Message, Open};
use crate::service::session::Link;
use crate::service::{Authorizer, DefaultAuthorizer, DisconnectReason, Service};
use crate::signals::Signal;
use crate::transport::Transport;
use crate::xds;
use crate::xds::cache::Cache;

pub use handle::{Error as HandleError, Handle};

/// A runtime error.
#[derive(Error, Debug)]
pub enum Error {
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// A control socket error.
    #[error("control socket error: {0}")]
    Control(#[from] control::Error),
    /// A discovery server error.
    #[error("discovery server error: {0}")]
    Xds(#[from] xds::server::Error),
    /// Another node is already running.
    #[error(
        "another node appears to be running; \
        if this isn't the case, delete the socket file at '{0}' \
        and restart the node"
    )]
    AlreadyRunning(PathBuf),
}

/// Inputs to the service loop, from all sources.
pub enum Control {
    /// An operator command.
    User(service::Command),
    /// An outbound dial completed.
    Dialed {
        peer: NodeName,
        stream: TcpStream,
    },
    /// An inbound connection presented its OPEN.
    Accepted {
        open: Open,
        stream: TcpStream,
    },
    /// A frame arrived from a registered session.
    Received {
        peer: NodeName,
        message: Message,
    },
    /// A session's transport went away.
    Disconnected {
        peer: NodeName,
        reason: DisconnectReason,
    },
    /// Stop the service loop.
    Shutdown,
}

/// Holds join handles to the node threads, as well as a client handle.
pub struct Runtime {
    /// This node's name.
    pub id: NodeName,
    /// Handle used to communicate with the service loop.
    pub handle: Handle,
    /// Path of the control socket.
    pub socket: PathBuf,
    /// Bound peer listener addresses.
    pub local_addrs: Vec<net::SocketAddr>,
    /// Bound discovery server address.
    pub xds_addr: net::SocketAddr,

    service: std::thread::JoinHandle<()>,
    xds: std::thread::JoinHandle<()>,
    xds_closer: xds::server::Closer,
}

impl Runtime {
    /// Initialize the runtime.
    ///
    /// This function spawns threads.
    pub fn init(
        config: Config,
        socket: PathBuf,
        signals: chan::Receiver<Signal>,
    ) -> Result<Runtime, Error> {
        let id = config.node_name.clone();
        let rng = fastrand::Rng::new();
        let emitter = Emitter::new();
        let cache = Arc::new(Cache::new());
        let (sender, receiver) = chan::unbounded::<Control>();

        info!(target: "node", "Initializing service ({id})..");

        let authorizer = DefaultAuthorizer::new(config.domains.clone());
        let service = Service::new(
            config.clone(),
            authorizer,
            cache.clone(),
            emitter.clone(),
            rng,
        );
        let mut transport = Transport::new(sender.clone());
        let mut local_addrs = Vec::new();

        for addr in &config.listen {
            let local_addr = transport.listen(*addr)?;

            local_addrs.push(local_addr);
            info!(target: "node", "Listening for peers on {local_addr}..");
        }

        let xds_server = xds::server::Server::bind(config.xds_addr(), cache)?;
        let xds_addr = xds_server.local_addr();
        let xds_closer = xds_server.closer();
        let xds = thread::spawn(format!("{id} xds"), move || xds_server.run());

        let ticker = chan::tick(time::Duration::from_millis(config.keepalive_tick));
        let service = thread::spawn(format!("{id} service"), move || {
            service_loop(service, transport, receiver, signals, ticker)
        });
        let handle = Handle::new(socket.clone(), sender, emitter);

        Ok(Runtime {
            id,
            handle,
            socket,
            local_addrs,
            xds_addr,
            service,
            xds,
            xds_closer,
        })
    }

    /// Run the node until shutdown, serving the control socket.
    pub fn run(self) -> Result<(), Error> {
        info!(target: "node", "Running node {}..", self.id);
        info!(target: "node", "Binding control socket {}..", self.socket.display());

        let listener = match UnixListener::bind(&self.socket) {
            Ok(sock) => sock,
            Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
                return Err(Error::AlreadyRunning(self.socket));
            }
            Err(err) => {
                return Err(err.into());
            }
        };
        let control = thread::spawn(format!("{} control", self.id), {
            let handle = self.handle.clone();

            move || control::listen(listener, handle)
        });

        if self.service.join().is_err() {
            error!(target: "node", "Service loop panicked");
        }
        // Unblock and stop the auxiliary threads.
        self.xds_closer.close();
        self.xds.join().ok();

        weft::node::Handle::shutdown(self.handle.clone()).ok();
        if let Ok(result) = control.join() {
            result?;
        }
        fs::remove_file(&self.socket).ok();

        debug!(target: "node", "Node shutdown completed for {}", self.id);

        Ok(())
    }
}

/// The dispatcher: sequentializes actions from all sources onto the route
/// table and executes the resulting I/O.
fn service_loop<A: Authorizer>(
    mut service: Service<A>,
    mut transport: Transport,
    inputs: chan::Receiver<Control>,
    signals: chan::Receiver<Signal>,
    ticker: chan::Receiver<time::Instant>,
) {
    service.initialize(LocalTime::now());
    drain(&mut service, &mut transport);

    loop {
        chan::select! {
            recv(inputs) -> input => {
                let Ok(input) = input else {
                    break;
                };
                match input {
                    Control::User(cmd) => {
                        service.command(cmd);
                    }
                    Control::Dialed { peer, stream } => {
                        if service.is_dialing(&peer) {
                            transport.register(peer.clone(), stream);
                            service.connected(peer, Link::Outbound);
                        } else {
                            // The session moved on while the dial was in
                            // flight; a competing inbound connection won.
                            debug!(target: "node", "Dropping stale dial result for {peer}");
                        }
                    }
                    Control::Accepted { open, stream } => {
                        match service.accept(&open) {
                            Ok(hold_time) => {
                                transport.register(open.node.clone(), stream);
                                service.accepted(open, hold_time);
                            }
                            Err(err) => {
                                debug!(
                                    target: "node",
                                    "Refusing inbound session from {}: {err}", open.node
                                );
                                transport.refuse(stream, err.to_string());
                            }
                        }
                    }
                    Control::Received { peer, message } => {
                        service.received_message(&peer, message);
                    }
                    Control::Disconnected { peer, reason } => {
                        transport.disconnect(&peer, &reason);
                        service.disconnected(&peer, &reason);
                    }
                    Control::Shutdown => {
                        break;
                    }
                }
            }
            recv(ticker) -> _ => {
                service.tick(LocalTime::now());
            }
            recv(signals) -> signal => {
                if let Ok(signal) = signal {
                    info!(target: "node", "{signal} received; shutting down..");
                }
                break;
            }
        }
        drain(&mut service, &mut transport);
    }
    // Graceful shutdown: close every session, stop accepting, and cut the
    // discovery streams loose.
    service.shutdown();
    drain(&mut service, &mut transport);
    service.cache().close();
    transport.shutdown();
}

/// Execute queued service I/O on the transport.
fn drain<A: Authorizer>(service: &mut Service<A>, transport: &mut Transport) {
    while let Some(io) = service.next() {
        match io {
            Io::Write(name, msgs) => {
                transport.send(&name, msgs);
            }
            Io::Connect(name, addr) => {
                transport.connect(name, addr);
            }
            Io::Disconnect(name, reason) => {
                transport.disconnect(&name, &reason);
                service.disconnected(&name, &reason);
            }
        }
    }
}
