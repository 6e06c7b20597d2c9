//! In-process handle on a running node.
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{fmt, io};

use crossbeam_channel as chan;
use thiserror::Error;

use weft::config::Config;
use weft::node::{Command, Event, PeerRecord, RouteList, Status};
use weft::peer::{NodeName, PeerInfo};
use weft::route::Route;

use crate::runtime::Control;
use crate::service;
use crate::service::events::Emitter;
use crate::service::CommandError;

/// An error resulting from a handle method.
#[derive(Error, Debug)]
pub enum Error {
    /// The command channel is no longer connected.
    #[error("command channel is not connected")]
    NotConnected,
    /// The command returned an error.
    #[error("command failed: {0}")]
    Command(#[from] CommandError),
    /// An I/O error occured.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<chan::RecvError> for Error {
    fn from(_: chan::RecvError) -> Self {
        Self::NotConnected
    }
}

impl<T> From<chan::SendError<T>> for Error {
    fn from(_: chan::SendError<T>) -> Self {
        Self::NotConnected
    }
}

/// Channel-backed handle used by the control socket and tests to talk to
/// the service loop.
#[derive(Clone)]
pub struct Handle {
    /// Path to the control socket, used to unblock the control thread on
    /// shutdown.
    socket: PathBuf,
    /// Channel into the service loop.
    commands: chan::Sender<Control>,
    /// Event publisher shared with the service.
    emitter: Emitter<Event>,
    /// Whether a shutdown was initiated. Prevents shutting down twice.
    shutdown: Arc<AtomicBool>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("socket", &self.socket).finish()
    }
}

impl Handle {
    pub(crate) fn new(
        socket: PathBuf,
        commands: chan::Sender<Control>,
        emitter: Emitter<Event>,
    ) -> Self {
        Self {
            socket,
            commands,
            emitter,
            shutdown: Arc::default(),
        }
    }

    fn command(&self, cmd: service::Command) -> Result<(), Error> {
        self.commands
            .send(Control::User(cmd))
            .map_err(Error::from)
    }
}

impl weft::node::Handle for Handle {
    type Error = Error;

    fn is_running(&self) -> bool {
        true
    }

    fn add_peer(&mut self, peer: PeerInfo) -> Result<bool, Error> {
        let (sender, receiver) = chan::bounded(1);
        self.command(service::Command::AddPeer(peer, sender))?;
        receiver.recv()??;

        Ok(true)
    }

    fn delete_peer(&mut self, name: NodeName) -> Result<bool, Error> {
        let (sender, receiver) = chan::bounded(1);
        self.command(service::Command::DeletePeer(name, sender))?;
        receiver.recv()??;

        Ok(true)
    }

    fn peers(&self) -> Result<Vec<PeerRecord>, Error> {
        let (sender, receiver) = chan::bounded(1);
        self.command(service::Command::ListPeers(sender))?;
        receiver.recv().map_err(Error::from)
    }

    fn add_route(&mut self, route: Route) -> Result<bool, Error> {
        let (sender, receiver) = chan::bounded(1);
        self.command(service::Command::AddRoute(route, sender))?;
        receiver.recv()??;

        Ok(true)
    }

    fn delete_route(&mut self, name: String) -> Result<bool, Error> {
        let (sender, receiver) = chan::bounded(1);
        self.command(service::Command::DeleteRoute(name, sender))?;
        receiver.recv()??;

        Ok(true)
    }

    fn routes(&self) -> Result<RouteList, Error> {
        let (sender, receiver) = chan::bounded(1);
        self.command(service::Command::ListRoutes(sender))?;
        receiver.recv().map_err(Error::from)
    }

    fn status(&self) -> Result<Status, Error> {
        let (sender, receiver) = chan::bounded(1);
        self.command(service::Command::Status(sender))?;
        receiver.recv().map_err(Error::from)
    }

    fn config(&self) -> Result<Config, Error> {
        let (sender, receiver) = chan::bounded(1);
        self.command(service::Command::Config(sender))?;
        receiver.recv().map_err(Error::from)
    }

    fn subscribe(&self) -> Result<chan::Receiver<Event>, Error> {
        Ok(self.emitter.subscribe())
    }

    fn shutdown(self) -> Result<(), Error> {
        // If the current value is `false`, set it to `true`; otherwise we
        // already shut down.
        if self
            .shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        self.commands.send(Control::Shutdown).ok();

        // Send a shutdown request to our own control socket. This is the
        // only way to unblock the control thread gracefully. It may already
        // be disconnected; ignore errors.
        UnixStream::connect(&self.socket)
            .and_then(|sock| Command::SHUTDOWN.to_writer(sock))
            .ok();

        Ok(())
    }
}
