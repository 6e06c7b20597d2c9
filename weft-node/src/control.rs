//! Node control socket implementation.
use std::io::prelude::*;
use std::io::BufReader;
use std::io::LineWriter;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::{io, net};

use serde_json as json;

use weft::node::{Command, CommandResult, Handle};

use crate::runtime;
use crate::runtime::thread;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to bind control socket listener: {0}")]
    Bind(io::Error),
}

/// Listen for commands on the control socket, and process them.
pub fn listen<H: Handle<Error = runtime::HandleError>>(
    listener: UnixListener,
    mut handle: H,
) -> Result<(), Error> {
    log::debug!(target: "control", "Control thread listening on socket..");

    for incoming in listener.incoming() {
        match incoming {
            Ok(mut stream) => {
                if let Err(e) = command(&stream, &mut handle) {
                    if let CommandError::Shutdown = e {
                        log::debug!(target: "control", "Shutdown requested..");
                        // The service loop might already be gone if shutdown
                        // came from somewhere else. Ignore errors.
                        handle.clone().shutdown().ok();
                        break;
                    }
                    log::error!(target: "control", "Command returned error: {e}");

                    CommandResult::<()>::error(e).to_writer(&mut stream).ok();

                    stream.flush().ok();
                    stream.shutdown(net::Shutdown::Both).ok();
                }
            }
            Err(e) => {
                log::error!(target: "control", "Failed to accept incoming connection: {e}")
            }
        }
    }
    log::debug!(target: "control", "Exiting control loop..");

    Ok(())
}

#[derive(thiserror::Error, Debug)]
enum CommandError {
    #[error("invalid command: {0}")]
    Invalid(#[from] json::Error),
    #[error("runtime error: {0}")]
    Runtime(#[from] runtime::HandleError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("shutdown requested")]
    Shutdown,
}

fn command<H: Handle<Error = runtime::HandleError>>(
    stream: &UnixStream,
    handle: &mut H,
) -> Result<(), CommandError> {
    let mut reader = BufReader::new(stream);
    let mut writer = LineWriter::new(stream);
    let mut line = String::new();

    reader.read_line(&mut line)?;
    let input = line.trim_end();

    log::debug!(target: "control", "Received `{input}` on control socket");
    let cmd: Command = json::from_str(input)?;

    match cmd {
        Command::AddPeer { peer } => {
            let updated = handle.add_peer(peer)?;
            CommandResult::updated(updated).to_writer(writer)?;
        }
        Command::DeletePeer { name } => {
            let updated = handle.delete_peer(name)?;
            CommandResult::updated(updated).to_writer(writer)?;
        }
        Command::ListPeers => {
            let peers = handle.peers()?;
            CommandResult::Okay(peers).to_writer(writer)?;
        }
        Command::AddRoute { route } => {
            let updated = handle.add_route(route)?;
            CommandResult::updated(updated).to_writer(writer)?;
        }
        Command::DeleteRoute { name } => {
            let updated = handle.delete_route(name)?;
            CommandResult::updated(updated).to_writer(writer)?;
        }
        Command::ListRoutes => {
            let routes = handle.routes()?;
            CommandResult::Okay(routes).to_writer(writer)?;
        }
        Command::Status => {
            let status = handle.status()?;
            CommandResult::Okay(status).to_writer(writer)?;
        }
        Command::Config => {
            let config = handle.config()?;
            CommandResult::Okay(config).to_writer(writer)?;
        }
        Command::Subscribe => {
            let events = handle.subscribe()?;
            let stream = stream.try_clone()?;

            // Stream events on their own thread, so the control socket stays
            // responsive while subscribers are attached.
            thread::spawn("subscribe", move || {
                let mut writer = LineWriter::new(stream);

                for event in events {
                    if json::to_writer(&mut writer, &event)
                        .map_err(io::Error::from)
                        .and_then(|()| writer.write_all(b"\n"))
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
        Command::Shutdown => {
            return Err(CommandError::Shutdown);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::prelude::*;
    use std::os::unix::net::UnixStream;
    use std::thread;

    use super::*;
    use weft::node::{Handle as _, Node};
    use weft::test::arbitrary;

    use crate::test::handle;

    fn connect(socket: &std::path::Path) -> UnixStream {
        loop {
            if let Ok(stream) = UnixStream::connect(socket) {
                break stream;
            }
        }
    }

    #[test]
    fn test_control_socket_add_route() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("node.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let handle = handle::Handle::default();

        thread::spawn({
            let handle = handle.clone();

            move || listen(listener, handle)
        });

        let route = arbitrary::gen::<weft::route::Route>(1);
        let stream = connect(&socket);

        Command::AddRoute {
            route: route.clone(),
        }
        .to_writer(&stream)
        .unwrap();

        let line = BufReader::new(stream).lines().next().unwrap().unwrap();
        assert_eq!(line, r#"{"updated":true,"success":true}"#);
        assert!(handle.routes.lock().unwrap().contains(&route));
    }

    #[test]
    fn test_control_socket_client() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("node.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        thread::spawn({
            let handle = handle::Handle::default();

            move || listen(listener, handle)
        });

        let mut node = Node::new(&socket);
        while !node.is_running() {}

        let peer = arbitrary::gen::<weft::peer::PeerInfo>(1);
        assert!(node.add_peer(peer.clone()).unwrap());
        assert_eq!(node.peers().unwrap().len(), 1);
        assert!(node.delete_peer(peer.name).unwrap());

        let routes = node.routes().unwrap();
        assert!(routes.local.is_empty());
        assert!(routes.internal.is_empty());
    }
}
