//! Peer transport.
//!
//! Blocking sockets with one reader and one writer thread per session.
//! Readers decode frames and post them to the service loop; writers drain a
//! bounded queue. Everything protocol-level (handshakes, validation, timers)
//! lives in the service; this module only moves frames.
use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{self, Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time;

use crossbeam_channel as chan;
use log::*;

use weft::peer::{Address, NodeName};

use crate::runtime::{thread, Control};
use crate::service::message::Message;
use crate::service::DisconnectReason;
use crate::wire;

/// Frames a peer writer will buffer before the session is closed for
/// backpressure.
pub const QUEUE_CAPACITY: usize = 1024;
/// Outbound dial deadline, per resolved address.
pub const DIAL_TIMEOUT: time::Duration = time::Duration::from_secs(5);
/// How long an accepted connection has to present its OPEN.
pub const HANDSHAKE_TIMEOUT: time::Duration = time::Duration::from_secs(10);
/// Deadline for flushing queued frames, including CLOSE, on teardown.
pub const DRAIN_TIMEOUT: time::Duration = time::Duration::from_secs(5);

/// The write side of an active peer connection.
struct Conn {
    send: chan::Sender<Message>,
}

/// Socket plumbing for peer sessions. Owned by the service loop.
pub struct Transport {
    /// Channel into the service loop.
    inputs: chan::Sender<Control>,
    /// Active connections by peer name.
    conns: HashMap<NodeName, Conn>,
    /// Bound listener addresses, for shutdown wakeups.
    listeners: Vec<net::SocketAddr>,
    /// Flag observed by accept loops.
    closing: Arc<AtomicBool>,
}

impl Transport {
    pub fn new(inputs: chan::Sender<Control>) -> Self {
        Self {
            inputs,
            conns: HashMap::new(),
            listeners: Vec::new(),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind a peer listener and spawn its accept loop.
    pub fn listen(&mut self, addr: net::SocketAddr) -> io::Result<net::SocketAddr> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let inputs = self.inputs.clone();
        let closing = self.closing.clone();

        self.listeners.push(local_addr);
        thread::spawn(format!("accept {local_addr}"), move || {
            accept_loop(listener, inputs, closing)
        });

        Ok(local_addr)
    }

    /// Dial a peer in the background. The outcome arrives as a
    /// [`Control::Dialed`] or [`Control::Disconnected`] input.
    pub fn connect(&self, name: NodeName, addr: Address) {
        let inputs = self.inputs.clone();

        thread::spawn(format!("dial {name}"), move || match dial(&addr) {
            Ok(stream) => {
                inputs.send(Control::Dialed { peer: name, stream }).ok();
            }
            Err(e) => {
                inputs
                    .send(Control::Disconnected {
                        peer: name,
                        reason: DisconnectReason::Dial(e.to_string()),
                    })
                    .ok();
            }
        });
    }

    /// Register a connected stream, spawning its reader and writer. An
    /// existing connection to the same peer is dropped.
    pub fn register(&mut self, name: NodeName, stream: TcpStream) {
        if self.conns.remove(&name).is_some() {
            debug!(target: "transport", "Replacing existing connection to {name}");
        }
        stream.set_nodelay(true).ok();
        stream.set_write_timeout(Some(DRAIN_TIMEOUT)).ok();

        let reader = match stream.try_clone() {
            Ok(stream) => stream,
            Err(e) => {
                self.inputs
                    .send(Control::Disconnected {
                        peer: name,
                        reason: DisconnectReason::Connection(e.to_string()),
                    })
                    .ok();
                return;
            }
        };
        let (send, recv) = chan::bounded::<Message>(QUEUE_CAPACITY);

        thread::spawn(format!("{name} reader"), {
            let inputs = self.inputs.clone();
            let peer = name.clone();

            move || reader_loop(reader, peer, inputs)
        });
        thread::spawn(format!("{name} writer"), {
            let inputs = self.inputs.clone();
            let peer = name.clone();

            move || writer_loop(stream, peer, recv, inputs)
        });
        self.conns.insert(name, Conn { send });
    }

    /// Queue messages for a peer. Overflowing the bounded queue closes the
    /// session.
    pub fn send(&mut self, name: &NodeName, msgs: Vec<Message>) {
        let Some(conn) = self.conns.get(name) else {
            debug!(target: "transport", "Dropping {} message(s) for unconnected peer {name}", msgs.len());
            return;
        };
        for msg in msgs {
            match conn.send.try_send(msg) {
                Ok(()) => {}
                Err(chan::TrySendError::Full(_)) => {
                    warn!(target: "transport", "Send queue for {name} overflowed");

                    self.conns.remove(name);
                    self.inputs
                        .send(Control::Disconnected {
                            peer: name.clone(),
                            reason: DisconnectReason::Backpressure,
                        })
                        .ok();
                    return;
                }
                Err(chan::TrySendError::Disconnected(_)) => {
                    // Writer is gone; its exit path reports the disconnect.
                    self.conns.remove(name);
                    return;
                }
            }
        }
    }

    /// Tear a session down, writing CLOSE best-effort. Dropping the queue
    /// sender lets the writer flush whatever is already enqueued.
    pub fn disconnect(&mut self, name: &NodeName, reason: &DisconnectReason) {
        let Some(conn) = self.conns.remove(name) else {
            return;
        };
        if reason.notify_peer() {
            conn.send.try_send(Message::close(reason)).ok();
        }
    }

    /// Refuse a freshly accepted connection with a CLOSE.
    pub fn refuse(&self, stream: TcpStream, reason: String) {
        thread::spawn("refuse", move || {
            let mut writer = BufWriter::new(stream);

            wire::write_frame(&mut writer, &Message::close(reason)).ok();
            writer.flush().ok();
        });
    }

    /// Stop accepting and close every remaining connection.
    pub fn shutdown(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        for addr in &self.listeners {
            // Wake the accept loop so it observes the flag.
            TcpStream::connect(addr).ok();
        }
        for (_, conn) in self.conns.drain() {
            conn.send
                .try_send(Message::close(DisconnectReason::Shutdown))
                .ok();
        }
    }
}

fn dial(addr: &Address) -> io::Result<TcpStream> {
    let mut last_err =
        io::Error::new(io::ErrorKind::NotFound, format!("no addresses for `{addr}`"));

    for sock in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sock, DIAL_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn accept_loop(listener: TcpListener, inputs: chan::Sender<Control>, closing: Arc<AtomicBool>) {
    for incoming in listener.incoming() {
        if closing.load(Ordering::SeqCst) {
            break;
        }
        match incoming {
            Ok(stream) => {
                let inputs = inputs.clone();
                let addr = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| String::from("?"));

                thread::spawn(format!("handshake {addr}"), move || {
                    if let Err(e) = handshake(stream, inputs) {
                        debug!(target: "transport", "Inbound connection from {addr} failed: {e}");
                    }
                });
            }
            Err(e) => {
                error!(target: "transport", "Failed to accept incoming connection: {e}");
            }
        }
    }
    debug!(target: "transport", "Accept loop exiting..");
}

/// Wait for an inbound connection's first frame, which must be OPEN, then
/// hand the stream to the service loop.
fn handshake(stream: TcpStream, inputs: chan::Sender<Control>) -> Result<(), wire::Error> {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

    // Nb. Unbuffered read, so no bytes beyond the first frame are consumed
    // before the stream is handed off to its session reader.
    let mut first = stream.try_clone().map_err(wire::Error::from)?;
    let message: Message = wire::read_frame(&mut first)?;

    let Message::Open(open) = message else {
        debug!(target: "transport", "Inbound connection did not start with OPEN; dropping");
        return Ok(());
    };
    stream.set_read_timeout(None)?;
    inputs.send(Control::Accepted { open, stream }).ok();

    Ok(())
}

fn reader_loop(stream: TcpStream, peer: NodeName, inputs: chan::Sender<Control>) {
    let mut reader = BufReader::new(stream);

    loop {
        match wire::read_frame::<_, Message>(&mut reader) {
            Ok(message) => {
                if inputs
                    .send(Control::Received {
                        peer: peer.clone(),
                        message,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                let reason = if e.is_eof() {
                    DisconnectReason::Connection(String::from("connection reset by peer"))
                } else {
                    // A decode failure closes the session; the teardown path
                    // writes a CLOSE with the reason.
                    DisconnectReason::Session(e.to_string())
                };
                inputs
                    .send(Control::Disconnected { peer, reason })
                    .ok();
                break;
            }
        }
    }
}

fn writer_loop(
    stream: TcpStream,
    peer: NodeName,
    queue: chan::Receiver<Message>,
    inputs: chan::Sender<Control>,
) {
    let mut writer = BufWriter::new(match stream.try_clone() {
        Ok(stream) => stream,
        Err(e) => {
            inputs
                .send(Control::Disconnected {
                    peer,
                    reason: DisconnectReason::Connection(e.to_string()),
                })
                .ok();
            return;
        }
    });

    // Frames queued before the sender is dropped are still delivered, so a
    // teardown CLOSE drains before the socket is shut down.
    while let Ok(msg) = queue.recv() {
        let result = wire::write_frame(&mut writer, &msg).and_then(|_| {
            if queue.is_empty() {
                writer.flush().map_err(wire::Error::from)
            } else {
                Ok(())
            }
        });
        if let Err(e) = result {
            inputs
                .send(Control::Disconnected {
                    peer,
                    reason: DisconnectReason::Connection(e.to_string()),
                })
                .ok();
            return;
        }
    }
    writer.flush().ok();
    stream.shutdown(Shutdown::Both).ok();
}
