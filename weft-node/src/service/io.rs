//! Service I/O outbox.
use std::collections::VecDeque;

use log::*;

use weft::peer::{Address, NodeName};

use crate::service::message::Message;
use crate::service::DisconnectReason;

/// I/O operation to execute at the transport level.
#[derive(Debug)]
pub enum Io {
    /// There are some messages ready to be sent to a peer.
    Write(NodeName, Vec<Message>),
    /// Connect to a peer.
    Connect(NodeName, Address),
    /// Disconnect from a peer, sending CLOSE best-effort.
    Disconnect(NodeName, DisconnectReason),
}

/// Interface to the network.
#[derive(Debug, Default)]
pub struct Outbox {
    /// Outgoing I/O queue.
    io: VecDeque<Io>,
}

impl Outbox {
    /// Connect to a peer.
    pub fn connect(&mut self, name: NodeName, addr: Address) {
        self.io.push_back(Io::Connect(name, addr));
    }

    /// Disconnect a peer.
    pub fn disconnect(&mut self, name: NodeName, reason: DisconnectReason) {
        self.io.push_back(Io::Disconnect(name, reason));
    }

    /// Queue a message for a peer.
    pub fn write(&mut self, remote: &NodeName, msg: Message) {
        trace!(target: "service", "Write {:?} to {}", &msg, remote);

        self.io.push_back(Io::Write(remote.clone(), vec![msg]));
    }

    /// Queue a batch of messages for a peer. The batch is delivered as a
    /// unit: no frames from a later commit are interleaved with it.
    pub fn write_all(&mut self, remote: &NodeName, msgs: impl IntoIterator<Item = Message>) {
        let msgs = msgs.into_iter().collect::<Vec<_>>();

        for (ix, msg) in msgs.iter().enumerate() {
            trace!(
                target: "service",
                "Write {:?} to {} ({}/{})",
                msg,
                remote,
                ix + 1,
                msgs.len()
            );
        }
        self.io.push_back(Io::Write(remote.clone(), msgs));
    }

    /// Broadcast a message to a list of peers.
    pub fn broadcast<'a>(
        &mut self,
        msg: Message,
        peers: impl IntoIterator<Item = &'a NodeName>,
    ) {
        for peer in peers {
            self.write(peer, msg.clone());
        }
    }

    #[cfg(any(test, feature = "test"))]
    pub(crate) fn queue(&mut self) -> &mut VecDeque<Io> {
        &mut self.io
    }
}

impl Iterator for Outbox {
    type Item = Io;

    fn next(&mut self) -> Option<Self::Item> {
        self.io.pop_front()
    }
}
