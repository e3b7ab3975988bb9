//! Socket and connection registries.
//!
//! The connection arena owns every open [`Connection`]; the socket map
//! resolves a ready descriptor reported by the multiplexer to either the
//! listener or a connection handle. Both are only touched from the loop
//! thread, and a connection leaves both in the same call.

use std::collections::VecDeque;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Instant;

use rustc_hash::FxHashMap;
use slab::Slab;
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionId, Inbound};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::HandshakeRequest;
use crate::server::handler::Event;

/// What a watched descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEntry {
    /// The listening socket.
    Listener,
    /// An accepted socket whose upgrade request has not arrived yet.
    Handshake,
    /// An open connection.
    Connection(ConnectionId),
}

/// An accepted socket waiting to become readable with its upgrade request.
#[derive(Debug)]
pub(crate) struct PendingHandshake {
    pub(crate) stream: TcpStream,
    pub(crate) peer: SocketAddr,
    pub(crate) deadline: Instant,
}

/// Live connections and the descriptors the loop watches.
#[derive(Debug, Default)]
pub struct Registry {
    connections: Slab<Connection>,
    handshakes: FxHashMap<RawFd, PendingHandshake>,
    sockets: FxHashMap<RawFd, SocketEntry>,
    events: VecDeque<Event>,
    generation: u64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn watch_listener(&mut self, fd: RawFd) {
        self.sockets.insert(fd, SocketEntry::Listener);
    }

    pub(crate) fn unwatch_listener(&mut self, fd: RawFd) {
        if self.sockets.get(&fd) == Some(&SocketEntry::Listener) {
            self.sockets.remove(&fd);
        }
    }

    /// Watch a freshly accepted, non-blocking socket for its upgrade request.
    pub(crate) fn await_handshake(&mut self, stream: TcpStream, peer: SocketAddr, deadline: Instant) {
        let fd = stream.as_raw_fd();
        self.sockets.insert(fd, SocketEntry::Handshake);
        self.handshakes.insert(
            fd,
            PendingHandshake {
                stream,
                peer,
                deadline,
            },
        );
    }

    /// Stop watching a pending handshake and hand its socket back.
    pub(crate) fn take_handshake(&mut self, fd: RawFd) -> Option<PendingHandshake> {
        let pending = self.handshakes.remove(&fd)?;
        self.sockets.remove(&fd);
        Some(pending)
    }

    /// Close every pending handshake whose deadline has passed.
    pub(crate) fn expire_handshakes(&mut self, now: Instant) -> usize {
        let expired: Vec<RawFd> = self
            .handshakes
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(fd, _)| *fd)
            .collect();
        for fd in &expired {
            if let Some(pending) = self.take_handshake(*fd) {
                debug!(peer = %pending.peer, "handshake timed out");
            }
        }
        expired.len()
    }

    /// Earliest pending handshake deadline.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.handshakes.values().map(|pending| pending.deadline).min()
    }

    pub(crate) fn pending_streams(&self) -> impl Iterator<Item = &TcpStream> {
        self.handshakes.values().map(|pending| &pending.stream)
    }

    /// Register a socket whose 101 response has been written.
    pub(crate) fn insert(&mut self, stream: TcpStream, request: HandshakeRequest) -> Result<ConnectionId> {
        let entry = self.connections.vacant_entry();
        let id = ConnectionId::new(entry.key(), self.generation + 1);
        let mut connection = Connection::new(id, stream, request)?;
        connection.open();
        self.generation = id.generation;

        self.sockets
            .insert(connection.raw_fd(), SocketEntry::Connection(id));
        debug!(%id, peer = %connection.peer_addr(), uri = connection.uri(), "connection open");
        entry.insert(connection);
        self.events.push_back(Event::Connect(id));
        Ok(id)
    }

    /// Look up a connection.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections
            .get(id.slot)
            .filter(|connection| connection.id() == id)
    }

    fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections
            .get_mut(id.slot)
            .filter(|connection| connection.id() == id)
    }

    /// Whether `id` refers to a live connection.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.get(id).is_some()
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no connection is open.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Handles of every open connection.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections().map(Connection::id).collect()
    }

    /// Number of accepted sockets still waiting for their upgrade request.
    pub fn pending_handshakes(&self) -> usize {
        self.handshakes.len()
    }

    /// Number of watched descriptors, listener and pending handshakes included.
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Resolve a descriptor reported ready by the multiplexer.
    pub fn lookup(&self, fd: RawFd) -> Option<SocketEntry> {
        self.sockets.get(&fd).copied()
    }

    pub(crate) fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().map(|(_, connection)| connection)
    }

    /// Write a TEXT or BINARY message.
    ///
    /// On a write failure the connection is torn down and an error
    /// notification queued before the error is returned.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` for an unknown or stale handle, otherwise the
    /// write error.
    pub fn send(&mut self, id: ConnectionId, message: Message) -> Result<()> {
        let connection = self.get_mut(id).ok_or(Error::ConnectionClosed)?;
        match connection.send(&message) {
            Ok(()) => {
                self.events.push_back(Event::Send(id, message));
                Ok(())
            }
            Err(err) => {
                self.fail(id, err.clone());
                Err(err)
            }
        }
    }

    /// Send `message` to every open connection. Returns how many writes succeeded.
    pub fn broadcast(&mut self, message: &Message) -> usize {
        self.ids()
            .into_iter()
            .filter(|id| self.send(*id, message.clone()).is_ok())
            .count()
    }

    /// Write a CLOSE frame and tear the connection down.
    ///
    /// Returns `false`, doing nothing, if `id` is not live.
    pub fn close(&mut self, id: ConnectionId) -> bool {
        let Some(connection) = self.get_mut(id) else {
            return false;
        };
        if let Err(e) = connection.send_close() {
            trace!(%id, error = %e, "close frame not delivered");
        }
        self.remove(id)
    }

    /// Decode-and-react once on a ready connection. Unknown handles are ignored.
    pub(crate) fn service(&mut self, id: ConnectionId, max_packet: usize, max_payload: usize) {
        let Some(connection) = self.get_mut(id) else {
            return;
        };
        match connection.read_inbound(max_packet, max_payload) {
            Ok(Inbound::Nothing) => {}
            Ok(Inbound::Message(message)) => self.events.push_back(Event::Receive(id, message)),
            Ok(Inbound::Closed) => {
                self.remove(id);
            }
            Err(err) => self.fail(id, err),
        }
    }

    /// Queue an error notification, then tear the connection down.
    pub(crate) fn fail(&mut self, id: ConnectionId, err: Error) {
        debug!(%id, error = %err, "connection failed");
        self.events.push_back(Event::Error(Some(id), err));
        self.remove(id);
    }

    /// Queue a loop-level error notification.
    pub(crate) fn report(&mut self, err: Error) {
        self.events.push_back(Event::Error(None, err));
    }

    /// Remove from both registries, shut the socket down and queue the
    /// disconnect notification. The descriptor closes once that is delivered.
    pub(crate) fn remove(&mut self, id: ConnectionId) -> bool {
        if !self.contains(id) {
            return false;
        }
        let mut connection = self.connections.remove(id.slot);
        self.sockets.remove(&connection.raw_fd());
        connection.shutdown();
        debug!(%id, "connection closed");
        self.events.push_back(Event::Disconnect(Box::new(connection)));
        true
    }

    /// Remove every connection and drop every pending handshake.
    pub(crate) fn remove_all(&mut self) {
        let pending: Vec<RawFd> = self.handshakes.keys().copied().collect();
        for fd in pending {
            self.take_handshake(fd);
        }
        for id in self.ids() {
            self.remove(id);
        }
    }

    /// Queue one idle notification per open connection.
    pub(crate) fn idle_all(&mut self) {
        for (_, connection) in &self.connections {
            if connection.is_open() {
                self.events.push_back(Event::Idle(connection.id()));
            }
        }
    }

    pub(crate) fn next_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }
}
