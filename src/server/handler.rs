//! Typed notification slots for collaborators.

use crate::connection::{Connection, ConnectionId};
use crate::error::Error;
use crate::message::Message;
use crate::server::Registry;

/// Receives the event loop's notifications.
///
/// Every method has a no-op default, so implementors only override what they
/// consume. Each call gets the [`Registry`] so a handler can send to or close
/// connections; notifications caused by those calls are delivered after the
/// current one returns, never re-entrantly.
pub trait Handler {
    /// The loop entered RUNNING.
    fn on_start(&mut self, _registry: &mut Registry) {}

    /// The loop reached SHUTDOWN; every socket is already closed.
    fn on_stop(&mut self, _registry: &mut Registry) {}

    /// A handshake completed and the connection is registered.
    fn on_connect(&mut self, _registry: &mut Registry, _id: ConnectionId) {}

    /// A connection was removed from both registries.
    fn on_disconnect(&mut self, _registry: &mut Registry, _connection: &Connection) {}

    /// A TEXT or BINARY frame was written. Control frames never notify.
    fn on_send(&mut self, _registry: &mut Registry, _id: ConnectionId, _message: &Message) {}

    /// A TEXT or BINARY frame arrived.
    fn on_receive(&mut self, _registry: &mut Registry, _id: ConnectionId, _message: Message) {}

    /// The idle interval elapsed.
    fn on_idle(&mut self, _registry: &mut Registry, _id: ConnectionId) {}

    /// A connection failed (`Some`) or the loop itself hit an error (`None`).
    fn on_error(&mut self, _registry: &mut Registry, _id: Option<ConnectionId>, _error: &Error) {}
}

/// Notification queued by the registry, awaiting dispatch.
#[derive(Debug)]
pub(crate) enum Event {
    Connect(ConnectionId),
    Disconnect(Box<Connection>),
    Send(ConnectionId, Message),
    Receive(ConnectionId, Message),
    Idle(ConnectionId),
    Error(Option<ConnectionId>, Error),
}
