//! # wsloop - single-threaded WebSocket server engine
//!
//! `wsloop` accepts TCP clients, upgrades them with the RFC 6455 opening
//! handshake, and serves every connection from one thread blocked in `poll(2)`.
//!
//! ## Features
//!
//! - **RFC 6455 framing** with all three payload length encodings
//! - **Readiness multiplexing** over the listener and every open connection
//! - **Idle heartbeat** notifying each open connection once per interval
//! - **Typed notifications** through the [`Handler`] trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsloop::{Config, ConnectionId, EventLoop, Handler, Message, Registry};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn on_receive(&mut self, registry: &mut Registry, id: ConnectionId, message: Message) {
//!         let _ = registry.send(id, message);
//!     }
//! }
//!
//! EventLoop::bind(Config::new("127.0.0.1:8080"), Echo)?.run()?;
//! # Ok::<(), wsloop::Error>(())
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod server;

pub use config::Config;
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::{Error, Result};
pub use message::Message;
pub use protocol::{OpCode, WS_GUID, compute_accept_key};
pub use server::{EventLoop, Handler, LoopState, Registry, ShutdownHandle};
