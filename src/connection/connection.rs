use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::connection::{ConnectionId, ConnectionState};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::frame::{Decoded, Frame, decode, encode};
use crate::protocol::handshake::{BAD_REQUEST_RESPONSE, HandshakeRequest, HandshakeResponse};
use crate::protocol::OpCode;

/// Status code carried by server-initiated CLOSE frames (1000, normal closure).
const NORMAL_CLOSURE: [u8; 2] = 1000u16.to_be_bytes();

/// What one decode-and-react pass produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Nothing to surface: a control frame was handled, or the frame was incomplete.
    Nothing,
    /// A data message for collaborators.
    Message(Message),
    /// The peer sent CLOSE or hung up.
    Closed,
}

/// Run the server side of the upgrade handshake once the socket is readable.
///
/// Reads the request once (bounded by `max_handshake_size`), then answers with
/// `101 Switching Protocols`. A request that parses but lacks the upgrade
/// headers is answered with `400 Bad Request`; a malformed one gets no answer.
/// In every failure case the caller drops the socket.
///
/// The socket is expected to be non-blocking: `Ok(None)` means nothing could
/// be read yet and the socket should stay registered as a pending handshake.
///
/// # Errors
///
/// The parse error, `Error::ConnectionClosed` if the peer hung up first, or
/// `Error::Io` if the socket could not be read or written.
pub fn accept_handshake(stream: &mut TcpStream, config: &Config) -> Result<Option<HandshakeRequest>> {
    // One byte past the limit so an oversized request is detectable.
    let mut buf = vec![0u8; config.max_handshake_size + 1];
    let n = match stream.read(&mut buf) {
        Ok(0) => return Err(Error::ConnectionClosed),
        Ok(n) => n,
        Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let request = match HandshakeRequest::parse_with_limit(&buf[..n], config.max_handshake_size) {
        Ok(request) => request,
        Err(err) => {
            if err.wants_bad_request() {
                if let Err(io) = stream.write_all(BAD_REQUEST_RESPONSE) {
                    warn!(error = %io, "failed to write 400 response");
                }
            }
            return Err(err);
        }
    };

    let mut response = Vec::with_capacity(256);
    HandshakeResponse::from_request(&request).write(&mut response)?;
    stream.write_all(&response)?;

    Ok(Some(request))
}

/// One accepted WebSocket client.
///
/// Owned by the [`Registry`](crate::server::Registry); collaborators refer to it
/// through its [`ConnectionId`].
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
    request: HandshakeRequest,
    state: ConnectionState,
}

impl Connection {
    /// Wrap a socket whose handshake request has been read.
    ///
    /// The connection starts in `Handshaking`; call [`Connection::open`] once the
    /// 101 response has been written.
    pub fn new(id: ConnectionId, stream: TcpStream, request: HandshakeRequest) -> Result<Self> {
        let peer = stream.peer_addr()?;
        Ok(Self {
            id,
            peer,
            stream,
            request,
            state: ConnectionState::Handshaking,
        })
    }

    /// Mark the handshake as complete.
    pub fn open(&mut self) -> bool {
        self.state.advance(ConnectionState::Open)
    }

    /// Stable handle of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address of the socket.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the connection is open.
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// HTTP method of the upgrade request.
    pub fn method(&self) -> &str {
        &self.request.method
    }

    /// Request URI of the upgrade request.
    pub fn uri(&self) -> &str {
        &self.request.uri
    }

    /// Upgrade request headers, keyed by lowercase name.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.request.headers
    }

    /// Case-insensitive header lookup on the upgrade request.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    /// Raw descriptor, used as the socket identity in the registry.
    pub fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub(crate) fn borrow_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }

    /// Read once and react to the first frame in what arrived.
    ///
    /// PING is answered with PONG, PONG is dropped, CLOSE and end-of-stream
    /// yield [`Inbound::Closed`]. TEXT is trimmed of surrounding whitespace.
    /// A frame that did not arrive whole is discarded together with anything
    /// read after the first frame.
    ///
    /// # Errors
    ///
    /// Decode errors, `Error::InvalidUtf8` for a non-UTF-8 TEXT payload, and
    /// `Error::Io` for read or PONG write failures.
    pub fn read_inbound(&mut self, max_packet: usize, max_payload: usize) -> Result<Inbound> {
        let mut buf = vec![0u8; max_packet];
        let n = match self.stream.read(&mut buf) {
            Ok(0) => return Ok(Inbound::Closed),
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                return Ok(Inbound::Nothing);
            }
            Err(e) => return Err(e.into()),
        };

        match decode(&buf[..n], max_payload)? {
            Decoded::Incomplete { needed } => {
                debug!(id = %self.id, read = n, needed, "discarding incomplete frame");
                Ok(Inbound::Nothing)
            }
            Decoded::Frame { frame, consumed } => {
                if consumed < n {
                    debug!(id = %self.id, dropped = n - consumed, "discarding bytes after frame");
                }
                self.react(frame)
            }
        }
    }

    fn react(&mut self, frame: Frame) -> Result<Inbound> {
        trace!(id = %self.id, opcode = %frame.opcode, len = frame.payload().len(), "frame");
        match frame.opcode {
            OpCode::Ping => {
                self.write_frame(OpCode::Pong, frame.payload())?;
                Ok(Inbound::Nothing)
            }
            OpCode::Pong => Ok(Inbound::Nothing),
            OpCode::Close => Ok(Inbound::Closed),
            OpCode::Text => {
                let text = String::from_utf8(frame.into_payload()).map_err(|_| Error::InvalidUtf8)?;
                Ok(Inbound::Message(Message::Text(text.trim().to_string())))
            }
            OpCode::Binary => Ok(Inbound::Message(Message::Binary(frame.into_payload()))),
            OpCode::Continuation => {
                debug!(id = %self.id, "ignoring continuation frame");
                Ok(Inbound::Nothing)
            }
        }
    }

    /// Encode and write a single unmasked frame.
    ///
    /// The socket is non-blocking and output is never buffered: a peer that
    /// stops reading until its receive window fills surfaces as `Error::Io`.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` unless the connection is open, `Error::Io` if
    /// the write fails.
    pub fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        if !self.state.is_open() {
            return Err(Error::ConnectionClosed);
        }
        self.stream.write_all(&encode(opcode, payload))?;
        Ok(())
    }

    /// Send a data message.
    ///
    /// # Errors
    ///
    /// As [`Connection::write_frame`].
    pub fn send(&mut self, message: &Message) -> Result<()> {
        self.write_frame(message.opcode(), message.payload())
    }

    /// Write a CLOSE frame with status 1000.
    ///
    /// # Errors
    ///
    /// As [`Connection::write_frame`].
    pub fn send_close(&mut self) -> Result<()> {
        self.write_frame(OpCode::Close, &NORMAL_CLOSURE)
    }

    /// Shut the socket down and move to `Closed`.
    ///
    /// Returns `false` if the connection was already closed.
    pub fn shutdown(&mut self) -> bool {
        if !self.state.advance(ConnectionState::Closed) {
            return false;
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            trace!(id = %self.id, error = %e, "socket shutdown");
        }
        true
    }
}
