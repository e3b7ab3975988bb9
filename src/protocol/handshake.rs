//! WebSocket handshake implementation (RFC 6455 Section 4.2).
//!
//! The request is split on CRLF. The first line must match the request-line
//! pattern and every following non-empty line the `Name: Value` pattern; the
//! first line matching neither aborts the handshake without a response. A
//! well-formed request that lacks `Upgrade` or `Sec-WebSocket-Key` is answered
//! with `400 Bad Request`.

use std::collections::HashMap;
use std::sync::LazyLock;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use regex::Regex;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Response sent when the upgrade headers are missing.
pub const BAD_REQUEST_RESPONSE: &[u8] = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n";

static REQUEST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z]+) (\S+) HTTP/\d\.\d$").expect("request-line pattern is valid")
});

static HEADER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([!#$%&'*+.^_`|~0-9A-Za-z-]+):[ \t]*(.*?)[ \t]*$")
        .expect("header-line pattern is valid")
});

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsloop::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Refuse a value that would end the header line early.
fn reject_line_breaks(header: &str, value: &str) -> Result<()> {
    match value.find(['\r', '\n']) {
        Some(at) => Err(Error::InvalidHeaderValue {
            header: header.to_owned(),
            reason: format!("line break at byte {at}"),
        }),
        None => Ok(()),
    }
}

/// Handshake metadata captured from the client's upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// HTTP method from the request line.
    pub method: String,
    /// Request URI from the request line.
    pub uri: String,
    /// Headers keyed by lowercase name. A repeated header keeps its last value.
    pub headers: HashMap<String, String>,
}

impl HandshakeRequest {
    /// Parse an upgrade request from raw bytes.
    ///
    /// # Errors
    ///
    /// - `Error::MalformedRequest` if there is no request line, the data is not
    ///   UTF-8, or a line matches neither pattern
    /// - `Error::InvalidHandshake` if `Upgrade` or `Sec-WebSocket-Key` is absent
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::MalformedRequest("request is not UTF-8".into()))?;

        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let captures = REQUEST_LINE
            .captures(request_line)
            .ok_or_else(|| Error::MalformedRequest(format!("bad request line: {request_line:?}")))?;
        let method = captures[1].to_string();
        let uri = captures[2].to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let captures = HEADER_LINE
                .captures(line)
                .ok_or_else(|| Error::MalformedRequest(format!("bad header line: {line:?}")))?;
            headers.insert(captures[1].to_ascii_lowercase(), captures[2].to_string());
        }

        let request = Self {
            method,
            uri,
            headers,
        };

        if request.header("upgrade").is_none() {
            return Err(Error::InvalidHandshake("Missing Upgrade header".into()));
        }
        if request.key().is_none() {
            return Err(Error::InvalidHandshake(
                "Missing Sec-WebSocket-Key header".into(),
            ));
        }

        Ok(request)
    }

    /// Parse a handshake request with size limit.
    ///
    /// # Errors
    ///
    /// - `Error::HandshakeTooLarge` if data exceeds max_size
    /// - Other handshake errors as per `parse()`
    pub fn parse_with_limit(data: &[u8], max_size: usize) -> Result<Self> {
        if data.len() > max_size {
            return Err(Error::HandshakeTooLarge {
                size: data.len(),
                max: max_size,
            });
        }
        Self::parse(data)
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The Sec-WebSocket-Key value.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.header("sec-websocket-key")
    }

    /// The Sec-WebSocket-Protocol value, exactly as the client sent it.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.header("sec-websocket-protocol")
    }
}

/// The `101 Switching Protocols` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
    /// Echoed Sec-WebSocket-Protocol, if the client requested one.
    pub protocol: Option<String>,
}

impl HandshakeResponse {
    /// Build the response for a parsed request.
    ///
    /// The requested subprotocol is echoed verbatim; no selection is made.
    #[must_use]
    pub fn from_request(req: &HandshakeRequest) -> Self {
        Self {
            accept: compute_accept_key(req.key().unwrap_or_default()),
            protocol: req.protocol().map(str::to_string),
        }
    }

    /// Append the response head to `buf`. `buf` is untouched on error.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHeaderValue` if the echoed protocol contains CR or LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        let mut head = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n",
            self.accept
        );
        if let Some(protocol) = &self.protocol {
            reject_line_breaks("Sec-WebSocket-Protocol", protocol)?;
            head.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
        }
        head.push_str("\r\n");
        buf.extend_from_slice(head.as_bytes());
        Ok(())
    }
}
