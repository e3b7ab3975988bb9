//! Application payloads surfaced to and accepted from collaborators.

use crate::protocol::OpCode;

/// A data message carried by a single TEXT or BINARY frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message.
    Binary(Vec<u8>),
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    /// Opcode used on the wire.
    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
        }
    }

    /// Payload bytes as sent on the wire.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Message::Text(s) => s.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    /// Returns the text content if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            Message::Binary(_) => None,
        }
    }

    /// Returns `true` if this is a text message.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_opcode() {
        assert_eq!(Message::text("hi").opcode(), OpCode::Text);
        assert_eq!(Message::binary(vec![1]).opcode(), OpCode::Binary);
    }

    #[test]
    fn test_message_payload() {
        assert_eq!(Message::text("hi").payload(), b"hi");
        assert_eq!(Message::binary(vec![1, 2]).payload(), &[1, 2]);
    }

    #[test]
    fn test_message_from() {
        assert_eq!(Message::from("a"), Message::Text("a".into()));
        assert_eq!(Message::from(vec![3u8]), Message::Binary(vec![3]));
        assert!(Message::from(String::from("b")).is_text());
        assert_eq!(Message::binary(vec![0]).as_text(), None);
    }
}
