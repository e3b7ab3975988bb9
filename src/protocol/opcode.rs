//! Frame opcodes (RFC 6455 section 5.2).

use std::fmt;

use crate::error::{Error, Result};

/// The low four bits of the first header byte.
///
/// Only the six assigned values exist; 0x3-0x7 and 0xB-0xF are reserved and
/// rejected on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// 0x0. Never produced by this server.
    Continuation = 0x0,
    /// 0x1, UTF-8 payload.
    Text = 0x1,
    /// 0x2.
    Binary = 0x2,
    /// 0x8.
    Close = 0x8,
    /// 0x9. Answered with a Pong and never surfaced.
    Ping = 0x9,
    /// 0xA.
    Pong = 0xA,
}

impl OpCode {
    /// Interpret a four-bit opcode field.
    ///
    /// # Errors
    ///
    /// `Error::ReservedOpcode` for an unassigned nibble, `Error::InvalidFrame`
    /// for a value wider than four bits.
    pub fn from_u8(byte: u8) -> Result<Self> {
        Self::try_from(byte)
    }

    /// The wire value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for OpCode {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        Ok(match byte {
            0x0 => OpCode::Continuation,
            0x1 => OpCode::Text,
            0x2 => OpCode::Binary,
            0x8 => OpCode::Close,
            0x9 => OpCode::Ping,
            0xA => OpCode::Pong,
            0x3..=0x7 | 0xB..=0xF => return Err(Error::ReservedOpcode(byte)),
            _ => return Err(Error::InvalidFrame(format!("opcode out of range: {byte:#x}"))),
        })
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpCode::Continuation => "CONTINUATION",
            OpCode::Text => "TEXT",
            OpCode::Binary => "BINARY",
            OpCode::Close => "CLOSE",
            OpCode::Ping => "PING",
            OpCode::Pong => "PONG",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OpCode; 6] = [
        OpCode::Continuation,
        OpCode::Text,
        OpCode::Binary,
        OpCode::Close,
        OpCode::Ping,
        OpCode::Pong,
    ];

    #[test]
    fn test_assigned_values_decode() {
        for op in ALL {
            assert_eq!(OpCode::from_u8(op.as_u8()), Ok(op));
        }
        assert_eq!(OpCode::from_u8(0xA), Ok(OpCode::Pong));
    }

    #[test]
    fn test_reserved_values_rejected() {
        for nibble in (0x3..=0x7).chain(0xB..=0xF) {
            assert_eq!(OpCode::from_u8(nibble), Err(Error::ReservedOpcode(nibble)));
        }
        assert!(matches!(OpCode::try_from(0x10), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn test_display_uses_wire_names() {
        assert_eq!(OpCode::Text.to_string(), "TEXT");
        assert_eq!(OpCode::Pong.to_string(), "PONG");
    }
}
