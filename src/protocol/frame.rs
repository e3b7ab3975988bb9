//! WebSocket frame encoding and decoding (RFC 6455 Section 5.2).
//!
//! Pure functions, no I/O. The server never fragments: every encoded frame has
//! FIN set and server frames are never masked.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                  Masking key (if MASK is set)                 |
//! +---------------------------------------------------------------+
//! |                         Payload data                          |
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Largest payload whose length fits in the 7-bit field.
pub const MAX_INLINE_PAYLOAD: usize = 125;

const LEN_16_MARKER: u8 = 126;
const LEN_64_MARKER: u8 = 127;
const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;

/// A decoded WebSocket frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a frame from its parts.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            opcode,
            payload,
        }
    }

    /// Get the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Outcome of [`decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A whole frame was present at the start of the buffer.
    Frame {
        /// The decoded frame.
        frame: Frame,
        /// Bytes of the buffer the frame occupied.
        consumed: usize,
    },
    /// The buffer ends before the frame does.
    Incomplete {
        /// Additional bytes required to finish the frame.
        needed: usize,
    },
}

/// Number of bytes [`encode`] produces for a payload of `payload_len` bytes.
#[must_use]
pub const fn wire_size(payload_len: usize, masked: bool) -> usize {
    let ext = if payload_len <= MAX_INLINE_PAYLOAD {
        0
    } else if payload_len <= u16::MAX as usize {
        2
    } else {
        8
    };
    let mask = if masked { 4 } else { 0 };
    2 + ext + mask + payload_len
}

/// Encode a server frame: FIN set, unmasked.
#[must_use]
pub fn encode(opcode: OpCode, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(wire_size(payload.len(), false));
    encode_into(&mut buf, opcode, payload, None);
    buf.freeze()
}

/// Encode a client frame masked with `mask`.
///
/// The server never sends these; they are what a conforming peer puts on the wire.
#[must_use]
pub fn encode_masked(opcode: OpCode, payload: &[u8], mask: [u8; 4]) -> Bytes {
    let mut buf = BytesMut::with_capacity(wire_size(payload.len(), true));
    encode_into(&mut buf, opcode, payload, Some(mask));
    buf.freeze()
}

fn encode_into(buf: &mut BytesMut, opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) {
    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    let len = payload.len();

    buf.put_u8(FIN_BIT | opcode.as_u8());
    if len <= MAX_INLINE_PAYLOAD {
        buf.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(mask_bit | LEN_16_MARKER);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(mask_bit | LEN_64_MARKER);
        buf.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            buf.put_slice(&key);
            let start = buf.len();
            buf.put_slice(payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.put_slice(payload),
    }
}

/// Decode the frame at the start of `buf`.
///
/// Declared payload lengths above `max_payload` are rejected before any
/// allocation happens.
///
/// # Errors
///
/// - `Error::ReservedOpcode` if byte 0 carries a reserved opcode
/// - `Error::FrameTooLarge` if the declared length exceeds `max_payload`
pub fn decode(buf: &[u8], max_payload: usize) -> Result<Decoded> {
    if buf.len() < 2 {
        return Ok(Decoded::Incomplete {
            needed: 2 - buf.len(),
        });
    }

    let fin = buf[0] & FIN_BIT != 0;
    let opcode = OpCode::from_u8(buf[0] & 0x0F)?;
    let masked = buf[1] & MASK_BIT != 0;

    let (declared, mut offset) = match buf[1] & 0x7F {
        LEN_16_MARKER => {
            if buf.len() < 4 {
                return Ok(Decoded::Incomplete {
                    needed: 4 - buf.len(),
                });
            }
            (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
        }
        LEN_64_MARKER => {
            if buf.len() < 10 {
                return Ok(Decoded::Incomplete {
                    needed: 10 - buf.len(),
                });
            }
            let len = buf[2..10]
                .iter()
                .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
            (len, 10)
        }
        inline => (u64::from(inline), 2),
    };

    let payload_len = usize::try_from(declared)
        .ok()
        .filter(|len| *len <= max_payload)
        .ok_or(Error::FrameTooLarge {
            size: declared,
            max: max_payload,
        })?;

    let mask = if masked {
        if buf.len() < offset + 4 {
            return Ok(Decoded::Incomplete {
                needed: offset + 4 - buf.len(),
            });
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    let total = offset + payload_len;
    if buf.len() < total {
        return Ok(Decoded::Incomplete {
            needed: total - buf.len(),
        });
    }

    let mut payload = buf[offset..total].to_vec();
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Decoded::Frame {
        frame: Frame::new(fin, opcode, payload),
        consumed: total,
    })
}
