//! WebSocket protocol core (RFC 6455): framing, masking and the upgrade handshake.

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use frame::{Decoded, Frame, decode, encode, encode_masked};
pub use handshake::{HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key};
pub use mask::{apply_mask, random_mask};
pub use opcode::OpCode;
