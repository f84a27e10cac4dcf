#![forbid(unsafe_code)]

pub mod envelope;
pub mod framing;

pub use envelope::{Envelope, EventKind};
pub use framing::{
	DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_MESSAGE_SIZE, FramingError, decode_envelope, encode_envelope,
	encode_envelope_default, validate_inbound_body,
};
