#![forbid(unsafe_code)]

use thiserror::Error;

use crate::envelope::Envelope;

/// Largest inbound text frame (message body) accepted from a client.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

/// Largest outbound envelope; body plus ids and JSON overhead.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("empty message body")]
	EmptyBody,

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Serialize an envelope into a text frame.
pub fn encode_envelope(env: &Envelope, max_frame_size: usize) -> Result<String, FramingError> {
	let text = serde_json::to_string(env)?;
	if text.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: text.len(),
			max: max_frame_size,
		});
	}
	Ok(text)
}

/// Encode using `DEFAULT_MAX_FRAME_SIZE`.
pub fn encode_envelope_default(env: &Envelope) -> Result<String, FramingError> {
	encode_envelope(env, DEFAULT_MAX_FRAME_SIZE)
}

/// Parse a text frame; the size check runs before any JSON work.
pub fn decode_envelope(src: &str, max_frame_size: usize) -> Result<Envelope, FramingError> {
	if src.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: src.len(),
			max: max_frame_size,
		});
	}
	Ok(serde_json::from_str(src)?)
}

/// Inbound frames are raw bodies. Rejects oversized and blank ones.
pub fn validate_inbound_body(text: &str, max_message_size: usize) -> Result<&str, FramingError> {
	if text.len() > max_message_size {
		return Err(FramingError::FrameTooLarge {
			len: text.len(),
			max: max_message_size,
		});
	}
	if text.trim().is_empty() {
		return Err(FramingError::EmptyBody);
	}
	Ok(text)
}

#[cfg(test)]
mod tests {
	use classchat_domain::{Message, RoomId, UserId};

	use super::*;

	fn msg(body: &str) -> Message {
		Message::new(
			RoomId::new("r1").expect("valid RoomId"),
			1_700_000_000_000_000,
			UserId::new("u1").expect("valid UserId"),
			body,
		)
	}

	#[test]
	fn kind_is_snake_case_on_the_wire() {
		let text = encode_envelope_default(&Envelope::delete(msg("x"))).expect("encode");
		assert!(text.contains(r#""kind":"delete""#), "{text}");
	}

	#[test]
	fn encode_rejects_too_large() {
		let err = encode_envelope(&Envelope::send(msg(&"a".repeat(200))), 64).unwrap_err();
		match err {
			FramingError::FrameTooLarge { len, max } => {
				assert!(len > max);
				assert_eq!(max, 64);
			}
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[test]
	fn inbound_body_limits() {
		assert_eq!(validate_inbound_body("hi", 4).expect("ok"), "hi");
		assert!(matches!(validate_inbound_body("hello", 4), Err(FramingError::FrameTooLarge { .. })));
		assert!(matches!(validate_inbound_body(" \n", 4), Err(FramingError::EmptyBody)));
	}
}
