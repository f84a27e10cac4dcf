use classchat_domain::{Message, RoomId, UserId};
use classchat_protocol::{
	DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_MESSAGE_SIZE, Envelope, EventKind, FramingError, decode_envelope,
	encode_envelope, encode_envelope_default, validate_inbound_body,
};
use proptest::prelude::*;

fn message(body: &str) -> Message {
	Message::new(
		RoomId::new("soen-490").expect("valid RoomId"),
		1_700_000_000_123_456,
		UserId::new("u1").expect("valid UserId"),
		body,
	)
}

#[test]
fn envelope_wire_shape_matches_clients() {
	let text = encode_envelope_default(&Envelope::send(message("hi"))).expect("encode");
	let v: serde_json::Value = serde_json::from_str(&text).expect("json");

	assert_eq!(v["kind"], "send");
	assert_eq!(v["message"]["room_id"], "soen-490");
	assert_eq!(v["message"]["sent_timestamp"], 1_700_000_000_123_456_i64);
	assert_eq!(v["message"]["from_user_id"], "u1");
	assert_eq!(v["message"]["body"], "hi");
}

#[test]
fn decode_accepts_client_written_json() {
	let src = r#"{"kind":"edit","message":{"room_id":"r1","sent_timestamp":5,"from_user_id":"u2","body":"bye"}}"#;
	let env = decode_envelope(src, DEFAULT_MAX_FRAME_SIZE).expect("decode");
	assert_eq!(env.kind, EventKind::Edit);
	assert_eq!(env.message.body, "bye");
	assert_eq!(env.message.from_user_id.as_str(), "u2");
}

#[test]
fn decode_rejects_oversized_before_parsing() {
	let src = "x".repeat(DEFAULT_MAX_FRAME_SIZE + 1);
	match decode_envelope(&src, DEFAULT_MAX_FRAME_SIZE) {
		Err(FramingError::FrameTooLarge { len, max }) => {
			assert_eq!(len, DEFAULT_MAX_FRAME_SIZE + 1);
			assert_eq!(max, DEFAULT_MAX_FRAME_SIZE);
		}
		other => panic!("expected FrameTooLarge, got: {other:?}"),
	}
}

#[test]
fn decode_rejects_empty_room_id() {
	let src = r#"{"kind":"send","message":{"room_id":"","sent_timestamp":5,"from_user_id":"u2","body":"x"}}"#;
	match decode_envelope(src, DEFAULT_MAX_FRAME_SIZE) {
		Err(FramingError::Json(_)) => {}
		other => panic!("expected Json error, got: {other:?}"),
	}
}

#[test]
fn max_size_inbound_body_still_fits_an_envelope() {
	let body = "é".repeat(DEFAULT_MAX_MESSAGE_SIZE / 2);
	assert!(validate_inbound_body(&body, DEFAULT_MAX_MESSAGE_SIZE).is_ok());
	encode_envelope(&Envelope::send(message(&body)), DEFAULT_MAX_FRAME_SIZE).expect("fits");
}

proptest! {
	#[test]
	fn inbound_size_cap_is_exact(body in "[a-z]{1,64}", max in 1usize..64) {
		let res = validate_inbound_body(&body, max);
		if body.len() > max {
			prop_assert!(
				matches!(res, Err(FramingError::FrameTooLarge { .. })),
				"expected FrameTooLarge for len={} max={}", body.len(), max
			);
		} else {
			prop_assert!(res.is_ok());
		}
	}

	#[test]
	fn any_body_survives_the_codec(body in any::<String>()) {
		let env = Envelope::delete(message(&body));
		let text = encode_envelope(&env, usize::MAX).expect("encode");
		let back = decode_envelope(&text, usize::MAX).expect("decode");
		prop_assert_eq!(back, env);
	}
}
