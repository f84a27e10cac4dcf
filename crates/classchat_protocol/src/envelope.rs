#![forbid(unsafe_code)]

use classchat_domain::Message;
use serde::{Deserialize, Serialize};

/// What happened to the carried message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
	Send,
	Edit,
	Delete,
}

impl EventKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			EventKind::Send => "send",
			EventKind::Edit => "edit",
			EventKind::Delete => "delete",
		}
	}
}

/// Outbound frame: `{"kind": ..., "message": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
	pub kind: EventKind,
	pub message: Message,
}

impl Envelope {
	pub fn send(message: Message) -> Self {
		Self {
			kind: EventKind::Send,
			message,
		}
	}

	pub fn edit(message: Message) -> Self {
		Self {
			kind: EventKind::Edit,
			message,
		}
	}

	pub fn delete(message: Message) -> Self {
		Self {
			kind: EventKind::Delete,
			message,
		}
	}
}
