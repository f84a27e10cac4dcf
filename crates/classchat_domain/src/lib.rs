#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod error;
mod model;

pub use error::{ErrorKind, ServiceError};
pub use model::{MemberView, Message, Room, RoomView, User, UserRooms};

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Externally assigned room (group) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
	/// Create a non-empty `RoomId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		if id.contains(['/', '?', '#']) {
			return Err(ParseIdError::InvalidFormat(id));
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomId::new(s.to_string())
	}
}

impl TryFrom<String> for RoomId {
	type Error = ParseIdError;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		RoomId::new(s)
	}
}

impl From<RoomId> for String {
	fn from(id: RoomId) -> Self {
		id.0
	}
}

/// User identifier mirrored from the profile service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
	/// Create a non-empty `UserId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for UserId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserId::new(s.to_string())
	}
}

impl TryFrom<String> for UserId {
	type Error = ParseIdError;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		UserId::new(s)
	}
}

impl From<UserId> for String {
	fn from(id: UserId) -> Self {
		id.0
	}
}

/// Identity of one live connection's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub uuid::Uuid);

impl SubscriptionId {
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ids_parse_and_display() {
		let room: RoomId = "soen-490".parse().unwrap();
		assert_eq!(room.to_string(), "soen-490");
		let user: UserId = "u-1".parse().unwrap();
		assert_eq!(user.as_str(), "u-1");
	}

	#[test]
	fn rejects_empty_ids() {
		assert_eq!(RoomId::new(""), Err(ParseIdError::Empty));
		assert_eq!(UserId::new("   "), Err(ParseIdError::Empty));
	}

	#[test]
	fn room_ids_cannot_carry_url_delimiters() {
		assert!(matches!(RoomId::new("a/b"), Err(ParseIdError::InvalidFormat(_))));
		assert!(matches!(RoomId::new("a?b"), Err(ParseIdError::InvalidFormat(_))));
	}

	#[test]
	fn subscription_ids_are_distinct() {
		assert_ne!(SubscriptionId::new_v4(), SubscriptionId::new_v4());
	}
}
