#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{RoomId, UserId};

/// A group chat. `members` maps each member to its pending flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
	pub room_id: RoomId,
	pub name: String,
	pub admin_id: UserId,
	pub class: String,
	pub max_participants: u32,
	/// Tombstone timestamp (unix micros); `None` while live.
	pub deleted_at: Option<i64>,
	pub members: BTreeMap<UserId, bool>,
}

impl Room {
	/// New room whose only member is the (approved) admin.
	pub fn new(
		room_id: RoomId,
		name: impl Into<String>,
		admin_id: UserId,
		class: impl Into<String>,
		max_participants: u32,
	) -> Self {
		let mut members = BTreeMap::new();
		members.insert(admin_id.clone(), false);
		Self {
			room_id,
			name: name.into(),
			admin_id,
			class: class.into(),
			max_participants,
			deleted_at: None,
			members,
		}
	}

	pub fn with_member(mut self, user_id: UserId, pending: bool) -> Self {
		self.members.insert(user_id, pending);
		self.ensure_admin_member();
		self
	}

	/// Restores the admin-is-approved-member invariant.
	pub fn ensure_admin_member(&mut self) {
		self.members.insert(self.admin_id.clone(), false);
	}

	pub fn is_admin(&self, user_id: &UserId) -> bool {
		&self.admin_id == user_id
	}

	/// `Some(is_pending)` for members, `None` otherwise.
	pub fn member_state(&self, user_id: &UserId) -> Option<bool> {
		self.members.get(user_id).copied()
	}

	pub fn approved_count(&self) -> usize {
		self.members.values().filter(|pending| !**pending).count()
	}

	pub fn is_full(&self) -> bool {
		self.approved_count() >= self.max_participants as usize
	}
}

/// A chat message, identified by `(room_id, sent_timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
	pub room_id: RoomId,
	/// Microseconds since the Unix epoch.
	pub sent_timestamp: i64,
	pub from_user_id: UserId,
	pub body: String,
}

impl Message {
	pub fn new(room_id: RoomId, sent_timestamp: i64, from_user_id: UserId, body: impl Into<String>) -> Self {
		Self {
			room_id,
			sent_timestamp,
			from_user_id,
			body: body.into(),
		}
	}
}

/// Profile mirrored from the external profile service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
	pub user_id: UserId,
	pub first_name: String,
	pub last_name: String,
	pub email: String,
}

impl User {
	pub fn display_name(&self) -> String {
		format!("{} {}", self.first_name, self.last_name).trim().to_string()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberView {
	pub user_id: UserId,
	pub first_name: String,
	pub last_name: String,
	pub is_pending: bool,
}

/// Room hydrated with member display names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomView {
	pub room_id: RoomId,
	pub name: String,
	pub class: String,
	pub max_participants: u32,
	pub deleted_at: Option<i64>,
	pub admin: MemberView,
	pub members: Vec<MemberView>,
}

impl RoomView {
	/// Members without a known profile keep empty names.
	pub fn hydrate(room: &Room, users: &HashMap<UserId, User>) -> Self {
		let view = |user_id: &UserId, is_pending: bool| {
			let (first_name, last_name) = users
				.get(user_id)
				.map(|u| (u.first_name.clone(), u.last_name.clone()))
				.unwrap_or_default();
			MemberView {
				user_id: user_id.clone(),
				first_name,
				last_name,
				is_pending,
			}
		};

		Self {
			room_id: room.room_id.clone(),
			name: room.name.clone(),
			class: room.class.clone(),
			max_participants: room.max_participants,
			deleted_at: room.deleted_at,
			admin: view(&room.admin_id, false),
			members: room.members.iter().map(|(id, pending)| view(id, *pending)).collect(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRooms {
	pub user: User,
	pub rooms: Vec<RoomView>,
}
