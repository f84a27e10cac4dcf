#![forbid(unsafe_code)]

//! Room rows plus the per-user reverse index.
//!
//! Every compound write goes out as one best-effort batch spanning the
//! room partition and each member's reverse-index partition. A failure
//! part way through leaves the two views out of step until a later write
//! touches the same keys; nothing repairs them automatically. Readers of
//! `rooms_for` must treat it as eventually consistent with `get_room`.

use std::sync::Arc;

use classchat_domain::{Room, RoomId, UserId};
use tracing::debug;

use super::{room_id_col, user_id_col};
use crate::store::{Batch, BatchMode, Row, Statement, Store, StoreError};

const SELECT_ROOM: &str =
	"SELECT room_id, name, admin_id, class, max_participants, deleted_at FROM rooms WHERE room_id = ?";
const SELECT_ROOMS_BY_CLASS: &str =
	"SELECT room_id, name, admin_id, class, max_participants, deleted_at FROM rooms WHERE class = ? ORDER BY room_id";
const SELECT_MEMBERS: &str = "SELECT user_id, is_pending FROM room_members WHERE room_id = ?";
const SELECT_ROOMS_FOR: &str = "SELECT room_id FROM user_rooms WHERE user_id = ? ORDER BY room_id";

const INSERT_ROOM: &str =
	"INSERT INTO rooms (room_id, name, admin_id, class, max_participants, deleted_at) VALUES (?, ?, ?, ?, ?, ?)";
const DELETE_ROOM: &str = "DELETE FROM rooms WHERE room_id = ?";
const UPSERT_MEMBER: &str = "INSERT INTO room_members (room_id, user_id, is_pending) VALUES (?, ?, ?) \
	ON CONFLICT (room_id, user_id) DO UPDATE SET is_pending = excluded.is_pending";
const DELETE_MEMBER: &str = "DELETE FROM room_members WHERE room_id = ? AND user_id = ?";
const DELETE_ALL_MEMBERS: &str = "DELETE FROM room_members WHERE room_id = ?";
const ADD_ROOM_FOR_USER: &str = "INSERT OR IGNORE INTO user_rooms (user_id, room_id) VALUES (?, ?)";
const REMOVE_ROOM_FOR_USER: &str = "DELETE FROM user_rooms WHERE user_id = ? AND room_id = ?";

#[derive(Clone)]
pub struct MembershipStore {
	store: Arc<dyn Store>,
}

impl MembershipStore {
	pub fn new(store: Arc<dyn Store>) -> Self {
		Self { store }
	}

	pub async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
		let mut rows = self
			.store
			.query(&Statement::new(SELECT_ROOM).bind(room_id.as_str()))
			.await?;
		let Some(row) = rows.next() else {
			return Ok(None);
		};
		let room = self.with_members(room_from_row(&row)?).await?;
		Ok(Some(room))
	}

	pub async fn rooms_by_class(&self, class: &str) -> Result<Vec<Room>, StoreError> {
		let rows = self
			.store
			.query(&Statement::new(SELECT_ROOMS_BY_CLASS).bind(class))
			.await?;

		let mut rooms = Vec::new();
		for row in rows {
			rooms.push(self.with_members(room_from_row(&row)?).await?);
		}
		Ok(rooms)
	}

	/// Reverse-index read.
	pub async fn rooms_for(&self, user_id: &UserId) -> Result<Vec<RoomId>, StoreError> {
		let rows = self
			.store
			.query(&Statement::new(SELECT_ROOMS_FOR).bind(user_id.as_str()))
			.await?;
		rows.map(|row| room_id_col(row.text(0)?, 0)).collect()
	}

	/// Room row, member map and one reverse-index entry per member.
	pub async fn create_room_with_members(&self, room: &Room) -> Result<(), StoreError> {
		let mut room = room.clone();
		room.ensure_admin_member();

		let mut batch = Batch::new(BatchMode::BestEffortMultiPartition);
		batch.add(
			Statement::new(INSERT_ROOM)
				.bind(room.room_id.as_str())
				.bind(room.name.as_str())
				.bind(room.admin_id.as_str())
				.bind(room.class.as_str())
				.bind(i64::from(room.max_participants))
				.bind(room.deleted_at),
		);
		for (user_id, pending) in &room.members {
			batch.add(upsert_member(&room.room_id, user_id, *pending));
		}
		for user_id in room.members.keys() {
			batch.add(add_room_for_user(&room.room_id, user_id));
		}

		debug!(room = %room.room_id, statements = batch.len(), "create room with members");
		self.store.execute_batch(batch).await
	}

	/// Upserts the pending flag and the reverse-index entry together.
	pub async fn add_member(&self, room_id: &RoomId, user_id: &UserId, pending: bool) -> Result<(), StoreError> {
		let mut batch = Batch::new(BatchMode::BestEffortMultiPartition);
		batch
			.add(upsert_member(room_id, user_id, pending))
			.add(add_room_for_user(room_id, user_id));
		self.store.execute_batch(batch).await
	}

	pub async fn remove_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), StoreError> {
		let mut batch = Batch::new(BatchMode::BestEffortMultiPartition);
		batch
			.add(
				Statement::new(DELETE_MEMBER)
					.bind(room_id.as_str())
					.bind(user_id.as_str()),
			)
			.add(remove_room_for_user(room_id, user_id));
		self.store.execute_batch(batch).await
	}

	/// Reverse-index entries go first, the room row last.
	pub async fn delete_room_with_members(&self, room: &Room) -> Result<(), StoreError> {
		let mut batch = Batch::new(BatchMode::BestEffortMultiPartition);
		for user_id in room.members.keys() {
			batch.add(remove_room_for_user(&room.room_id, user_id));
		}
		batch
			.add(Statement::new(DELETE_ALL_MEMBERS).bind(room.room_id.as_str()))
			.add(Statement::new(DELETE_ROOM).bind(room.room_id.as_str()));

		debug!(room = %room.room_id, statements = batch.len(), "delete room with members");
		self.store.execute_batch(batch).await
	}

	async fn with_members(&self, mut room: Room) -> Result<Room, StoreError> {
		let rows = self
			.store
			.query(&Statement::new(SELECT_MEMBERS).bind(room.room_id.as_str()))
			.await?;
		room.members.clear();
		for row in rows {
			room.members.insert(user_id_col(row.text(0)?, 0)?, row.bool(1)?);
		}
		Ok(room)
	}
}

fn upsert_member(room_id: &RoomId, user_id: &UserId, pending: bool) -> Statement {
	Statement::new(UPSERT_MEMBER)
		.bind(room_id.as_str())
		.bind(user_id.as_str())
		.bind(pending)
}

fn add_room_for_user(room_id: &RoomId, user_id: &UserId) -> Statement {
	Statement::new(ADD_ROOM_FOR_USER)
		.bind(user_id.as_str())
		.bind(room_id.as_str())
}

fn remove_room_for_user(room_id: &RoomId, user_id: &UserId) -> Statement {
	Statement::new(REMOVE_ROOM_FOR_USER)
		.bind(user_id.as_str())
		.bind(room_id.as_str())
}

fn room_from_row(row: &Row) -> Result<Room, StoreError> {
	let max_participants = u32::try_from(row.int(4)?).map_err(|_| StoreError::Column {
		index: 4,
		expected: "non-negative max_participants",
	})?;
	let mut room = Room::new(
		room_id_col(row.text(0)?, 0)?,
		row.text(1)?,
		user_id_col(row.text(2)?, 2)?,
		row.text(3)?,
		max_participants,
	);
	room.deleted_at = row.opt_int(5)?;
	Ok(room)
}
