#![forbid(unsafe_code)]

use std::sync::Arc;

use classchat_domain::{Message, RoomId};

use super::{room_id_col, user_id_col};
use crate::store::{Row, Statement, Store, StoreError};

const INSERT_MESSAGE: &str =
	"INSERT INTO messages (room_id, sent_timestamp, from_user_id, body) VALUES (?, ?, ?, ?)";
const SELECT_MESSAGE: &str =
	"SELECT room_id, sent_timestamp, from_user_id, body FROM messages WHERE room_id = ? AND sent_timestamp = ?";
const SELECT_BEFORE: &str = "SELECT room_id, sent_timestamp, from_user_id, body FROM messages \
	WHERE room_id = ? AND sent_timestamp < ? ORDER BY sent_timestamp DESC LIMIT ?";
// Only touches an existing row, so a concurrently deleted message stays deleted.
const EDIT_IF_EXISTS: &str = "UPDATE messages SET body = ? WHERE room_id = ? AND sent_timestamp = ?";
const DELETE_MESSAGE: &str = "DELETE FROM messages WHERE room_id = ? AND sent_timestamp = ?";

/// Messages keyed by `(room_id, sent_timestamp)`.
#[derive(Clone)]
pub struct MessageStore {
	store: Arc<dyn Store>,
}

impl MessageStore {
	pub fn new(store: Arc<dyn Store>) -> Self {
		Self { store }
	}

	pub async fn save(&self, message: &Message) -> Result<(), StoreError> {
		self.store
			.execute(
				&Statement::new(INSERT_MESSAGE)
					.bind(message.room_id.as_str())
					.bind(message.sent_timestamp)
					.bind(message.from_user_id.as_str())
					.bind(message.body.as_str()),
			)
			.await
	}

	pub async fn get(&self, room_id: &RoomId, sent_timestamp: i64) -> Result<Option<Message>, StoreError> {
		let mut rows = self
			.store
			.query(
				&Statement::new(SELECT_MESSAGE)
					.bind(room_id.as_str())
					.bind(sent_timestamp),
			)
			.await?;
		rows.next().map(|row| message_from_row(&row)).transpose()
	}

	/// Newest first, strictly older than `before`.
	pub async fn list_before(&self, room_id: &RoomId, before: i64, limit: u32) -> Result<Vec<Message>, StoreError> {
		let rows = self
			.store
			.query(
				&Statement::new(SELECT_BEFORE)
					.bind(room_id.as_str())
					.bind(before)
					.bind(i64::from(limit)),
			)
			.await?;
		rows.map(|row| message_from_row(&row)).collect()
	}

	/// Compare-and-set body replacement; `false` when the row is gone.
	pub async fn edit_if_exists(&self, message: &Message) -> Result<bool, StoreError> {
		self.store
			.conditional_execute(
				&Statement::new(EDIT_IF_EXISTS)
					.bind(message.body.as_str())
					.bind(message.room_id.as_str())
					.bind(message.sent_timestamp),
			)
			.await
	}

	/// Returns whether a row was removed.
	pub async fn delete(&self, room_id: &RoomId, sent_timestamp: i64) -> Result<bool, StoreError> {
		self.store
			.conditional_execute(
				&Statement::new(DELETE_MESSAGE)
					.bind(room_id.as_str())
					.bind(sent_timestamp),
			)
			.await
	}
}

fn message_from_row(row: &Row) -> Result<Message, StoreError> {
	Ok(Message::new(
		room_id_col(row.text(0)?, 0)?,
		row.int(1)?,
		user_id_col(row.text(2)?, 2)?,
		row.text(3)?,
	))
}
