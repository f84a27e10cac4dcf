#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use classchat_domain::{Message, RoomId, ServiceError, UserId};
use classchat_protocol::Envelope;
use tracing::{debug, warn};

use super::{DEFAULT_OP_TIMEOUT, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, with_deadline};
use crate::repository::{MembershipStore, MessageStore};
use crate::server::hub::HubHandle;
use crate::store::Store;
use crate::util::time::unix_micros_now;

enum EditOutcome {
	Unchanged(Message),
	Edited(Message),
	Deleted(Message),
}

/// Authorization gate, persistence and live fan-out for chat messages.
#[derive(Clone)]
pub struct MessageService {
	messages: MessageStore,
	membership: MembershipStore,
	hub: HubHandle,
	op_timeout: Duration,
}

impl MessageService {
	pub fn new(store: Arc<dyn Store>, hub: HubHandle) -> Self {
		Self {
			messages: MessageStore::new(Arc::clone(&store)),
			membership: MembershipStore::new(store),
			hub,
			op_timeout: DEFAULT_OP_TIMEOUT,
		}
	}

	pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
		self.op_timeout = op_timeout;
		self
	}

	/// True iff `room_id` is in the user's reverse index. Pending members
	/// are in it too.
	pub async fn is_authorized(&self, user_id: &UserId, room_id: &RoomId) -> Result<bool, ServiceError> {
		with_deadline("is_authorized", self.op_timeout, async {
			let rooms = self.membership.rooms_for(user_id).await?;
			Ok(rooms.contains(room_id))
		})
		.await
	}

	pub async fn save_message(&self, message: &Message) -> Result<(), ServiceError> {
		with_deadline("save_message", self.op_timeout, async {
			self.messages.save(message).await?;
			Ok(())
		})
		.await
	}

	/// Persist, then fan out to the room's live viewers. Nothing is
	/// published if the write fails.
	pub async fn post_message(&self, message: Message) -> Result<(), ServiceError> {
		self.save_message(&message).await?;
		self.publish(Envelope::send(message)).await;
		Ok(())
	}

	/// Like `post_message`, but a timestamp already taken in the room is
	/// retried once, one microsecond later. Returns the message as stored.
	pub async fn post_notice(&self, message: Message) -> Result<Message, ServiceError> {
		let message = with_deadline("post_notice", self.op_timeout, async move {
			let mut message = message;
			match self.messages.save(&message).await {
				Ok(()) => {}
				Err(err) if err.is_duplicate_key() => {
					debug!(room = %message.room_id, ts = message.sent_timestamp, "notice timestamp taken; retrying");
					message.sent_timestamp += 1;
					self.messages.save(&message).await?;
				}
				Err(err) => return Err(ServiceError::from(err)),
			}
			Ok(message)
		})
		.await?;

		self.publish(Envelope::send(message.clone())).await;
		Ok(message)
	}

	/// Returns the resulting message, or `None` when an empty body turned
	/// the edit into a delete.
	pub async fn edit_message(
		&self,
		room_id: &RoomId,
		user_id: &UserId,
		sent_timestamp: i64,
		new_body: &str,
	) -> Result<Option<Message>, ServiceError> {
		let outcome = with_deadline("edit_message", self.op_timeout, async {
			let current = self.authored_message(room_id, user_id, sent_timestamp).await?;

			if current.body == new_body {
				return Ok(EditOutcome::Unchanged(current));
			}
			if new_body.is_empty() {
				self.delete_existing(room_id, sent_timestamp).await?;
				return Ok(EditOutcome::Deleted(current));
			}

			let edited = Message {
				body: new_body.to_string(),
				..current
			};
			if !self.messages.edit_if_exists(&edited).await? {
				return Err(ServiceError::internal(format!(
					"edit of {room_id}@{sent_timestamp} not applied: message no longer exists"
				)));
			}
			Ok(EditOutcome::Edited(edited))
		})
		.await?;

		match outcome {
			EditOutcome::Unchanged(message) => {
				debug!(room = %room_id, ts = sent_timestamp, "edit with unchanged body");
				Ok(Some(message))
			}
			EditOutcome::Edited(message) => {
				self.publish(Envelope::edit(message.clone())).await;
				Ok(Some(message))
			}
			EditOutcome::Deleted(message) => {
				self.publish(Envelope::delete(message)).await;
				Ok(None)
			}
		}
	}

	/// Newest first, strictly older than `before` (default: now).
	pub async fn get_messages(
		&self,
		room_id: &RoomId,
		before: Option<i64>,
		limit: Option<u32>,
	) -> Result<Vec<Message>, ServiceError> {
		let limit = match limit {
			Some(0) => return Err(ServiceError::bad_request("limit must be at least 1")),
			Some(n) => n.min(MAX_PAGE_SIZE),
			None => DEFAULT_PAGE_SIZE,
		};
		let before = before.unwrap_or_else(unix_micros_now);

		with_deadline("get_messages", self.op_timeout, async {
			Ok(self.messages.list_before(room_id, before, limit).await?)
		})
		.await
	}

	pub async fn delete_message(
		&self,
		room_id: &RoomId,
		user_id: &UserId,
		sent_timestamp: i64,
	) -> Result<(), ServiceError> {
		let deleted = with_deadline("delete_message", self.op_timeout, async {
			let current = self.authored_message(room_id, user_id, sent_timestamp).await?;
			self.delete_existing(room_id, sent_timestamp).await?;
			Ok(current)
		})
		.await?;

		self.publish(Envelope::delete(deleted)).await;
		Ok(())
	}

	async fn authored_message(
		&self,
		room_id: &RoomId,
		user_id: &UserId,
		sent_timestamp: i64,
	) -> Result<Message, ServiceError> {
		let Some(message) = self.messages.get(room_id, sent_timestamp).await? else {
			return Err(ServiceError::not_found(format!("message {room_id}@{sent_timestamp}")));
		};
		if message.from_user_id != *user_id {
			return Err(ServiceError::unauthorized(format!(
				"{user_id} is not the author of {room_id}@{sent_timestamp}"
			)));
		}
		Ok(message)
	}

	/// A concurrent delete can remove the row after it was read; that is
	/// reported as `NotFound` and nothing is published.
	async fn delete_existing(&self, room_id: &RoomId, sent_timestamp: i64) -> Result<(), ServiceError> {
		if !self.messages.delete(room_id, sent_timestamp).await? {
			return Err(ServiceError::not_found(format!(
				"message {room_id}@{sent_timestamp} was already deleted"
			)));
		}
		Ok(())
	}

	async fn publish(&self, envelope: Envelope) {
		let kind = envelope.kind;
		if let Err(err) = self.hub.broadcast(envelope).await {
			warn!(kind = kind.as_str(), error = %err, "live viewers not notified");
		}
	}
}
