#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use classchat_domain::{Message, Room, RoomId, RoomView, ServiceError, User, UserId, UserRooms};
use tracing::{debug, info, warn};

use super::mailer::{REJECTION_SUBJECT, rejection_email};
use super::{DEFAULT_OP_TIMEOUT, Mailer, MessageService, with_deadline};
use crate::repository::{MembershipStore, UserStore};
use crate::store::Store;
use crate::util::time::unix_micros_now;

/// Room lifecycle on top of the membership compound writes.
#[derive(Clone)]
pub struct RoomService {
	membership: MembershipStore,
	users: UserStore,
	messages: MessageService,
	mailer: Arc<dyn Mailer>,
	op_timeout: Duration,
}

impl RoomService {
	pub fn new(store: Arc<dyn Store>, messages: MessageService, mailer: Arc<dyn Mailer>) -> Self {
		Self {
			membership: MembershipStore::new(Arc::clone(&store)),
			users: UserStore::new(store),
			messages,
			mailer,
			op_timeout: DEFAULT_OP_TIMEOUT,
		}
	}

	pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
		self.op_timeout = op_timeout;
		self
	}

	/// Creates the room. Every listed member is stored as approved and
	/// the admin is always a member.
	pub async fn save_room(&self, mut room: Room) -> Result<Room, ServiceError> {
		if room.name.trim().is_empty() {
			return Err(ServiceError::bad_request("room name is required"));
		}
		if room.max_participants == 0 {
			return Err(ServiceError::bad_request("max_participants must be at least 1"));
		}
		room.members.values_mut().for_each(|pending| *pending = false);
		room.ensure_admin_member();

		with_deadline("save_room", self.op_timeout, async {
			if self.membership.get_room(&room.room_id).await?.is_some() {
				return Err(ServiceError::conflict(format!("room {} already exists", room.room_id)));
			}

			let users = self.users.get_many(room.members.keys()).await?;
			if let Some(missing) = room.members.keys().find(|id| !users.contains_key(*id)) {
				return Err(ServiceError::conflict(format!("user {missing} does not exist")));
			}
			let admin_name = users.get(&room.admin_id).map(User::display_name).unwrap_or_default();

			self.membership.create_room_with_members(&room).await?;
			info!(
				room = %room.room_id,
				admin = %room.admin_id,
				admin_name = %admin_name,
				members = room.members.len(),
				"room created"
			);
			Ok(())
		})
		.await?;

		Ok(room)
	}

	/// Adds the user as pending and posts a request notice into the room.
	/// If the notice cannot be saved the pending membership stays.
	pub async fn join_request(&self, room_id: &RoomId, user_id: &UserId) -> Result<Message, ServiceError> {
		let user = with_deadline("join_request", self.op_timeout, async {
			let Some(user) = self.users.get(user_id).await? else {
				return Err(ServiceError::not_found(format!("user {user_id} does not exist")));
			};
			let Some(room) = self.membership.get_room(room_id).await? else {
				return Err(ServiceError::not_found(format!("room {room_id} does not exist")));
			};
			if room.member_state(user_id) == Some(false) {
				return Err(ServiceError::conflict(format!("{user_id} is already in room {room_id}")));
			}

			self.membership.add_member(room_id, user_id, true).await?;
			Ok(user)
		})
		.await?;

		let notice = Message::new(
			room_id.clone(),
			unix_micros_now(),
			user_id.clone(),
			format!("{} {} has requested to join your group.", user.first_name, user.last_name),
		);
		let notice = self.messages.post_notice(notice).await?;
		debug!(room = %room_id, user = %user_id, "join requested");
		Ok(notice)
	}

	/// Approves a member. Only the admin may do this; re-approving is a
	/// no-op.
	pub async fn add_user_to_room(
		&self,
		room_id: &RoomId,
		user_id: &UserId,
		requester_id: &UserId,
	) -> Result<(), ServiceError> {
		with_deadline("add_user_to_room", self.op_timeout, async {
			let room = self.existing_room(room_id).await?;
			if !room.is_admin(requester_id) {
				return Err(ServiceError::unauthorized("only the room admin can add members"));
			}
			if self.users.get(user_id).await?.is_none() {
				return Err(ServiceError::not_found(format!("user {user_id} does not exist")));
			}
			if room.member_state(user_id) == Some(false) {
				return Ok(());
			}
			if room.is_full() {
				return Err(ServiceError::conflict("room is full"));
			}

			self.membership.add_member(room_id, user_id, false).await?;
			info!(room = %room_id, user = %user_id, "member approved");
			Ok(())
		})
		.await
	}

	pub async fn approve_join(
		&self,
		room_id: &RoomId,
		user_id: &UserId,
		requester_id: &UserId,
	) -> Result<(), ServiceError> {
		self.add_user_to_room(room_id, user_id, requester_id).await
	}

	/// Removes a member. The admin may remove anyone but themselves; a
	/// member may remove themselves. When the admin removes someone else,
	/// that user is emailed a rejection notice. The admin leaves a room
	/// only through `delete_room`.
	pub async fn remove_user_from_room(
		&self,
		room_id: &RoomId,
		user_id: &UserId,
		requester_id: &UserId,
	) -> Result<(), ServiceError> {
		let (room, user) = with_deadline("remove_user_from_room", self.op_timeout, async {
			let room = self.existing_room(room_id).await?;
			if !room.is_admin(requester_id) && user_id != requester_id {
				return Err(ServiceError::unauthorized(
					"only the room admin can remove someone else",
				));
			}
			if room.is_admin(user_id) {
				return Err(ServiceError::conflict(
					"the room admin cannot leave the room; delete it instead",
				));
			}

			self.membership.remove_member(room_id, user_id).await?;
			let user = self.users.get(user_id).await?;
			Ok((room, user))
		})
		.await?;
		info!(room = %room_id, user = %user_id, by = %requester_id, "member removed");

		if user_id == requester_id {
			return Ok(());
		}
		match user {
			Some(user) => self.send_rejection(&user, &room).await,
			None => debug!(user = %user_id, "no profile for removed user; rejection email skipped"),
		}
		Ok(())
	}

	pub async fn reject_join(
		&self,
		room_id: &RoomId,
		user_id: &UserId,
		requester_id: &UserId,
	) -> Result<(), ServiceError> {
		self.remove_user_from_room(room_id, user_id, requester_id).await
	}

	/// Rooms the user belongs to (pending included), hydrated with names.
	pub async fn get_chat_rooms_for(&self, user_id: &UserId) -> Result<UserRooms, ServiceError> {
		with_deadline("get_chat_rooms_for", self.op_timeout, async {
			let Some(user) = self.users.get(user_id).await? else {
				return Err(ServiceError::conflict(format!("user {user_id} does not exist")));
			};

			let mut rooms = Vec::new();
			for room_id in self.membership.rooms_for(user_id).await? {
				// The reverse index may briefly point at a room that is gone.
				let Some(room) = self.membership.get_room(&room_id).await? else {
					debug!(room = %room_id, user = %user_id, "reverse index entry without room row");
					continue;
				};
				rooms.push(self.hydrate(&room).await?);
			}
			Ok(UserRooms { user, rooms })
		})
		.await
	}

	pub async fn get_chat_rooms_by_class(&self, class: &str) -> Result<Vec<RoomView>, ServiceError> {
		with_deadline("get_chat_rooms_by_class", self.op_timeout, async {
			let mut views = Vec::new();
			for room in self.membership.rooms_by_class(class).await? {
				views.push(self.hydrate(&room).await?);
			}
			Ok(views)
		})
		.await
	}

	pub async fn get_room(&self, room_id: &RoomId) -> Result<RoomView, ServiceError> {
		with_deadline("get_room", self.op_timeout, async {
			let room = self.existing_room(room_id).await?;
			self.hydrate(&room).await
		})
		.await
	}

	pub async fn delete_room(&self, user_id: &UserId, room_id: &RoomId) -> Result<(), ServiceError> {
		with_deadline("delete_room", self.op_timeout, async {
			let room = self.existing_room(room_id).await?;
			if !room.is_admin(user_id) {
				return Err(ServiceError::unauthorized("only the room admin can delete the room"));
			}
			self.membership.delete_room_with_members(&room).await?;
			info!(room = %room_id, members = room.members.len(), "room deleted");
			Ok(())
		})
		.await
	}

	async fn existing_room(&self, room_id: &RoomId) -> Result<Room, ServiceError> {
		self.membership
			.get_room(room_id)
			.await?
			.ok_or_else(|| ServiceError::not_found(format!("room {room_id} does not exist")))
	}

	async fn hydrate(&self, room: &Room) -> Result<RoomView, ServiceError> {
		let users = self.users.get_many(room.members.keys()).await?;
		Ok(RoomView::hydrate(room, &users))
	}

	async fn send_rejection(&self, user: &User, room: &Room) {
		let body = match rejection_email(&user.first_name, &room.name) {
			Ok(body) => body,
			Err(err) => {
				warn!(error = %err, "rejection email not rendered");
				metrics::counter!("classchat_mail_failures_total").increment(1);
				return;
			}
		};
		if let Err(err) = self.mailer.send_simple_mail(&user.email, REJECTION_SUBJECT, &body).await {
			warn!(user = %user.user_id, room = %room.room_id, error = %err, "rejection email not sent");
			metrics::counter!("classchat_mail_failures_total").increment(1);
		}
	}
}
