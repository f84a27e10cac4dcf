#![forbid(unsafe_code)]

pub mod membership;
pub mod messages;
pub mod users;

pub use membership::MembershipStore;
pub use messages::MessageStore;
pub use users::UserStore;

use classchat_domain::{RoomId, UserId};

use crate::store::StoreError;

pub(crate) fn room_id_col(raw: &str, index: usize) -> Result<RoomId, StoreError> {
	RoomId::new(raw).map_err(|_| StoreError::Column {
		index,
		expected: "room id",
	})
}

pub(crate) fn user_id_col(raw: &str, index: usize) -> Result<UserId, StoreError> {
	UserId::new(raw).map_err(|_| StoreError::Column {
		index,
		expected: "user id",
	})
}

#[cfg(test)]
mod membership_tests;
