#![forbid(unsafe_code)]

use std::sync::Arc;

use classchat_domain::Room;

use crate::repository::MembershipStore;
use crate::store::StoreError;
use crate::test_support::{FailingStore, memory_store, rid, uid};

fn team(id: &str) -> Room {
	Room::new(rid(id), "Team", uid("a1"), "SOEN490", 4)
		.with_member(uid("u1"), false)
		.with_member(uid("u2"), false)
}

#[tokio::test]
async fn create_room_writes_row_and_every_reverse_entry() {
	let membership = MembershipStore::new(memory_store().await);
	membership.create_room_with_members(&team("r1")).await.expect("create");

	let room = membership.get_room(&rid("r1")).await.expect("get").expect("room exists");
	assert_eq!(room.admin_id, uid("a1"));
	assert_eq!(room.members.len(), 3);
	assert_eq!(room.member_state(&uid("a1")), Some(false));

	for user in ["a1", "u1", "u2"] {
		let rooms = membership.rooms_for(&uid(user)).await.expect("rooms_for");
		assert_eq!(rooms, vec![rid("r1")], "reverse index for {user}");
	}
}

#[tokio::test]
async fn create_room_always_includes_the_admin() {
	let membership = MembershipStore::new(memory_store().await);
	let mut room = Room::new(rid("r1"), "Team", uid("a1"), "SOEN490", 4);
	room.members.clear();

	membership.create_room_with_members(&room).await.expect("create");

	let stored = membership.get_room(&rid("r1")).await.expect("get").expect("room");
	assert_eq!(stored.member_state(&uid("a1")), Some(false));
	assert_eq!(membership.rooms_for(&uid("a1")).await.expect("rooms_for"), vec![rid("r1")]);
}

#[tokio::test]
async fn add_member_upserts_pending_flag_once() {
	let membership = MembershipStore::new(memory_store().await);
	membership.create_room_with_members(&team("r1")).await.expect("create");

	membership.add_member(&rid("r1"), &uid("u3"), true).await.expect("request");
	let room = membership.get_room(&rid("r1")).await.expect("get").expect("room");
	assert_eq!(room.member_state(&uid("u3")), Some(true));

	membership.add_member(&rid("r1"), &uid("u3"), false).await.expect("approve");
	let room = membership.get_room(&rid("r1")).await.expect("get").expect("room");
	assert_eq!(room.member_state(&uid("u3")), Some(false));
	assert_eq!(membership.rooms_for(&uid("u3")).await.expect("rooms_for"), vec![rid("r1")]);
}

#[tokio::test]
async fn remove_member_clears_both_views() {
	let membership = MembershipStore::new(memory_store().await);
	membership.create_room_with_members(&team("r1")).await.expect("create");
	membership.create_room_with_members(&team("r2")).await.expect("create");

	membership.remove_member(&rid("r1"), &uid("u1")).await.expect("remove");

	let room = membership.get_room(&rid("r1")).await.expect("get").expect("room");
	assert_eq!(room.member_state(&uid("u1")), None);
	assert_eq!(membership.rooms_for(&uid("u1")).await.expect("rooms_for"), vec![rid("r2")]);
}

#[tokio::test]
async fn delete_room_removes_row_members_and_reverse_entries() {
	let membership = MembershipStore::new(memory_store().await);
	let room = team("r1");
	membership.create_room_with_members(&room).await.expect("create");

	membership.delete_room_with_members(&room).await.expect("delete");

	assert!(membership.get_room(&rid("r1")).await.expect("get").is_none());
	for user in ["a1", "u1", "u2"] {
		assert!(membership.rooms_for(&uid(user)).await.expect("rooms_for").is_empty());
	}
}

#[tokio::test]
async fn rooms_by_class_lists_only_that_class() {
	let membership = MembershipStore::new(memory_store().await);
	membership.create_room_with_members(&team("r1")).await.expect("create");
	let other = Room::new(rid("r2"), "Other", uid("a2"), "COMP352", 3);
	membership.create_room_with_members(&other).await.expect("create");

	let rooms = membership.rooms_by_class("SOEN490").await.expect("by class");
	assert_eq!(rooms.len(), 1);
	assert_eq!(rooms[0].room_id, rid("r1"));
	assert_eq!(rooms[0].members.len(), 3);
}

#[tokio::test]
async fn partial_batch_failure_leaves_views_out_of_step_until_rewritten() {
	let failing = Arc::new(FailingStore::new(memory_store().await));
	let membership = MembershipStore::new(failing.clone());

	// room row, 3 member rows, then reverse entries for a1, u1, u2
	failing.fail_next_batch_at(5);
	let err = membership
		.create_room_with_members(&team("r1"))
		.await
		.expect_err("injected failure");
	assert!(matches!(err, StoreError::Batch { index: 5, .. }), "got: {err:?}");

	let room = membership.get_room(&rid("r1")).await.expect("get").expect("room row written");
	assert_eq!(room.member_state(&uid("u1")), Some(false));
	assert_eq!(membership.rooms_for(&uid("a1")).await.expect("rooms_for"), vec![rid("r1")]);
	assert!(
		membership.rooms_for(&uid("u1")).await.expect("rooms_for").is_empty(),
		"u1 is in the room row but missing from its reverse index"
	);

	membership.add_member(&rid("r1"), &uid("u1"), false).await.expect("re-drive");
	assert_eq!(membership.rooms_for(&uid("u1")).await.expect("rooms_for"), vec![rid("r1")]);
}
