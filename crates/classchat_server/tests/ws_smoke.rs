#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Context as _;
use classchat_domain::{Room, RoomId, User, UserId};
use classchat_protocol::{DEFAULT_MAX_FRAME_SIZE, EventKind, decode_envelope};
use classchat_server::repository::UserStore;
use classchat_server::server::delivery::{DeliveryState, serve};
use classchat_server::server::hub::{Hub, HubConfig, HubHandle};
use classchat_server::server::subscription::ConnectionSettings;
use classchat_server::service::{LogMailer, MessageService, RoomService};
use classchat_server::store::{SqliteStore, Store};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

static LOG_INIT: OnceLock<()> = OnceLock::new();

fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("CLASSCHAT_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

struct Server {
	addr: SocketAddr,
	hub: HubHandle,
	messages: MessageService,
}

fn user(id: &str, first: &str, last: &str) -> anyhow::Result<User> {
	Ok(User {
		user_id: UserId::new(id)?,
		first_name: first.to_string(),
		last_name: last.to_string(),
		email: format!("{id}@example.edu"),
	})
}

async fn start_server() -> anyhow::Result<Server> {
	init_test_logging();

	let store: Arc<dyn Store> = Arc::new(SqliteStore::connect("sqlite::memory:").await?);
	let users = UserStore::new(Arc::clone(&store));
	for (id, first, last) in [("a1", "Ada", "Admin"), ("u1", "Uma", "One"), ("u2", "Ugo", "Two")] {
		users.save(&user(id, first, last)?).await?;
	}

	let (hub, _task) = Hub::spawn(HubConfig::default());
	let messages = MessageService::new(Arc::clone(&store), hub.clone());
	let rooms = RoomService::new(Arc::clone(&store), messages.clone(), Arc::new(LogMailer));
	rooms
		.save_room(Room::new(RoomId::new("r1")?, "Team", UserId::new("a1")?, "SOEN490", 4).with_member(UserId::new("u1")?, false))
		.await?;

	let listener = TcpListener::bind("127.0.0.1:0").await.context("bind test listener")?;
	let addr = listener.local_addr()?;
	tokio::spawn(serve(
		listener,
		DeliveryState {
			hub: hub.clone(),
			messages: messages.clone(),
			settings: ConnectionSettings::default(),
		},
	));

	Ok(Server { addr, hub, messages })
}

fn room_url(addr: SocketAddr, room: &str, user: &str) -> String {
	format!("ws://{addr}/ws/rooms/{room}?user_id={user}")
}

async fn wait_for_subscribers(hub: &HubHandle, expected: usize) -> anyhow::Result<()> {
	let room = RoomId::new("r1")?;
	timeout(Duration::from_secs(2), async {
		loop {
			let counts = hub.room_counts().await?;
			if counts.get(&room).copied().unwrap_or(0) == expected {
				return anyhow::Ok(());
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.context("subscriber count not reached")?
}

#[tokio::test]
async fn non_member_is_refused_before_upgrade() -> anyhow::Result<()> {
	let server = start_server().await?;

	match connect_async(room_url(server.addr, "r1", "u2")).await {
		Err(WsError::Http(resp)) => assert_eq!(resp.status().as_u16(), 401),
		Err(other) => panic!("expected http 401, got error: {other}"),
		Ok(_) => panic!("non-member was upgraded"),
	}

	match connect_async(format!("ws://{}/ws/rooms/r1", server.addr)).await {
		Err(WsError::Http(resp)) => assert_eq!(resp.status().as_u16(), 400),
		other => panic!("expected http 400, got: {:?}", other.map(|_| ())),
	}
	Ok(())
}

#[tokio::test]
async fn member_message_reaches_room_but_not_author() -> anyhow::Result<()> {
	let server = start_server().await?;

	let (mut admin, _) = connect_async(room_url(server.addr, "r1", "a1")).await?;
	let (mut member, _) = connect_async(room_url(server.addr, "r1", "u1")).await?;
	wait_for_subscribers(&server.hub, 2).await?;

	member.send(WsMessage::Text("hi".into())).await?;

	let frame = timeout(Duration::from_secs(2), admin.next())
		.await
		.context("admin frame timed out")?
		.context("admin socket closed")??;
	let WsMessage::Text(text) = frame else {
		panic!("expected text frame, got: {frame:?}");
	};
	let env = decode_envelope(text.as_str(), DEFAULT_MAX_FRAME_SIZE)?;
	assert_eq!(env.kind, EventKind::Send);
	assert_eq!(env.message.body, "hi");
	assert_eq!(env.message.from_user_id.as_str(), "u1");

	assert!(
		timeout(Duration::from_millis(200), member.next()).await.is_err(),
		"author should not receive its own message"
	);

	let history = server.messages.get_messages(&RoomId::new("r1")?, None, None).await?;
	assert_eq!(history.len(), 1);
	assert_eq!(history[0].sent_timestamp, env.message.sent_timestamp);

	member.close(None).await?;
	wait_for_subscribers(&server.hub, 1).await?;
	Ok(())
}
