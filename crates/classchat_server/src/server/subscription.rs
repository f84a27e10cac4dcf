#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use bytes::Bytes;
use classchat_domain::Message;
use classchat_protocol::framing::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_MESSAGE_SIZE, encode_envelope, validate_inbound_body};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info, warn};

use crate::server::hub::{HubHandle, Outbound, Subscription};
use crate::service::MessageService;
use crate::util::time::MonotonicStamp;

/// Per-connection server settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	/// Largest inbound text frame; bigger ones are dropped.
	pub max_message_size: usize,
	/// Largest outbound envelope.
	pub max_frame_size: usize,

	pub ping_period: Duration,
	/// Read deadline, restarted by every inbound frame (pongs included).
	pub pong_wait: Duration,
	pub write_wait: Duration,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
			max_frame_size: DEFAULT_MAX_FRAME_SIZE,
			ping_period: Duration::from_secs(300),
			pong_wait: Duration::from_secs(300),
			write_wait: Duration::from_secs(60),
		}
	}
}

/// Teardown shared by both loops; whichever side gets here first does
/// the unregister.
struct Cleanup {
	done: AtomicBool,
	stop_reading: Notify,
	hub: HubHandle,
	subscription: Subscription,
}

impl Cleanup {
	async fn run(&self, conn_id: u64, reason: &'static str) {
		if self.done.swap(true, Ordering::AcqRel) {
			return;
		}
		debug!(conn_id, room = %self.subscription.room_id, reason, "unregistering subscription");
		if let Err(err) = self.hub.unregister(self.subscription.clone()).await {
			debug!(conn_id, error = %err, "hub gone before unregister");
		}
	}
}

/// Registers `subscription` with the hub and runs its read and write
/// loops until the socket is unusable. Authorization must already have
/// happened.
pub async fn run_subscription<S, K>(
	conn_id: u64,
	stream: S,
	sink: K,
	subscription: Subscription,
	hub: HubHandle,
	messages: MessageService,
	settings: ConnectionSettings,
) -> anyhow::Result<()>
where
	S: Stream<Item = Result<WsMessage, WsError>> + Unpin + Send + 'static,
	K: Sink<WsMessage, Error = WsError> + Unpin + Send + 'static,
{
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("classchat_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("classchat_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let outbound = hub
		.register(subscription.clone())
		.await
		.context("register subscription with hub")?;
	info!(
		conn_id,
		room = %subscription.room_id,
		user = %subscription.user_id,
		"subscription active"
	);

	let cleanup = Arc::new(Cleanup {
		done: AtomicBool::new(false),
		stop_reading: Notify::new(),
		hub,
		subscription: subscription.clone(),
	});

	let writer = tokio::spawn(write_loop(conn_id, sink, outbound, settings.clone(), Arc::clone(&cleanup)));

	let reason = read_loop(conn_id, stream, &subscription, &messages, &settings, &cleanup).await;
	cleanup.run(conn_id, reason).await;

	// The unregister above closes the outbound queue, which ends the writer.
	writer.await.context("write loop panicked")?;
	info!(conn_id, room = %subscription.room_id, user = %subscription.user_id, reason, "subscription closed");
	Ok(())
}

async fn read_loop<S>(
	conn_id: u64,
	mut stream: S,
	subscription: &Subscription,
	messages: &MessageService,
	settings: &ConnectionSettings,
	cleanup: &Cleanup,
) -> &'static str
where
	S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
	let mut stamp = MonotonicStamp::new();
	loop {
		let next = tokio::select! {
			biased;
			_ = cleanup.stop_reading.notified() => return "write side closed",
			next = timeout(settings.pong_wait, stream.next()) => next,
		};

		let frame = match next {
			Err(_) => return "read deadline expired",
			Ok(None) => return "socket closed",
			Ok(Some(Err(err))) => {
				debug!(conn_id, error = %err, "websocket read error");
				return "read error";
			}
			Ok(Some(Ok(frame))) => frame,
		};

		let text = match frame {
			WsMessage::Text(text) => text,
			WsMessage::Close(_) => return "client closed",
			WsMessage::Binary(_) => {
				metrics::counter!("classchat_server_frames_ignored_total", "reason" => "binary").increment(1);
				continue;
			}
			WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
		};

		let body = match validate_inbound_body(text.as_str(), settings.max_message_size) {
			Ok(body) => body,
			Err(err) => {
				warn!(conn_id, error = %err, "dropping inbound frame");
				metrics::counter!("classchat_server_frames_ignored_total", "reason" => "invalid").increment(1);
				continue;
			}
		};

		let message = Message::new(
			subscription.room_id.clone(),
			stamp.next(),
			subscription.user_id.clone(),
			body,
		);
		match messages.post_message(message).await {
			Ok(()) => metrics::counter!("classchat_server_messages_in_total").increment(1),
			Err(err) => {
				warn!(conn_id, room = %subscription.room_id, error = %err, "message not saved; not broadcast");
				metrics::counter!("classchat_server_messages_failed_total").increment(1);
			}
		}
	}
}

async fn write_loop<K>(
	conn_id: u64,
	mut sink: K,
	mut outbound: Outbound,
	settings: ConnectionSettings,
	cleanup: Arc<Cleanup>,
) where
	K: Sink<WsMessage, Error = WsError> + Unpin,
{
	let mut ping = interval_at(Instant::now() + settings.ping_period, settings.ping_period);
	ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

	let reason = loop {
		tokio::select! {
			item = outbound.recv() => {
				let Some(env) = item else {
					let _ = timeout(settings.write_wait, sink.send(WsMessage::Close(None))).await;
					break "queue closed";
				};
				let text = match encode_envelope(&env, settings.max_frame_size) {
					Ok(text) => text,
					Err(err) => {
						warn!(conn_id, error = %err, "dropping outbound envelope");
						metrics::counter!("classchat_server_encode_errors_total").increment(1);
						continue;
					}
				};
				if let Err(reason) = send_with_deadline(&mut sink, WsMessage::Text(text.into()), settings.write_wait).await {
					debug!(conn_id, reason, "websocket write failed");
					break reason;
				}
				metrics::counter!("classchat_server_envelopes_out_total").increment(1);
			}
			_ = ping.tick() => {
				if let Err(reason) = send_with_deadline(&mut sink, WsMessage::Ping(Bytes::new()), settings.write_wait).await {
					debug!(conn_id, reason, "websocket ping failed");
					break reason;
				}
			}
		}
	};

	cleanup.run(conn_id, reason).await;
	cleanup.stop_reading.notify_one();
	let _ = timeout(settings.write_wait, sink.close()).await;
	debug!(conn_id, reason, "write loop finished");
}

async fn send_with_deadline<K>(sink: &mut K, msg: WsMessage, deadline: Duration) -> Result<(), &'static str>
where
	K: Sink<WsMessage, Error = WsError> + Unpin,
{
	match timeout(deadline, sink.send(msg)).await {
		Ok(Ok(())) => Ok(()),
		Ok(Err(_)) => Err("write error"),
		Err(_) => Err("write deadline expired"),
	}
}
