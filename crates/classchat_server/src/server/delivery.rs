#![forbid(unsafe_code)]

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context as _;
use bytes::Bytes;
use classchat_domain::{RoomId, UserId};
use futures::StreamExt;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONNECTION, HeaderMap, HeaderValue, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tracing::{debug, info, warn};

use crate::server::health::plain;
use crate::server::hub::{HubHandle, Subscription};
use crate::server::subscription::{ConnectionSettings, run_subscription};
use crate::service::MessageService;

const ROOM_PATH_PREFIX: &str = "/ws/rooms/";

/// Everything a connection needs once it is accepted.
#[derive(Clone)]
pub struct DeliveryState {
	pub hub: HubHandle,
	pub messages: MessageService,
	pub settings: ConnectionSettings,
}

/// Accept HTTP/1.1 connections and upgrade `GET /ws/rooms/{room}?user_id=..`
/// to websocket subscriptions. Runs until accept fails.
pub async fn serve(listener: TcpListener, state: DeliveryState) -> anyhow::Result<()> {
	let next_conn_id = Arc::new(AtomicU64::new(1));
	loop {
		let (stream, peer) = listener.accept().await.context("accept websocket connection")?;
		let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
		metrics::counter!("classchat_server_connections_total").increment(1);
		debug!(conn_id, %peer, "accepted connection");

		let state = state.clone();
		tokio::spawn(async move {
			let io = TokioIo::new(stream);
			let service = service_fn(move |req| handle_request(conn_id, req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).with_upgrades().await {
				debug!(conn_id, %peer, error = %err, "http connection error");
			}
		});
	}
}

async fn handle_request(
	conn_id: u64,
	mut req: Request<Incoming>,
	state: DeliveryState,
) -> Result<Response<Full<Bytes>>, Infallible> {
	let (room_id, user_id) = match parse_target(req.uri()) {
		Ok(Some(ids)) => ids,
		Ok(None) => return Ok(plain(StatusCode::NOT_FOUND, "not found")),
		Err(msg) => return Ok(plain(StatusCode::BAD_REQUEST, msg)),
	};

	if req.method() != Method::GET || !is_websocket_upgrade(req.headers()) {
		return Ok(plain(StatusCode::BAD_REQUEST, "websocket upgrade required"));
	}
	let Some(key) = req.headers().get(SEC_WEBSOCKET_KEY) else {
		return Ok(plain(StatusCode::BAD_REQUEST, "missing sec-websocket-key"));
	};
	let Ok(accept) = HeaderValue::from_str(&derive_accept_key(key.as_bytes())) else {
		return Ok(plain(StatusCode::INTERNAL_SERVER_ERROR, "internal error"));
	};

	match state.messages.is_authorized(&user_id, &room_id).await {
		Ok(true) => {}
		Ok(false) => {
			info!(conn_id, room = %room_id, user = %user_id, "rejected: not a member of the room");
			metrics::counter!("classchat_server_unauthorized_total").increment(1);
			return Ok(plain(StatusCode::UNAUTHORIZED, "unauthorized"));
		}
		Err(err) => {
			warn!(conn_id, room = %room_id, user = %user_id, error = %err, "authorization check failed");
			let status = StatusCode::from_u16(err.kind().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
			return Ok(plain(status, err.to_string()));
		}
	}

	let upgrade = hyper::upgrade::on(&mut req);
	tokio::spawn(async move {
		let upgraded = match upgrade.await {
			Ok(upgraded) => upgraded,
			Err(err) => {
				warn!(conn_id, error = %err, "websocket upgrade failed");
				return;
			}
		};

		let config = WebSocketConfig::default()
			.max_message_size(Some(state.settings.max_frame_size))
			.max_frame_size(Some(state.settings.max_frame_size));
		let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, Some(config)).await;
		let (sink, stream) = ws.split();

		let subscription = Subscription::new(room_id, user_id);
		if let Err(err) = run_subscription(
			conn_id,
			stream,
			sink,
			subscription,
			state.hub,
			state.messages,
			state.settings,
		)
		.await
		{
			warn!(conn_id, error = %err, "subscription ended with error");
		}
	});

	let mut resp = plain(StatusCode::SWITCHING_PROTOCOLS, Bytes::new());
	let headers = resp.headers_mut();
	headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
	headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
	headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
	Ok(resp)
}

fn header_has_token(headers: &HeaderMap, name: hyper::header::HeaderName, token: &str) -> bool {
	headers
		.get_all(name)
		.iter()
		.filter_map(|v| v.to_str().ok())
		.flat_map(|v| v.split(','))
		.any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
	header_has_token(headers, CONNECTION, "upgrade") && header_has_token(headers, UPGRADE, "websocket")
}

/// `Ok(None)` for paths this server does not serve.
fn parse_target(uri: &Uri) -> Result<Option<(RoomId, UserId)>, &'static str> {
	let Some(raw_room) = uri.path().strip_prefix(ROOM_PATH_PREFIX) else {
		return Ok(None);
	};
	if raw_room.contains('/') {
		return Ok(None);
	}

	let room = urlencoding::decode(raw_room).map_err(|_| "room id is not valid utf-8")?;
	let room_id = RoomId::new(room.into_owned()).map_err(|_| "invalid room id")?;

	let raw_user = uri
		.query()
		.unwrap_or_default()
		.split('&')
		.filter_map(|pair| pair.split_once('='))
		.find_map(|(k, v)| (k == "user_id").then_some(v))
		.ok_or("user_id is required")?;
	let user = urlencoding::decode(raw_user).map_err(|_| "user id is not valid utf-8")?;
	let user_id = UserId::new(user.into_owned()).map_err(|_| "invalid user id")?;

	Ok(Some((room_id, user_id)))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn target(s: &str) -> Result<Option<(RoomId, UserId)>, &'static str> {
		parse_target(&s.parse::<Uri>().expect("uri"))
	}

	#[test]
	fn parses_room_path_and_user_query() {
		let (room, user) = target("/ws/rooms/r1?user_id=u1").expect("ok").expect("served path");
		assert_eq!(room.as_str(), "r1");
		assert_eq!(user.as_str(), "u1");

		let (room, user) = target("/ws/rooms/team%20a?x=1&user_id=ada%40uni").expect("ok").expect("served");
		assert_eq!(room.as_str(), "team a");
		assert_eq!(user.as_str(), "ada@uni");
	}

	#[test]
	fn unknown_paths_are_not_served() {
		assert_eq!(target("/healthz"), Ok(None));
		assert_eq!(target("/ws/rooms/r1/extra?user_id=u1"), Ok(None));
	}

	#[test]
	fn missing_or_empty_ids_are_bad_requests() {
		assert!(target("/ws/rooms/r1").is_err());
		assert!(target("/ws/rooms/r1?user_id=").is_err());
		assert!(target("/ws/rooms/?user_id=u1").is_err());
		assert!(target("/ws/rooms/r%3F1?user_id=u1").is_err());
	}

	#[test]
	fn upgrade_headers_are_matched_as_tokens() {
		let mut headers = HeaderMap::new();
		headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
		headers.insert(UPGRADE, HeaderValue::from_static("WebSocket"));
		assert!(is_websocket_upgrade(&headers));

		headers.insert(UPGRADE, HeaderValue::from_static("h2c"));
		assert!(!is_websocket_upgrade(&headers));
	}
}
