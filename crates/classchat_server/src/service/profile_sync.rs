#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use classchat_domain::{ParseIdError, ServiceError, User, UserId};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::{DEFAULT_OP_TIMEOUT, with_deadline};
use crate::repository::UserStore;
use crate::store::Store;

#[derive(Debug, Error)]
pub enum ProfileEventError {
	#[error("unknown routing key: {0}")]
	UnknownRoutingKey(String),

	#[error("malformed profile body: {0}")]
	Body(#[from] serde_json::Error),

	#[error("invalid user id: {0}")]
	Id(#[from] ParseIdError),
}

/// A change published by the profile service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
	Created(User),
	Updated(User),
	Deleted(UserId),
}

#[derive(Deserialize)]
struct ProfileBody {
	id: String,
	#[serde(default)]
	first_name: String,
	#[serde(default)]
	last_name: String,
	#[serde(default)]
	email: String,
}

impl ProfileBody {
	fn into_user(self) -> Result<User, ProfileEventError> {
		Ok(User {
			user_id: UserId::new(self.id)?,
			first_name: self.first_name,
			last_name: self.last_name,
			email: self.email,
		})
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeleteBody {
	Object { id: String },
	Bare(String),
}

impl ProfileEvent {
	/// Decode one delivery. Delete bodies may be `{"id": ..}`, a JSON
	/// string, or the bare id bytes.
	pub fn from_delivery(routing_key: &str, body: &[u8]) -> Result<Self, ProfileEventError> {
		match routing_key {
			"profile.created" => Ok(Self::Created(serde_json::from_slice::<ProfileBody>(body)?.into_user()?)),
			"profile.updated" => Ok(Self::Updated(serde_json::from_slice::<ProfileBody>(body)?.into_user()?)),
			"profile.deleted" => {
				let id = match serde_json::from_slice::<DeleteBody>(body) {
					Ok(DeleteBody::Object { id } | DeleteBody::Bare(id)) => id,
					Err(_) => String::from_utf8_lossy(body).trim().to_string(),
				};
				Ok(Self::Deleted(UserId::new(id)?))
			}
			other => Err(ProfileEventError::UnknownRoutingKey(other.to_string())),
		}
	}

	fn kind(&self) -> &'static str {
		match self {
			Self::Created(_) => "created",
			Self::Updated(_) => "updated",
			Self::Deleted(_) => "deleted",
		}
	}
}

/// One line of the local feed.
#[derive(Deserialize)]
struct FeedLine {
	routing_key: String,
	body: serde_json::Value,
}

/// Keeps the local user mirror in step with the profile service.
#[derive(Clone)]
pub struct ProfileSync {
	users: UserStore,
	op_timeout: Duration,
}

impl ProfileSync {
	pub fn new(store: Arc<dyn Store>) -> Self {
		Self {
			users: UserStore::new(store),
			op_timeout: DEFAULT_OP_TIMEOUT,
		}
	}

	pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
		self.op_timeout = op_timeout;
		self
	}

	pub async fn apply(&self, event: ProfileEvent) -> Result<(), ServiceError> {
		with_deadline("profile_sync", self.op_timeout, async {
			match &event {
				ProfileEvent::Created(user) => self.users.save(user).await?,
				ProfileEvent::Updated(user) => {
					// An update can overtake its create; store it either way.
					if !self.users.edit(user).await? {
						debug!(user = %user.user_id, "update for unknown user; inserting");
						self.users.save(user).await?;
					}
				}
				ProfileEvent::Deleted(user_id) => self.users.delete(user_id).await?,
			}
			Ok(())
		})
		.await
	}

	/// Apply newline-delimited `{"routing_key", "body"}` records until EOF.
	/// Bad lines are logged and skipped. Returns how many were applied.
	pub async fn consume<R>(&self, reader: R) -> anyhow::Result<usize>
	where
		R: AsyncBufRead + Unpin,
	{
		let mut lines = reader.lines();
		let mut applied = 0usize;
		while let Some(line) = lines.next_line().await.context("read profile feed")? {
			let line = line.trim();
			if line.is_empty() {
				continue;
			}

			let event = match serde_json::from_str::<FeedLine>(line)
				.map_err(ProfileEventError::from)
				.and_then(|rec| {
					let body = serde_json::to_vec(&rec.body)?;
					ProfileEvent::from_delivery(&rec.routing_key, &body)
				}) {
				Ok(event) => event,
				Err(err) => {
					warn!(error = %err, "skipping malformed profile event");
					metrics::counter!("classchat_profile_events_total", "outcome" => "malformed").increment(1);
					continue;
				}
			};

			let kind = event.kind();
			match self.apply(event).await {
				Ok(()) => {
					applied += 1;
					metrics::counter!("classchat_profile_events_total", "outcome" => "applied").increment(1);
					debug!(kind, "profile event applied");
				}
				Err(err) => {
					warn!(kind, error = %err, "profile event not applied");
					metrics::counter!("classchat_profile_events_total", "outcome" => "failed").increment(1);
				}
			}
		}
		Ok(applied)
	}
}

pub fn spawn_profile_feed(bind: SocketAddr, sync: ProfileSync) {
	tokio::spawn(async move {
		if let Err(err) = run_profile_feed(bind, sync).await {
			warn!(error = %err, "profile feed stopped");
		}
	});
}

async fn run_profile_feed(bind: SocketAddr, sync: ProfileSync) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind)
		.await
		.with_context(|| format!("bind profile feed on {bind}"))?;
	info!(%bind, "profile feed listening");
	loop {
		let (stream, peer) = listener.accept().await?;
		let sync = sync.clone();
		tokio::spawn(async move {
			match sync.consume(BufReader::new(stream)).await {
				Ok(applied) => info!(%peer, applied, "profile feed connection closed"),
				Err(err) => warn!(%peer, error = %err, "profile feed connection error"),
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{memory_store, uid};

	#[test]
	fn decodes_routing_keys() {
		let body = br#"{"id":"u1","first_name":"Uma","last_name":"One","email":"u1@example.edu"}"#;
		match ProfileEvent::from_delivery("profile.created", body).expect("created") {
			ProfileEvent::Created(user) => {
				assert_eq!(user.user_id, uid("u1"));
				assert_eq!(user.display_name(), "Uma One");
			}
			other => panic!("expected Created, got: {other:?}"),
		}
		assert!(matches!(
			ProfileEvent::from_delivery("profile.updated", body).expect("updated"),
			ProfileEvent::Updated(_)
		));
	}

	#[test]
	fn delete_accepts_object_string_or_bare_id() {
		for body in [&br#"{"id":"u1"}"#[..], &br#""u1""#[..], &b"u1\n"[..]] {
			let event = ProfileEvent::from_delivery("profile.deleted", body).expect("deleted");
			assert_eq!(event, ProfileEvent::Deleted(uid("u1")));
		}
	}

	#[test]
	fn rejects_unknown_keys_and_bad_bodies() {
		assert!(matches!(
			ProfileEvent::from_delivery("profile.renamed", b"{}"),
			Err(ProfileEventError::UnknownRoutingKey(_))
		));
		assert!(matches!(
			ProfileEvent::from_delivery("profile.created", b"not json"),
			Err(ProfileEventError::Body(_))
		));
		assert!(matches!(
			ProfileEvent::from_delivery("profile.created", br#"{"id":""}"#),
			Err(ProfileEventError::Id(_))
		));
	}

	#[tokio::test]
	async fn apply_mirrors_create_update_delete() {
		let store = memory_store().await;
		let sync = ProfileSync::new(store.clone());
		let users = UserStore::new(store);

		let mut user = User {
			user_id: uid("u1"),
			first_name: "Uma".into(),
			last_name: "One".into(),
			email: "u1@example.edu".into(),
		};
		sync.apply(ProfileEvent::Created(user.clone())).await.expect("create");
		assert_eq!(users.get(&uid("u1")).await.expect("get"), Some(user.clone()));

		user.last_name = "Renamed".into();
		sync.apply(ProfileEvent::Updated(user.clone())).await.expect("update");
		assert_eq!(users.get(&uid("u1")).await.expect("get"), Some(user));

		sync.apply(ProfileEvent::Deleted(uid("u1"))).await.expect("delete");
		assert_eq!(users.get(&uid("u1")).await.expect("get"), None);
	}

	#[tokio::test]
	async fn update_before_create_still_lands() {
		let store = memory_store().await;
		let sync = ProfileSync::new(store.clone());
		let user = User {
			user_id: uid("u2"),
			first_name: "Ugo".into(),
			last_name: "Two".into(),
			email: "u2@example.edu".into(),
		};
		sync.apply(ProfileEvent::Updated(user.clone())).await.expect("update");
		assert_eq!(UserStore::new(store).get(&uid("u2")).await.expect("get"), Some(user));
	}

	#[tokio::test]
	async fn feed_skips_malformed_lines() {
		let store = memory_store().await;
		let sync = ProfileSync::new(store.clone());
		let feed = concat!(
			r#"{"routing_key":"profile.created","body":{"id":"u1","first_name":"Uma","last_name":"One","email":"u1@example.edu"}}"#,
			"\n",
			"garbage\n",
			"\n",
			r#"{"routing_key":"profile.nope","body":{}}"#,
			"\n",
			r#"{"routing_key":"profile.deleted","body":{"id":"u1"}}"#,
			"\n",
		);

		let applied = sync.consume(feed.as_bytes()).await.expect("consume");
		assert_eq!(applied, 2);
		assert_eq!(UserStore::new(store).get(&uid("u1")).await.expect("get"), None);
	}
}
