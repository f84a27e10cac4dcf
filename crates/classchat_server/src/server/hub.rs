#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use classchat_domain::{RoomId, SubscriptionId, UserId};
use classchat_protocol::Envelope;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Configuration for `Hub`.
#[derive(Debug, Clone)]
pub struct HubConfig {
	/// Outbound queue depth per subscription; a full queue gets the
	/// subscriber evicted.
	pub subscriber_queue_capacity: usize,

	/// Depth of the register/unregister/broadcast input queues.
	pub control_queue_capacity: usize,

	pub debug_logs: bool,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			subscriber_queue_capacity: 256,
			control_queue_capacity: 1024,
			debug_logs: false,
		}
	}
}

/// Binding of one live connection to one room and one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
	pub id: SubscriptionId,
	pub room_id: RoomId,
	pub user_id: UserId,
}

impl Subscription {
	pub fn new(room_id: RoomId, user_id: UserId) -> Self {
		Self {
			id: SubscriptionId::new_v4(),
			room_id,
			user_id,
		}
	}
}

/// Receiving end of a subscription's outbound queue. Yields `None` once
/// the hub has released the subscription.
pub type Outbound = mpsc::Receiver<Arc<Envelope>>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("hub is shut down")]
pub struct HubClosed;

struct Registration {
	subscription: Subscription,
	outbound: mpsc::Sender<Arc<Envelope>>,
}

type CountsReply = oneshot::Sender<HashMap<RoomId, usize>>;

/// Cloneable handle; every operation is a send into one of the hub's queues.
#[derive(Debug, Clone)]
pub struct HubHandle {
	register_tx: mpsc::Sender<Registration>,
	unregister_tx: mpsc::Sender<Subscription>,
	broadcast_tx: mpsc::Sender<Arc<Envelope>>,
	inspect_tx: mpsc::Sender<CountsReply>,
	subscriber_queue_capacity: usize,
}

impl HubHandle {
	/// Creates the subscription's outbound queue and hands the sending
	/// side to the hub.
	pub async fn register(&self, subscription: Subscription) -> Result<Outbound, HubClosed> {
		let (tx, rx) = mpsc::channel(self.subscriber_queue_capacity);
		self.register_tx
			.send(Registration {
				subscription,
				outbound: tx,
			})
			.await
			.map_err(|_| HubClosed)?;
		Ok(rx)
	}

	pub async fn unregister(&self, subscription: Subscription) -> Result<(), HubClosed> {
		self.unregister_tx.send(subscription).await.map_err(|_| HubClosed)
	}

	pub async fn broadcast(&self, envelope: Envelope) -> Result<(), HubClosed> {
		self.broadcast_tx.send(Arc::new(envelope)).await.map_err(|_| HubClosed)
	}

	/// Live subscription count per room.
	pub async fn room_counts(&self) -> Result<HashMap<RoomId, usize>, HubClosed> {
		let (tx, rx) = oneshot::channel();
		self.inspect_tx.send(tx).await.map_err(|_| HubClosed)?;
		rx.await.map_err(|_| HubClosed)
	}
}

struct Member {
	user_id: UserId,
	outbound: mpsc::Sender<Arc<Envelope>>,
}

/// Owner of the `room -> subscriptions` registry. Only the hub task
/// touches `rooms`.
pub struct Hub {
	rooms: HashMap<RoomId, HashMap<SubscriptionId, Member>>,
	cfg: HubConfig,
}

impl Hub {
	/// Start the hub task. It runs until every `HubHandle` is dropped.
	pub fn spawn(cfg: HubConfig) -> (HubHandle, JoinHandle<()>) {
		let cap = cfg.control_queue_capacity.max(1);
		let (register_tx, register_rx) = mpsc::channel(cap);
		let (unregister_tx, unregister_rx) = mpsc::channel(cap);
		let (broadcast_tx, broadcast_rx) = mpsc::channel(cap);
		let (inspect_tx, inspect_rx) = mpsc::channel(16);

		let handle = HubHandle {
			register_tx,
			unregister_tx,
			broadcast_tx,
			inspect_tx,
			subscriber_queue_capacity: cfg.subscriber_queue_capacity.max(1),
		};

		let hub = Hub {
			rooms: HashMap::new(),
			cfg,
		};
		let task = tokio::spawn(hub.run(register_rx, unregister_rx, broadcast_rx, inspect_rx));
		(handle, task)
	}

	async fn run(
		mut self,
		mut register_rx: mpsc::Receiver<Registration>,
		mut unregister_rx: mpsc::Receiver<Subscription>,
		mut broadcast_rx: mpsc::Receiver<Arc<Envelope>>,
		mut inspect_rx: mpsc::Receiver<CountsReply>,
	) {
		info!("hub started");
		loop {
			// Fixed priority: a register or unregister queued before a
			// broadcast is applied before it.
			tokio::select! {
				biased;
				Some(reg) = register_rx.recv() => self.register(reg),
				Some(sub) = unregister_rx.recv() => self.unregister(&sub),
				Some(env) = broadcast_rx.recv() => self.broadcast(env),
				Some(reply) = inspect_rx.recv() => {
					let _ = reply.send(self.counts());
				}
				else => break,
			}
		}
		info!(rooms = self.rooms.len(), "hub stopped");
	}

	fn register(&mut self, reg: Registration) {
		let Registration { subscription, outbound } = reg;
		let members = self.rooms.entry(subscription.room_id.clone()).or_default();
		members.insert(
			subscription.id,
			Member {
				user_id: subscription.user_id.clone(),
				outbound,
			},
		);

		if self.cfg.debug_logs {
			debug!(room = %subscription.room_id, user = %subscription.user_id, subs = members.len(), "hub: registered");
		}
		self.record_gauges();
	}

	fn unregister(&mut self, sub: &Subscription) {
		let Some(members) = self.rooms.get_mut(&sub.room_id) else {
			return;
		};
		// Dropping the sender closes the subscription's queue.
		let removed = members.remove(&sub.id).is_some();
		let now_empty = members.is_empty();
		if now_empty {
			self.rooms.remove(&sub.room_id);
		}

		if self.cfg.debug_logs && removed {
			debug!(room = %sub.room_id, user = %sub.user_id, room_closed = now_empty, "hub: unregistered");
		}
		self.record_gauges();
	}

	fn broadcast(&mut self, env: Arc<Envelope>) {
		let room_id = &env.message.room_id;
		let Some(members) = self.rooms.get_mut(room_id) else {
			if self.cfg.debug_logs {
				debug!(room = %room_id, "hub: broadcast to room without subscribers");
			}
			return;
		};

		let mut delivered: u64 = 0;
		let mut evicted = Vec::new();
		for (id, member) in members.iter() {
			if member.user_id == env.message.from_user_id {
				continue;
			}
			match member.outbound.try_send(Arc::clone(&env)) {
				Ok(()) => delivered += 1,
				Err(TrySendError::Full(_)) => evicted.push((*id, "full")),
				Err(TrySendError::Closed(_)) => evicted.push((*id, "closed")),
			}
		}

		for (id, reason) in &evicted {
			members.remove(id);
			metrics::counter!("classchat_hub_evicted_total", "reason" => *reason).increment(1);
		}
		let now_empty = members.is_empty();
		if now_empty {
			self.rooms.remove(room_id);
		}

		metrics::counter!("classchat_hub_delivered_total").increment(delivered);
		if !evicted.is_empty() {
			debug!(
				room = %room_id,
				evicted = evicted.len(),
				delivered,
				"hub: evicted subscribers with full or closed queues"
			);
			self.record_gauges();
		}
	}

	fn counts(&self) -> HashMap<RoomId, usize> {
		self.rooms.iter().map(|(room, members)| (room.clone(), members.len())).collect()
	}

	fn record_gauges(&self) {
		let subs: usize = self.rooms.values().map(HashMap::len).sum();
		metrics::gauge!("classchat_hub_rooms").set(self.rooms.len() as f64);
		metrics::gauge!("classchat_hub_subscriptions").set(subs as f64);
	}
}
