#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use classchat_domain::{RoomId, User, UserId};

use crate::repository::UserStore;
use crate::store::{Batch, BatchMode, Rows, SqliteStore, Statement, Store, StoreError};

pub(crate) fn rid(s: &str) -> RoomId {
	RoomId::new(s).expect("valid RoomId")
}

pub(crate) fn uid(s: &str) -> UserId {
	UserId::new(s).expect("valid UserId")
}

pub(crate) async fn memory_store() -> Arc<SqliteStore> {
	Arc::new(SqliteStore::connect("sqlite::memory:").await.expect("memory store"))
}

pub(crate) async fn seed_user(users: &UserStore, id: &str, first: &str, last: &str) -> User {
	let user = User {
		user_id: uid(id),
		first_name: first.to_string(),
		last_name: last.to_string(),
		email: format!("{id}@example.edu"),
	};
	users.save(&user).await.expect("seed user");
	user
}

const NO_FAILURE: usize = usize::MAX;

/// Passes everything through, except that the next best-effort batch
/// can be told to fail at a given statement after applying the ones
/// before it.
pub(crate) struct FailingStore {
	inner: Arc<SqliteStore>,
	fail_next_batch_at: AtomicUsize,
}

impl FailingStore {
	pub(crate) fn new(inner: Arc<SqliteStore>) -> Self {
		Self {
			inner,
			fail_next_batch_at: AtomicUsize::new(NO_FAILURE),
		}
	}

	pub(crate) fn fail_next_batch_at(&self, index: usize) {
		self.fail_next_batch_at.store(index, Ordering::SeqCst);
	}
}

#[async_trait::async_trait]
impl Store for FailingStore {
	async fn execute(&self, stmt: &Statement) -> Result<(), StoreError> {
		self.inner.execute(stmt).await
	}

	async fn query(&self, stmt: &Statement) -> Result<Rows, StoreError> {
		self.inner.query(stmt).await
	}

	async fn conditional_execute(&self, stmt: &Statement) -> Result<bool, StoreError> {
		self.inner.conditional_execute(stmt).await
	}

	async fn execute_batch(&self, batch: Batch) -> Result<(), StoreError> {
		let fail_at = self.fail_next_batch_at.swap(NO_FAILURE, Ordering::SeqCst);
		if fail_at == NO_FAILURE || batch.mode != BatchMode::BestEffortMultiPartition {
			return self.inner.execute_batch(batch).await;
		}

		for stmt in batch.statements.iter().take(fail_at) {
			self.inner.execute(stmt).await?;
		}
		Err(StoreError::Batch {
			index: fail_at,
			source: Box::new(StoreError::Unavailable("injected partition failure".into())),
		})
	}
}

/// Never answers within any reasonable deadline.
pub(crate) struct StalledStore {
	pub(crate) delay: Duration,
}

#[async_trait::async_trait]
impl Store for StalledStore {
	async fn execute(&self, _stmt: &Statement) -> Result<(), StoreError> {
		tokio::time::sleep(self.delay).await;
		Ok(())
	}

	async fn query(&self, _stmt: &Statement) -> Result<Rows, StoreError> {
		tokio::time::sleep(self.delay).await;
		Ok(Rows::default())
	}

	async fn conditional_execute(&self, _stmt: &Statement) -> Result<bool, StoreError> {
		tokio::time::sleep(self.delay).await;
		Ok(true)
	}

	async fn execute_batch(&self, _batch: Batch) -> Result<(), StoreError> {
		tokio::time::sleep(self.delay).await;
		Ok(())
	}
}
