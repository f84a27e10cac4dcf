#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use classchat_domain::{User, UserId};

use super::user_id_col;
use crate::store::{Statement, Store, StoreError};

const SELECT_USER: &str = "SELECT user_id, first_name, last_name, email FROM users WHERE user_id = ?";
const UPSERT_USER: &str = "INSERT INTO users (user_id, first_name, last_name, email) VALUES (?, ?, ?, ?) \
	ON CONFLICT (user_id) DO UPDATE SET first_name = excluded.first_name, last_name = excluded.last_name, email = excluded.email";
const EDIT_USER: &str = "UPDATE users SET first_name = ?, last_name = ?, email = ? WHERE user_id = ?";
const DELETE_USER: &str = "DELETE FROM users WHERE user_id = ?";

/// Local mirror of user profiles.
#[derive(Clone)]
pub struct UserStore {
	store: Arc<dyn Store>,
}

impl UserStore {
	pub fn new(store: Arc<dyn Store>) -> Self {
		Self { store }
	}

	pub async fn get(&self, user_id: &UserId) -> Result<Option<User>, StoreError> {
		let mut rows = self
			.store
			.query(&Statement::new(SELECT_USER).bind(user_id.as_str()))
			.await?;
		let Some(row) = rows.next() else {
			return Ok(None);
		};
		Ok(Some(User {
			user_id: user_id_col(row.text(0)?, 0)?,
			first_name: row.text(1)?.to_string(),
			last_name: row.text(2)?.to_string(),
			email: row.text(3)?.to_string(),
		}))
	}

	/// Profiles for every id that still exists; missing ids are skipped.
	pub async fn get_many<'a>(
		&self,
		user_ids: impl IntoIterator<Item = &'a UserId>,
	) -> Result<HashMap<UserId, User>, StoreError> {
		let mut out = HashMap::new();
		for user_id in user_ids {
			if out.contains_key(user_id) {
				continue;
			}
			if let Some(user) = self.get(user_id).await? {
				out.insert(user_id.clone(), user);
			}
		}
		Ok(out)
	}

	pub async fn save(&self, user: &User) -> Result<(), StoreError> {
		self.store
			.execute(
				&Statement::new(UPSERT_USER)
					.bind(user.user_id.as_str())
					.bind(user.first_name.as_str())
					.bind(user.last_name.as_str())
					.bind(user.email.as_str()),
			)
			.await
	}

	/// Returns `false` when the user does not exist.
	pub async fn edit(&self, user: &User) -> Result<bool, StoreError> {
		self.store
			.conditional_execute(
				&Statement::new(EDIT_USER)
					.bind(user.first_name.as_str())
					.bind(user.last_name.as_str())
					.bind(user.email.as_str())
					.bind(user.user_id.as_str()),
			)
			.await
	}

	pub async fn delete(&self, user_id: &UserId) -> Result<(), StoreError> {
		self.store
			.execute(&Statement::new(DELETE_USER).bind(user_id.as_str()))
			.await
	}
}
