#![forbid(unsafe_code)]

use std::str::FromStr;

use anyhow::{Context, anyhow};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row as _, Sqlite, SqlitePool, TypeInfo as _, ValueRef as _};
use tracing::{debug, warn};

use super::{Batch, BatchMode, Row, Rows, Statement, Store, StoreError, Value};

/// `Store` backed by SQLite through sqlx.
#[derive(Clone)]
pub struct SqliteStore {
	pool: SqlitePool,
}

impl SqliteStore {
	/// Connect and run migrations. `sqlite::memory:` gets a single
	/// long-lived connection so every caller sees the same database.
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if !database_url.starts_with("sqlite:") {
			return Err(anyhow!("unsupported database_url (expected sqlite:...): {database_url}"));
		}

		let pool = if database_url.contains(":memory:") {
			SqlitePoolOptions::new()
				.max_connections(1)
				.idle_timeout(None)
				.max_lifetime(None)
				.connect(database_url)
				.await
				.context("connect sqlite (memory)")?
		} else {
			let opts = SqliteConnectOptions::from_str(database_url)
				.context("parse sqlite url")?
				.create_if_missing(true);
			SqlitePoolOptions::new()
				.connect_with(opts)
				.await
				.context("connect sqlite")?
		};

		sqlx::migrate!("migrations/sqlite")
			.run(&pool)
			.await
			.context("run sqlite migrations")?;

		debug!(database_url, "sqlite store ready");
		Ok(Self { pool })
	}
}

fn bind_params<'q>(stmt: &'q Statement) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
	let mut query = sqlx::query(stmt.sql);
	for param in &stmt.params {
		query = match param {
			Value::Text(s) => query.bind(s.as_str()),
			Value::Int(v) => query.bind(*v),
			Value::Bool(b) => query.bind(*b),
			Value::Null => query.bind(Option::<String>::None),
		};
	}
	query
}

fn decode_row(row: &SqliteRow) -> Result<Row, StoreError> {
	let mut values = Vec::with_capacity(row.len());
	for idx in 0..row.len() {
		let raw = row.try_get_raw(idx)?;
		if raw.is_null() {
			values.push(Value::Null);
			continue;
		}
		let is_integer = matches!(raw.type_info().name(), "INTEGER" | "BOOLEAN");
		let value = if is_integer {
			Value::Int(row.try_get::<i64, _>(idx)?)
		} else {
			Value::Text(row.try_get::<String, _>(idx)?)
		};
		values.push(value);
	}
	Ok(Row::new(values))
}

#[async_trait::async_trait]
impl Store for SqliteStore {
	async fn execute(&self, stmt: &Statement) -> Result<(), StoreError> {
		bind_params(stmt).execute(&self.pool).await?;
		Ok(())
	}

	async fn query(&self, stmt: &Statement) -> Result<Rows, StoreError> {
		let rows = bind_params(stmt).fetch_all(&self.pool).await?;
		let decoded = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
		Ok(Rows::new(decoded))
	}

	async fn conditional_execute(&self, stmt: &Statement) -> Result<bool, StoreError> {
		let res = bind_params(stmt).execute(&self.pool).await?;
		Ok(res.rows_affected() > 0)
	}

	async fn execute_batch(&self, batch: Batch) -> Result<(), StoreError> {
		match batch.mode {
			BatchMode::AtomicSinglePartition => {
				let mut tx = self.pool.begin().await?;
				for (index, stmt) in batch.statements.iter().enumerate() {
					if let Err(e) = bind_params(stmt).execute(&mut *tx).await {
						return Err(StoreError::Batch {
							index,
							source: Box::new(e.into()),
						});
					}
				}
				tx.commit().await?;
			}
			BatchMode::BestEffortMultiPartition => {
				for (index, stmt) in batch.statements.iter().enumerate() {
					if let Err(e) = bind_params(stmt).execute(&self.pool).await {
						warn!(
							index,
							total = batch.statements.len(),
							error = %e,
							"best-effort batch stopped; earlier statements stay applied"
						);
						metrics::counter!("classchat_store_partial_batches_total").increment(1);
						return Err(StoreError::Batch {
							index,
							source: Box::new(e.into()),
						});
					}
				}
			}
		}
		Ok(())
	}
}
