#![forbid(unsafe_code)]

//! Generic statement-execution store used by the repositories.
//!
//! The contract mirrors a wide-column driver: parameterized statements,
//! row cursors, conditional (compare-and-set) writes and multi-statement
//! batches that may or may not be atomic.

mod sqlite;

use std::collections::VecDeque;

use thiserror::Error;

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("store query failed: {0}")]
	Query(#[from] sqlx::Error),

	#[error("column {index} missing or not {expected}")]
	Column {
		index: usize,
		expected: &'static str,
	},

	#[error("batch statement {index} failed: {source}")]
	Batch {
		index: usize,
		#[source]
		source: Box<StoreError>,
	},

	#[error("store unavailable: {0}")]
	Unavailable(String),
}

/// Bound parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
	Text(String),
	Int(i64),
	Bool(bool),
	Null,
}

impl StoreError {
	/// The write hit an existing primary or unique key.
	pub fn is_duplicate_key(&self) -> bool {
		match self {
			Self::Query(sqlx::Error::Database(db)) => db.is_unique_violation(),
			Self::Batch { source, .. } => source.is_duplicate_key(),
			_ => false,
		}
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Text(v.to_string())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Text(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Int(v)
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl<T: Into<Value>> From<Option<T>> for Value {
	fn from(v: Option<T>) -> Self {
		v.map(Into::into).unwrap_or(Value::Null)
	}
}

/// A prepared statement plus its positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
	pub sql: &'static str,
	pub params: Vec<Value>,
}

impl Statement {
	pub fn new(sql: &'static str) -> Self {
		Self { sql, params: Vec::new() }
	}

	pub fn bind(mut self, v: impl Into<Value>) -> Self {
		self.params.push(v.into());
		self
	}
}

/// One result row, columns in `SELECT` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
	values: Vec<Value>,
}

impl Row {
	pub fn new(values: Vec<Value>) -> Self {
		Self { values }
	}

	pub fn text(&self, index: usize) -> Result<&str, StoreError> {
		match self.values.get(index) {
			Some(Value::Text(s)) => Ok(s),
			_ => Err(StoreError::Column { index, expected: "text" }),
		}
	}

	pub fn int(&self, index: usize) -> Result<i64, StoreError> {
		match self.values.get(index) {
			Some(Value::Int(v)) => Ok(*v),
			_ => Err(StoreError::Column {
				index,
				expected: "integer",
			}),
		}
	}

	pub fn opt_int(&self, index: usize) -> Result<Option<i64>, StoreError> {
		match self.values.get(index) {
			Some(Value::Null) => Ok(None),
			_ => self.int(index).map(Some),
		}
	}

	/// Booleans may come back as `0`/`1` integers.
	pub fn bool(&self, index: usize) -> Result<bool, StoreError> {
		match self.values.get(index) {
			Some(Value::Bool(b)) => Ok(*b),
			Some(Value::Int(v)) => Ok(*v != 0),
			_ => Err(StoreError::Column {
				index,
				expected: "boolean",
			}),
		}
	}
}

/// Cursor over query results.
#[derive(Debug, Default)]
pub struct Rows {
	rows: VecDeque<Row>,
}

impl Rows {
	pub fn new(rows: impl IntoIterator<Item = Row>) -> Self {
		Self {
			rows: rows.into_iter().collect(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}
}

impl Iterator for Rows {
	type Item = Row;

	fn next(&mut self) -> Option<Row> {
		self.rows.pop_front()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
	/// All statements commit together or not at all.
	AtomicSinglePartition,
	/// Statements are submitted together but may partially apply.
	BestEffortMultiPartition,
}

#[derive(Debug, Clone)]
pub struct Batch {
	pub mode: BatchMode,
	pub statements: Vec<Statement>,
}

impl Batch {
	pub fn new(mode: BatchMode) -> Self {
		Self {
			mode,
			statements: Vec::new(),
		}
	}

	pub fn add(&mut self, stmt: Statement) -> &mut Self {
		self.statements.push(stmt);
		self
	}

	pub fn len(&self) -> usize {
		self.statements.len()
	}

	pub fn is_empty(&self) -> bool {
		self.statements.is_empty()
	}
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
	async fn execute(&self, stmt: &Statement) -> Result<(), StoreError>;

	async fn query(&self, stmt: &Statement) -> Result<Rows, StoreError>;

	/// Returns whether the statement's condition held and the write applied.
	async fn conditional_execute(&self, stmt: &Statement) -> Result<bool, StoreError>;

	/// A `BestEffortMultiPartition` batch stops at the first failing
	/// statement and leaves the earlier ones applied.
	async fn execute_batch(&self, batch: Batch) -> Result<(), StoreError>;
}
