#![forbid(unsafe_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix time in microseconds.
#[inline]
pub fn unix_micros_now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or(Duration::from_secs(0))
		.as_micros() as i64
}

/// Hands out send timestamps that never repeat or go backwards for one
/// connection, even if the wall clock does.
#[derive(Debug, Default)]
pub struct MonotonicStamp {
	last: i64,
}

impl MonotonicStamp {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn next(&mut self) -> i64 {
		self.next_from(unix_micros_now())
	}

	fn next_from(&mut self, now: i64) -> i64 {
		let ts = now.max(self.last.saturating_add(1));
		self.last = ts;
		ts
	}
}
