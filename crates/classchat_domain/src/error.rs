#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome classes surfaced by every service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	NotFound,
	Conflict,
	Unauthorized,
	BadRequest,
	Internal,
}

impl ErrorKind {
	/// Stable HTTP status for the delivery boundary.
	pub const fn http_status(self) -> u16 {
		match self {
			ErrorKind::NotFound => 404,
			ErrorKind::Conflict => 409,
			ErrorKind::Unauthorized => 401,
			ErrorKind::BadRequest => 400,
			ErrorKind::Internal => 500,
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorKind::NotFound => "not_found",
			ErrorKind::Conflict => "conflict",
			ErrorKind::Unauthorized => "unauthorized",
			ErrorKind::BadRequest => "bad_request",
			ErrorKind::Internal => "internal",
		}
	}
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
	#[error("not found: {0}")]
	NotFound(String),
	#[error("conflict: {0}")]
	Conflict(String),
	#[error("unauthorized: {0}")]
	Unauthorized(String),
	#[error("bad request: {0}")]
	BadRequest(String),
	#[error("internal error: {0}")]
	Internal(String),
}

impl ServiceError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			ServiceError::NotFound(_) => ErrorKind::NotFound,
			ServiceError::Conflict(_) => ErrorKind::Conflict,
			ServiceError::Unauthorized(_) => ErrorKind::Unauthorized,
			ServiceError::BadRequest(_) => ErrorKind::BadRequest,
			ServiceError::Internal(_) => ErrorKind::Internal,
		}
	}

	pub fn not_found(msg: impl Into<String>) -> Self {
		ServiceError::NotFound(msg.into())
	}

	pub fn conflict(msg: impl Into<String>) -> Self {
		ServiceError::Conflict(msg.into())
	}

	pub fn unauthorized(msg: impl Into<String>) -> Self {
		ServiceError::Unauthorized(msg.into())
	}

	pub fn bad_request(msg: impl Into<String>) -> Self {
		ServiceError::BadRequest(msg.into())
	}

	pub fn internal(msg: impl Into<String>) -> Self {
		ServiceError::Internal(msg.into())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn each_kind_maps_to_one_status() {
		let cases = [
			(ServiceError::not_found("room"), 404),
			(ServiceError::conflict("room is full"), 409),
			(ServiceError::unauthorized("not admin"), 401),
			(ServiceError::bad_request("missing id"), 400),
			(ServiceError::internal("store"), 500),
		];
		for (err, status) in cases {
			assert_eq!(err.kind().http_status(), status, "{err}");
		}
	}
}
