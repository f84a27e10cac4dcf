#![forbid(unsafe_code)]

pub mod mailer;
pub mod message_service;
pub mod profile_sync;
pub mod room_service;

pub use mailer::{LogMailer, Mailer, SmtpMailer};
pub use message_service::MessageService;
pub use profile_sync::{ProfileEvent, ProfileEventError, ProfileSync};
pub use room_service::RoomService;

use std::future::Future;
use std::time::Duration;

use classchat_domain::ServiceError;
use tracing::warn;

use crate::store::StoreError;

/// Deadline applied to every storage-facing service call.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default page size for message history.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Largest page a caller may ask for.
pub const MAX_PAGE_SIZE: u32 = 100;

impl From<StoreError> for ServiceError {
	fn from(err: StoreError) -> Self {
		ServiceError::Internal(err.to_string())
	}
}

/// Run `fut` under `deadline`. Expiry becomes `Internal`; the inner
/// future is dropped, which cancels whatever storage call it was awaiting.
pub(crate) async fn with_deadline<T, F>(op: &'static str, deadline: Duration, fut: F) -> Result<T, ServiceError>
where
	F: Future<Output = Result<T, ServiceError>>,
{
	match tokio::time::timeout(deadline, fut).await {
		Ok(Ok(v)) => Ok(v),
		Ok(Err(err)) => {
			if let ServiceError::Internal(msg) = &err {
				warn!(op, error = %msg, "service operation failed");
				metrics::counter!("classchat_service_internal_errors_total", "op" => op).increment(1);
			}
			Err(err)
		}
		Err(_) => {
			warn!(op, timeout_ms = deadline.as_millis() as u64, "storage deadline exceeded");
			metrics::counter!("classchat_store_timeouts_total", "op" => op).increment(1);
			Err(ServiceError::internal(format!("{op}: storage deadline exceeded")))
		}
	}
}
