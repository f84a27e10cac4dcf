#![forbid(unsafe_code)]

pub mod endpoint {
	use std::net::SocketAddr;

	use thiserror::Error;

	#[derive(Debug, Error, Clone, PartialEq, Eq)]
	pub enum EndpointError {
		#[error("endpoint must be non-empty (expected ws://host:port)")]
		Empty,
		#[error("unsupported scheme (expected ws://host:port): {0}")]
		Scheme(String),
		#[error("endpoint must not carry a path, query or fragment: {0}")]
		Trailing(String),
		#[error("invalid host (IPv6 must be bracketed like ws://[::1]:18080): {0}")]
		Host(String),
		#[error("invalid port (expected 1..=65535): {0}")]
		Port(String),
		#[error("host must be an IP literal to bind: {0}")]
		NotIpLiteral(String),
	}

	/// Parsed `ws://host:port` listen endpoint.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct WsEndpoint {
		pub host: String,
		pub port: u16,
	}

	impl WsEndpoint {
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Base URL for clients, e.g. `ws://127.0.0.1:18080`.
		pub fn url(&self) -> String {
			format!("ws://{}", self.hostport())
		}

		/// Bind address; DNS names are refused.
		pub fn to_socket_addr(&self) -> Result<SocketAddr, EndpointError> {
			self.hostport()
				.parse()
				.map_err(|_| EndpointError::NotIpLiteral(self.host.clone()))
		}

		pub fn parse(s: &str) -> Result<Self, EndpointError> {
			let s = s.trim();
			if s.is_empty() {
				return Err(EndpointError::Empty);
			}

			let rest = s.strip_prefix("ws://").ok_or_else(|| EndpointError::Scheme(s.to_string()))?;

			if rest.contains(['/', '?', '#']) {
				return Err(EndpointError::Trailing(s.to_string()));
			}

			let (host, port_str) = rest.rsplit_once(':').ok_or_else(|| EndpointError::Port(s.to_string()))?;

			let host = host.trim();
			if host.is_empty() || (host.contains(':') && !(host.starts_with('[') && host.ends_with(']'))) {
				return Err(EndpointError::Host(s.to_string()));
			}

			let port = match port_str.trim().parse::<u16>() {
				Ok(p) if p != 0 => p,
				_ => return Err(EndpointError::Port(s.to_string())),
			};

			Ok(Self {
				host: host.to_string(),
				port,
			})
		}
	}

}

pub mod secret {
	use core::fmt;

	/// Credential wrapper that never prints its contents.
	#[derive(Clone, PartialEq, Eq)]
	pub struct SecretString(String);

	impl SecretString {
		pub fn new(s: impl Into<String>) -> Self {
			Self(s.into())
		}

		pub fn expose(&self) -> &str {
			&self.0
		}
	}

	impl fmt::Debug for SecretString {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			f.write_str("SecretString(<redacted>)")
		}
	}

	impl fmt::Display for SecretString {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			f.write_str("<redacted>")
		}
	}

	#[cfg(test)]
	mod tests {
		use super::SecretString;

		#[test]
		fn formatting_redacts() {
			let s = SecretString::new("hunter2");
			assert_eq!(s.to_string(), "<redacted>");
			assert!(!format!("{s:?}").contains("hunter2"));
			assert_eq!(s.expose(), "hunter2");
		}
	}
}

pub use endpoint::{EndpointError, WsEndpoint};
pub use secret::SecretString;
