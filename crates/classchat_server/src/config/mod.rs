#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use classchat_protocol::DEFAULT_MAX_FRAME_SIZE;
use classchat_util::SecretString;
use serde::Deserialize;
use tracing::{info, warn};

use crate::server::hub::HubConfig;
use crate::server::subscription::ConnectionSettings;
use crate::service::{DEFAULT_OP_TIMEOUT, LogMailer, Mailer, SmtpMailer};

/// Default config path: `~/.classchat/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".classchat").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
	cfg.normalize();

	Ok(cfg)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub storage: StorageSettings,
	pub connection: ConnectionConfig,
	pub mail: MailSettings,
}

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// Optional Prometheus exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// Optional TCP bind for the newline-delimited profile event feed.
	pub profile_feed_bind: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
	/// sqlx SQLite URL.
	pub database_url: String,
	pub op_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
	pub max_message_size: usize,
	pub ping_period: Duration,
	pub pong_wait: Duration,
	pub write_wait: Duration,
	pub outbound_queue_capacity: usize,
	pub hub_debug_logs: bool,
}

#[derive(Debug, Clone)]
pub struct MailSettings {
	/// Without a host, emails are only logged.
	pub smtp_host: Option<String>,
	pub smtp_port: u16,
	pub smtp_user: Option<String>,
	pub smtp_password: Option<SecretString>,
	pub from: String,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self::from_file(FileConfig::default())
	}
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ConnectionSettings::default();

		Self {
			server: ServerSettings {
				metrics_bind: non_blank(file.server.metrics_bind),
				health_bind: non_blank(file.server.health_bind),
				profile_feed_bind: non_blank(file.server.profile_feed_bind),
			},
			storage: StorageSettings {
				database_url: non_blank(file.storage.database_url).unwrap_or_else(|| "sqlite::memory:".to_string()),
				op_timeout: file
					.storage
					.op_timeout_ms
					.map(Duration::from_millis)
					.unwrap_or(DEFAULT_OP_TIMEOUT),
			},
			connection: ConnectionConfig {
				max_message_size: file.connection.max_message_size.unwrap_or(defaults.max_message_size),
				ping_period: file
					.connection
					.ping_period_secs
					.map(Duration::from_secs)
					.unwrap_or(defaults.ping_period),
				pong_wait: file
					.connection
					.pong_wait_secs
					.map(Duration::from_secs)
					.unwrap_or(defaults.pong_wait),
				write_wait: file
					.connection
					.write_wait_secs
					.map(Duration::from_secs)
					.unwrap_or(defaults.write_wait),
				outbound_queue_capacity: file
					.connection
					.outbound_queue_capacity
					.unwrap_or(HubConfig::default().subscriber_queue_capacity),
				hub_debug_logs: file.connection.hub_debug_logs.unwrap_or(false),
			},
			mail: MailSettings {
				smtp_host: non_blank(file.mail.smtp_host),
				smtp_port: file.mail.smtp_port.unwrap_or(25),
				smtp_user: non_blank(file.mail.smtp_user),
				smtp_password: non_blank(file.mail.smtp_password).map(SecretString::new),
				from: non_blank(file.mail.from).unwrap_or_else(|| "classchat <no-reply@classchat.local>".to_string()),
			},
		}
	}

	pub fn connection_settings(&self) -> ConnectionSettings {
		ConnectionSettings {
			max_message_size: self.connection.max_message_size,
			max_frame_size: DEFAULT_MAX_FRAME_SIZE.max(self.connection.max_message_size),
			ping_period: self.connection.ping_period,
			pong_wait: self.connection.pong_wait,
			write_wait: self.connection.write_wait,
		}
	}

	pub fn hub_config(&self) -> HubConfig {
		HubConfig {
			subscriber_queue_capacity: self.connection.outbound_queue_capacity,
			debug_logs: self.connection.hub_debug_logs,
			..HubConfig::default()
		}
	}

	fn normalize(&mut self) {
		if self.connection.outbound_queue_capacity == 0 {
			warn!("connection config: outbound_queue_capacity is 0; using 1");
			self.connection.outbound_queue_capacity = 1;
		}
		if self.connection.ping_period.is_zero() {
			let fallback = ConnectionSettings::default().ping_period;
			warn!(
				ping_period_secs = fallback.as_secs(),
				"connection config: ping_period is 0; using default"
			);
			self.connection.ping_period = fallback;
		}
		if self.connection.ping_period >= self.connection.pong_wait {
			warn!(
				ping_period_secs = self.connection.ping_period.as_secs(),
				pong_wait_secs = self.connection.pong_wait.as_secs(),
				"connection config: ping_period >= pong_wait; idle clients may time out before being pinged"
			);
		}
		if self.storage.op_timeout.is_zero() {
			warn!("storage config: op_timeout_ms is 0; using default");
			self.storage.op_timeout = DEFAULT_OP_TIMEOUT;
		}
		if self.mail.smtp_user.is_some() != self.mail.smtp_password.is_some() {
			warn!("mail config: smtp_user and smtp_password must both be set; sending without credentials");
		}
	}
}

impl MailSettings {
	/// SMTP when a host is configured, otherwise a mailer that only logs.
	pub fn build_mailer(&self) -> anyhow::Result<Arc<dyn Mailer>> {
		let Some(host) = self.smtp_host.as_deref() else {
			info!("no smtp host configured; rejection emails will only be logged");
			return Ok(Arc::new(LogMailer));
		};

		let mailer = SmtpMailer::new(
			host,
			self.smtp_port,
			self.smtp_user.as_deref(),
			self.smtp_password.as_ref(),
			&self.from,
		)?;
		info!(host, port = self.smtp_port, "smtp mailer configured");
		Ok(Arc::new(mailer))
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	storage: FileStorageSettings,

	#[serde(default)]
	connection: FileConnectionSettings,

	#[serde(default)]
	mail: FileMailSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	profile_feed_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileStorageSettings {
	database_url: Option<String>,
	op_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConnectionSettings {
	max_message_size: Option<usize>,
	ping_period_secs: Option<u64>,
	pong_wait_secs: Option<u64>,
	write_wait_secs: Option<u64>,
	outbound_queue_capacity: Option<usize>,
	hub_debug_logs: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileMailSettings {
	smtp_host: Option<String>,
	smtp_port: Option<u16>,
	smtp_user: Option<String>,
	smtp_password: Option<String>,
	from: Option<String>,
}

fn non_blank(v: Option<String>) -> Option<String> {
	v.filter(|s| !s.trim().is_empty())
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) {
	let text = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = text("CLASSCHAT_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_PROFILE_FEED_BIND") {
		cfg.server.profile_feed_bind = Some(v);
		info!("server config: profile_feed_bind overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_DATABASE_URL") {
		cfg.storage.database_url = v;
		info!("storage: database_url overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_STORE_TIMEOUT_MS")
		&& let Ok(ms) = v.parse::<u64>()
	{
		cfg.storage.op_timeout = Duration::from_millis(ms);
		info!(ms, "storage: op_timeout overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_MAX_MESSAGE_SIZE")
		&& let Ok(bytes) = v.parse::<usize>()
	{
		cfg.connection.max_message_size = bytes;
		info!(bytes, "connection config: max_message_size overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_PING_PERIOD_SECS")
		&& let Ok(secs) = v.parse::<u64>()
	{
		cfg.connection.ping_period = Duration::from_secs(secs);
		info!(secs, "connection config: ping_period overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_PONG_WAIT_SECS")
		&& let Ok(secs) = v.parse::<u64>()
	{
		cfg.connection.pong_wait = Duration::from_secs(secs);
		info!(secs, "connection config: pong_wait overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_WRITE_WAIT_SECS")
		&& let Ok(secs) = v.parse::<u64>()
	{
		cfg.connection.write_wait = Duration::from_secs(secs);
		info!(secs, "connection config: write_wait overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_OUTBOUND_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.parse::<usize>()
	{
		cfg.connection.outbound_queue_capacity = capacity;
		info!(capacity, "connection config: outbound_queue_capacity overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_HUB_DEBUG_LOGS")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.connection.hub_debug_logs = enabled;
		info!(enabled, "connection config: hub_debug_logs overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_SMTP_HOST") {
		cfg.mail.smtp_host = Some(v);
		info!("mail config: smtp_host overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_SMTP_PORT")
		&& let Ok(port) = v.parse::<u16>()
	{
		cfg.mail.smtp_port = port;
		info!(port, "mail config: smtp_port overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_SMTP_USER") {
		cfg.mail.smtp_user = Some(v);
		info!("mail config: smtp_user overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_SMTP_PASSWORD") {
		cfg.mail.smtp_password = Some(SecretString::new(v));
		info!("mail config: smtp_password overridden by env");
	}

	if let Some(v) = text("CLASSCHAT_MAIL_FROM") {
		cfg.mail.from = v;
		info!("mail config: from overridden by env");
	}
}
