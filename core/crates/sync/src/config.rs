//! Engine configuration

use std::{
	fs, io,
	path::{Path, PathBuf},
	time::Duration,
};

use fm_model::WireFormat;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

pub const CONFIG_FILE_NAME: &str = "fieldmed.json";

const CURRENT_VERSION: u32 = 2;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
	#[error("config I/O error: {source}; path: '{}'", .path.display())]
	Io {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},
	#[error("malformed config file: {0}")]
	Json(#[from] serde_json::Error),
	#[error("failed to initialise logging: {0}")]
	Logging(String),
}

impl ConfigError {
	fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
		Self::Io {
			path: path.as_ref().into(),
			source,
		}
	}
}

/// Exponential backoff applied to deliveries the transport reported as failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Delay before the first retry
	pub base_delay_ms: u64,

	/// Upper bound for the delay between retries
	pub max_delay_ms: u64,

	/// Consecutive failures after which scheduled retries stop (explicit retries still work)
	pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			base_delay_ms: 1_000,
			max_delay_ms: 5 * 60 * 1_000,
			max_attempts: None,
		}
	}
}

impl RetryPolicy {
	/// Delay to wait after the `failures`-th consecutive failure.
	#[must_use]
	pub fn delay_for(&self, failures: u32) -> Duration {
		let factor = 1_u64
			.checked_shl(failures.saturating_sub(1))
			.unwrap_or(u64::MAX);

		Duration::from_millis(
			self.base_delay_ms
				.saturating_mul(factor)
				.min(self.max_delay_ms),
		)
	}

	#[must_use]
	pub fn allows(&self, failures: u32) -> bool {
		self.max_attempts.map_or(true, |max| failures < max)
	}
}

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path
	pub data_dir: PathBuf,

	/// Stamped as `authorFingerprint` on everything authored on this device
	pub device_fingerprint: String,

	/// Logging filter, `tracing_subscriber::EnvFilter` syntax
	pub log_level: String,

	/// Staged writes after which the next mutation flushes before applying
	#[serde(default = "default_write_buffer_capacity")]
	pub write_buffer_capacity: usize,

	/// Write coalescing window, also the dispatcher tick
	#[serde(default = "default_flush_interval_ms")]
	pub flush_interval_ms: u64,

	/// Deliveries without an ack for this long are failed
	#[serde(default = "default_ack_timeout_secs")]
	pub ack_timeout_secs: u64,

	#[serde(default)]
	pub retry: RetryPolicy,

	/// Inbound payloads merged concurrently
	#[serde(default = "default_ingest_concurrency")]
	pub ingest_concurrency: usize,

	/// Capacity of the engine event bus
	#[serde(default = "default_event_capacity")]
	pub event_capacity: usize,

	#[serde(default)]
	pub wire_format: WireFormat,
}

const fn default_write_buffer_capacity() -> usize {
	64
}

const fn default_flush_interval_ms() -> u64 {
	500
}

const fn default_ack_timeout_secs() -> u64 {
	30
}

const fn default_ingest_concurrency() -> usize {
	8
}

const fn default_event_capacity() -> usize {
	1_024
}

impl EngineConfig {
	/// Load configuration from a data directory, creating a default one when absent.
	pub fn load_from(data_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let data_dir = data_dir.as_ref();
		let config_path = data_dir.join(CONFIG_FILE_NAME);

		if !config_path.exists() {
			warn!(path = %config_path.display(), "No config found, creating default");
			let config = Self::default_with_dir(data_dir);
			config.save()?;
			return Ok(config);
		}

		info!(path = %config_path.display(), "Loading config");
		let json = fs::read_to_string(&config_path)
			.map_err(|e| ConfigError::io(&config_path, e))?;
		let mut config: Self = serde_json::from_str(&json)?;
		config.data_dir = data_dir.to_path_buf();

		if config.version < CURRENT_VERSION {
			info!(
				from = config.version,
				to = CURRENT_VERSION,
				"Migrating config"
			);
			config.version = CURRENT_VERSION;
			config.save()?;
		}

		Ok(config)
	}

	/// Default configuration rooted at `data_dir`, with a freshly generated fingerprint.
	#[must_use]
	pub fn default_with_dir(data_dir: impl Into<PathBuf>) -> Self {
		Self {
			version: CURRENT_VERSION,
			data_dir: data_dir.into(),
			device_fingerprint: Uuid::new_v4().simple().to_string(),
			log_level: "info".to_string(),
			write_buffer_capacity: default_write_buffer_capacity(),
			flush_interval_ms: default_flush_interval_ms(),
			ack_timeout_secs: default_ack_timeout_secs(),
			retry: RetryPolicy::default(),
			ingest_concurrency: default_ingest_concurrency(),
			event_capacity: default_event_capacity(),
			wire_format: WireFormat::default(),
		}
	}

	pub fn save(&self) -> Result<(), ConfigError> {
		fs::create_dir_all(&self.data_dir).map_err(|e| ConfigError::io(&self.data_dir, e))?;

		let config_path = self.data_dir.join(CONFIG_FILE_NAME);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json).map_err(|e| ConfigError::io(&config_path, e))?;
		info!(path = %config_path.display(), "Saved config");

		Ok(())
	}

	/// Directory holding the persisted record, update and outbox blobs.
	#[must_use]
	pub fn store_dir(&self) -> PathBuf {
		self.data_dir.join("store")
	}

	#[must_use]
	pub const fn flush_interval(&self) -> Duration {
		Duration::from_millis(self.flush_interval_ms)
	}

	#[must_use]
	pub const fn ack_timeout(&self) -> Duration {
		Duration::from_secs(self.ack_timeout_secs)
	}

	/// Installs a global `tracing` subscriber filtered by `log_level`.
	pub fn init_logging(&self) -> Result<(), ConfigError> {
		let filter =
			EnvFilter::try_new(&self.log_level).map_err(|e| ConfigError::Logging(e.to_string()))?;

		tracing_subscriber::fmt()
			.with_env_filter(filter)
			.try_init()
			.map_err(|e| ConfigError::Logging(e.to_string()))
	}
}
