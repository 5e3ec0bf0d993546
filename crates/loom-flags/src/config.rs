// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SDK configuration.
//!
//! Configuration is assembled from layers, lowest precedence first:
//! built-in defaults, an optional TOML file, `LOOM_FLAGS_*` environment
//! variables, then whatever the [`crate::FlagsClientBuilder`] sets explicitly.
//!
//! ```toml
//! base_url = "https://flags.example.com"
//! storage_dir = "/var/lib/myapp/flags"
//! request_timeout_ms = 10000
//! apply_chunk_size = 20
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use loom_common_http::RetryConfig;
use loom_flags_core::{ClientSecret, DEFAULT_APPLY_CHUNK_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::{FlagsError, Result};

pub const DEFAULT_BASE_URL: &str = "https://resolver.loom.dev";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const ENV_PREFIX: &str = "LOOM_FLAGS_";

/// Partial configuration; unset fields fall through to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagsConfigLayer {
	#[serde(default, skip_serializing)]
	pub client_secret: Option<ClientSecret>,
	pub base_url: Option<String>,
	pub storage_dir: Option<PathBuf>,
	pub request_timeout_ms: Option<u64>,
	pub apply_chunk_size: Option<usize>,
	pub shutdown_timeout_ms: Option<u64>,
	pub retry_max_attempts: Option<u32>,
}

impl FlagsConfigLayer {
	/// Reads a layer from a TOML file.
	pub fn from_toml_file(path: &Path) -> Result<Self> {
		let contents =
			std::fs::read_to_string(path).map_err(|e| FlagsError::storage(path, e))?;
		toml::from_str(&contents)
			.map_err(|e| FlagsError::Config(format!("{}: {e}", path.display())))
	}

	/// Reads a layer from `LOOM_FLAGS_*` environment variables.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Reads a layer through an arbitrary variable lookup.
	pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let var = |suffix: &str| {
			get(&format!("{ENV_PREFIX}{suffix}"))
				.map(|v| v.trim().to_string())
				.filter(|v| !v.is_empty())
		};

		Ok(Self {
			client_secret: var("CLIENT_SECRET").map(ClientSecret::new),
			base_url: var("BASE_URL"),
			storage_dir: var("STORAGE_DIR").map(PathBuf::from),
			request_timeout_ms: parse_var("REQUEST_TIMEOUT_MS", var("REQUEST_TIMEOUT_MS"))?,
			apply_chunk_size: parse_var("APPLY_CHUNK_SIZE", var("APPLY_CHUNK_SIZE"))?,
			shutdown_timeout_ms: parse_var("SHUTDOWN_TIMEOUT_MS", var("SHUTDOWN_TIMEOUT_MS"))?,
			retry_max_attempts: parse_var("RETRY_MAX_ATTEMPTS", var("RETRY_MAX_ATTEMPTS"))?,
		})
	}

	/// Overlays `other` on top of `self`; fields set in `other` win.
	pub fn merge(self, other: FlagsConfigLayer) -> FlagsConfigLayer {
		FlagsConfigLayer {
			client_secret: other.client_secret.or(self.client_secret),
			base_url: other.base_url.or(self.base_url),
			storage_dir: other.storage_dir.or(self.storage_dir),
			request_timeout_ms: other.request_timeout_ms.or(self.request_timeout_ms),
			apply_chunk_size: other.apply_chunk_size.or(self.apply_chunk_size),
			shutdown_timeout_ms: other.shutdown_timeout_ms.or(self.shutdown_timeout_ms),
			retry_max_attempts: other.retry_max_attempts.or(self.retry_max_attempts),
		}
	}

	/// Fills in defaults and validates.
	pub fn finalize(self) -> Result<FlagsConfig> {
		let mut retry = RetryConfig::default();
		if let Some(attempts) = self.retry_max_attempts {
			retry.max_attempts = attempts;
		}

		let config = FlagsConfig {
			client_secret: self.client_secret,
			base_url: self
				.base_url
				.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
			storage_dir: self.storage_dir.unwrap_or_else(default_storage_dir),
			request_timeout: self
				.request_timeout_ms
				.map(Duration::from_millis)
				.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
			apply_chunk_size: self.apply_chunk_size.unwrap_or(DEFAULT_APPLY_CHUNK_SIZE),
			shutdown_timeout: self
				.shutdown_timeout_ms
				.map(Duration::from_millis)
				.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
			retry,
		};

		config.validate()?;
		Ok(config)
	}
}

fn parse_var<T: std::str::FromStr>(name: &str, value: Option<String>) -> Result<Option<T>>
where
	T::Err: std::fmt::Display,
{
	value
		.map(|v| {
			v.parse::<T>()
				.map_err(|e| FlagsError::Config(format!("{ENV_PREFIX}{name}={v}: {e}")))
		})
		.transpose()
}

/// Resolved SDK configuration.
#[derive(Debug, Clone)]
pub struct FlagsConfig {
	pub client_secret: Option<ClientSecret>,
	pub base_url: String,
	/// Directory holding `flags_cache.json` and `apply_ledger.json`.
	pub storage_dir: PathBuf,
	pub request_timeout: Duration,
	/// Maximum flags per apply request.
	pub apply_chunk_size: usize,
	/// How long shutdown waits for in-flight apply requests.
	pub shutdown_timeout: Duration,
	/// Retry policy for resolve requests.
	pub retry: RetryConfig,
}

impl Default for FlagsConfig {
	fn default() -> Self {
		Self {
			client_secret: None,
			base_url: DEFAULT_BASE_URL.to_string(),
			storage_dir: default_storage_dir(),
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			apply_chunk_size: DEFAULT_APPLY_CHUNK_SIZE,
			shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
			retry: RetryConfig::default(),
		}
	}
}

impl FlagsConfig {
	/// Loads defaults, then the optional file, then the environment.
	pub fn load(file: Option<&Path>) -> Result<Self> {
		let mut layer = FlagsConfigLayer::default();
		if let Some(path) = file {
			layer = layer.merge(FlagsConfigLayer::from_toml_file(path)?);
		}
		layer.merge(FlagsConfigLayer::from_env()?).finalize()
	}

	pub fn validate(&self) -> Result<()> {
		if self.apply_chunk_size == 0 {
			return Err(FlagsError::Config(
				"apply_chunk_size must be greater than zero".to_string(),
			));
		}
		if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
			return Err(FlagsError::InvalidBaseUrl(self.base_url.clone()));
		}
		Ok(())
	}
}

/// `$XDG_CACHE_HOME/loom/flags`, or a temp directory when no cache dir exists.
pub fn default_storage_dir() -> PathBuf {
	dirs::cache_dir()
		.unwrap_or_else(std::env::temp_dir)
		.join("loom")
		.join("flags")
}
