// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The [`FlagsClient`] facade: resolve, cache, evaluate and report exposures.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loom_flags_core::{
	CacheData, CacheResolveResult, ClientSecret, EvaluationContext, ResolveReason,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::applier::FlagApplier;
use crate::cache::FlagCache;
use crate::config::{FlagsConfig, FlagsConfigLayer};
use crate::error::{FlagsError, Result};
use crate::http::HttpFlagsClient;
use crate::processor::{ProcessorConfig, ProcessorStats};
use crate::remote::{ResolveResponse, SharedApplyClient, SharedResolveClient};
use crate::storage::{FileStorage, Storage};

/// Builder for constructing a [`FlagsClient`].
///
/// Settings made here take precedence over `LOOM_FLAGS_*` environment
/// variables, which take precedence over the optional config file.
#[derive(Default)]
pub struct FlagsClientBuilder {
	layer: FlagsConfigLayer,
	config_file: Option<PathBuf>,
	resolve_client: Option<SharedResolveClient>,
	apply_client: Option<SharedApplyClient>,
	storage: Option<Arc<dyn Storage>>,
}

impl FlagsClientBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
		self.layer.client_secret = Some(ClientSecret::new(secret));
		self
	}

	/// Example: `https://resolver.loom.dev`
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.layer.base_url = Some(url.into());
		self
	}

	/// Directory for `flags_cache.json` and `apply_ledger.json`.
	pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.layer.storage_dir = Some(dir.into());
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.layer.request_timeout_ms = Some(saturating_millis(timeout));
		self
	}

	pub fn apply_chunk_size(mut self, size: usize) -> Self {
		self.layer.apply_chunk_size = Some(size);
		self
	}

	pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
		self.layer.shutdown_timeout_ms = Some(saturating_millis(timeout));
		self
	}

	pub fn retry_max_attempts(mut self, attempts: u32) -> Self {
		self.layer.retry_max_attempts = Some(attempts);
		self
	}

	/// Reads a TOML config file as the lowest-precedence layer.
	pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
		self.config_file = Some(path.into());
		self
	}

	/// Replaces the HTTP resolver.
	pub fn resolve_client(mut self, client: SharedResolveClient) -> Self {
		self.resolve_client = Some(client);
		self
	}

	/// Replaces the HTTP apply client.
	pub fn apply_client(mut self, client: SharedApplyClient) -> Self {
		self.apply_client = Some(client);
		self
	}

	/// Replaces the file storage under `storage_dir`.
	pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
		self.storage = Some(storage);
		self
	}

	/// Builds the client.
	///
	/// Loads the persisted snapshot into memory (an unreadable snapshot is
	/// discarded) and starts the event processor, which re-sends any
	/// exposures a previous run did not deliver.
	pub async fn build(self) -> Result<FlagsClient> {
		let mut layer = FlagsConfigLayer::default();
		if let Some(path) = &self.config_file {
			layer = layer.merge(FlagsConfigLayer::from_toml_file(path)?);
		}
		let config = layer
			.merge(FlagsConfigLayer::from_env()?)
			.merge(self.layer)
			.finalize()?;

		let (resolver, apply_client) = match (self.resolve_client, self.apply_client) {
			(Some(resolver), Some(apply_client)) => (resolver, apply_client),
			(resolver, apply_client) => {
				let http = Arc::new(HttpFlagsClient::from_config(&config)?);
				(
					resolver.unwrap_or_else(|| http.clone() as SharedResolveClient),
					apply_client.unwrap_or(http as SharedApplyClient),
				)
			}
		};

		let storage: Arc<dyn Storage> = match self.storage {
			Some(storage) => storage,
			None => Arc::new(FileStorage::open(&config.storage_dir).await?),
		};

		let cache = FlagCache::new();
		match storage.read().await {
			Ok(Some(snapshot)) => {
				debug!(flags = snapshot.values.len(), "loaded persisted flag snapshot");
				cache.refresh(snapshot);
			}
			Ok(None) => {}
			Err(e) if e.is_parse() => {
				warn!(error = %e, "persisted flag snapshot is unreadable, starting empty");
			}
			Err(e) => {
				error!(kind = "storage", error = %e, "failed to load flag snapshot, starting empty");
			}
		}

		let applier = FlagApplier::new(
			Arc::clone(&storage),
			apply_client,
			ProcessorConfig {
				chunk_size: config.apply_chunk_size,
				shutdown_timeout: config.shutdown_timeout,
			},
		);

		info!(
			base_url = %config.base_url,
			storage_dir = %config.storage_dir.display(),
			"flags client initialized"
		);

		Ok(FlagsClient {
			inner: Arc::new(FlagsClientInner {
				config,
				cache,
				storage,
				resolver,
				applier,
				activation: Mutex::new(()),
				closed: AtomicBool::new(false),
			}),
		})
	}
}

fn saturating_millis(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

struct FlagsClientInner {
	config: FlagsConfig,
	cache: FlagCache,
	storage: Arc<dyn Storage>,
	resolver: SharedResolveClient,
	applier: FlagApplier,
	/// Held across disk write and memory refresh so both end up with the
	/// same snapshot.
	activation: Mutex<()>,
	closed: AtomicBool,
}

/// Feature flag client with an offline cache and durable exposure reporting.
///
/// # Example
///
/// ```ignore
/// use loom_flags::{EvaluationContext, FlagsClient};
///
/// let client = FlagsClient::builder()
///     .client_secret("cs_xxx")
///     .build()
///     .await?;
///
/// let ctx = EvaluationContext::new().with_targeting_key("user-123");
/// client.fetch_and_activate(&ctx, &[]).await?;
///
/// let color = client.evaluate("checkout.button.color", &ctx, "blue".to_string());
/// client.shutdown().await;
/// ```
#[derive(Clone)]
pub struct FlagsClient {
	inner: Arc<FlagsClientInner>,
}

impl FlagsClient {
	pub fn builder() -> FlagsClientBuilder {
		FlagsClientBuilder::new()
	}

	pub fn config(&self) -> &FlagsConfig {
		&self.inner.config
	}

	/// Resolves `flags` (all flags when empty) for `context`, persists the
	/// result and makes it the active snapshot.
	///
	/// On error the previous snapshot stays active.
	pub async fn fetch_and_activate(&self, context: &EvaluationContext, flags: &[String]) -> Result<()> {
		self.check_closed()?;

		let resolved = match self.inner.resolver.resolve(flags, context).await? {
			ResolveResponse::Resolved(resolved) => resolved,
			ResolveResponse::NotModified => {
				debug!("flags not modified, keeping current snapshot");
				return Ok(());
			}
		};

		let snapshot = CacheData::from_resolved(resolved, context.hash());
		let _activation = self.inner.activation.lock().await;
		// Memory is refreshed even if the disk write fails; the disk copy only
		// matters for the next start.
		if let Err(e) = self.inner.storage.store(&snapshot).await {
			error!(kind = "storage", error = %e, "failed to persist flag snapshot");
		}

		info!(
			resolve_token = %snapshot.resolve_token,
			flags = snapshot.values.len(),
			"activated flag snapshot"
		);
		self.inner.cache.refresh(snapshot);
		Ok(())
	}

	/// Evaluates `key` against the active snapshot.
	///
	/// `key` is a flag name optionally followed by a dot path into the flag's
	/// value, e.g. `checkout.button.color`. Never fails: problems are reported
	/// in [`FlagEvaluation::error`] alongside `default`.
	///
	/// An exposure is recorded whenever the flag is found for this context,
	/// even if the requested path or type does not match.
	pub fn evaluate<T: DeserializeOwned>(
		&self,
		key: &str,
		context: &EvaluationContext,
		default: T,
	) -> FlagEvaluation<T> {
		let (flag, path) = match key.split_once('.') {
			Some((flag, path)) => (flag, Some(path)),
			None => (key, None),
		};

		let (entry, resolve_token, reason) = match self.inner.cache.resolve(flag, context) {
			CacheResolveResult::Found {
				entry,
				resolve_token,
				reason,
			} => (entry, resolve_token, reason),
			CacheResolveResult::Stale => {
				debug!(flag = %flag, "flag snapshot is stale for this context");
				return FlagEvaluation::fallback(default, EvaluationReason::Stale, None);
			}
			CacheResolveResult::NotFound => {
				return FlagEvaluation::fallback(
					default,
					EvaluationReason::Error,
					Some(EvaluationError::FlagNotFound(flag.to_string())),
				);
			}
		};

		self.inner.applier.apply(flag, &resolve_token);

		let reason = EvaluationReason::Resolved(reason);
		let variant = Some(entry.variant);

		let mut value = &entry.value;
		if let Some(path) = path {
			for segment in path.split('.') {
				match value.get(segment) {
					Some(next) => value = next,
					None => {
						return FlagEvaluation {
							value: default,
							variant,
							reason: EvaluationReason::Error,
							error: Some(EvaluationError::PathNotFound {
								flag: flag.to_string(),
								path: path.to_string(),
							}),
						};
					}
				}
			}
		}

		// No value means the resolver chose not to serve one.
		if value.is_null() {
			return FlagEvaluation {
				value: default,
				variant,
				reason,
				error: None,
			};
		}

		match serde_json::from_value::<T>(value.clone()) {
			Ok(value) => FlagEvaluation {
				value,
				variant,
				reason,
				error: None,
			},
			Err(e) => FlagEvaluation {
				value: default,
				variant,
				reason: EvaluationReason::Error,
				error: Some(EvaluationError::TypeMismatch {
					key: key.to_string(),
					message: e.to_string(),
				}),
			},
		}
	}

	pub fn get_bool(&self, key: &str, context: &EvaluationContext, default: bool) -> bool {
		self.evaluate(key, context, default).value
	}

	pub fn get_string(&self, key: &str, context: &EvaluationContext, default: &str) -> String {
		self.evaluate(key, context, default.to_string()).value
	}

	pub fn get_json(&self, key: &str, context: &EvaluationContext, default: Value) -> Value {
		self.evaluate(key, context, default).value
	}

	/// The active snapshot, if any.
	pub fn snapshot(&self) -> Option<Arc<CacheData>> {
		self.inner.cache.snapshot()
	}

	/// Drops the active snapshot from memory and disk. Pending exposures are kept.
	pub async fn clear_cache(&self) -> Result<()> {
		let _activation = self.inner.activation.lock().await;
		self.inner.cache.clear();
		self.inner.storage.clear().await
	}

	/// Retries delivery of every exposure not yet accepted by the server.
	pub fn flush(&self) {
		self.inner.applier.flush();
	}

	pub fn stats(&self) -> Arc<ProcessorStats> {
		self.inner.applier.stats()
	}

	/// Stops the event processor after in-flight batches finish or the
	/// shutdown timeout passes. Further resolves fail with
	/// [`FlagsError::ClientShutdown`].
	pub async fn shutdown(&self) {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		self.inner.applier.shutdown().await;
		info!("flags client shutdown");
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	fn check_closed(&self) -> Result<()> {
		if self.is_closed() {
			return Err(FlagsError::ClientShutdown);
		}
		Ok(())
	}
}

impl std::fmt::Debug for FlagsClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FlagsClient")
			.field("base_url", &self.inner.config.base_url)
			.field("closed", &self.is_closed())
			.finish()
	}
}

/// Why an evaluation produced its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationReason {
	/// Served from the snapshot; carries the resolver's reason.
	Resolved(ResolveReason),
	/// The snapshot belongs to another context; the default was returned.
	Stale,
	/// The default was returned because of [`FlagEvaluation::error`].
	Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
	#[error("flag not found: {0}")]
	FlagNotFound(String),

	#[error("path {path} not found in flag {flag}")]
	PathNotFound { flag: String, path: String },

	#[error("type mismatch for {key}: {message}")]
	TypeMismatch { key: String, message: String },
}

/// The result of [`FlagsClient::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct FlagEvaluation<T> {
	pub value: T,
	pub variant: Option<String>,
	pub reason: EvaluationReason,
	pub error: Option<EvaluationError>,
}

impl<T> FlagEvaluation<T> {
	fn fallback(default: T, reason: EvaluationReason, error: Option<EvaluationError>) -> Self {
		Self {
			value: default,
			variant: None,
			reason,
			error,
		}
	}

	pub fn is_default(&self) -> bool {
		!matches!(self.reason, EvaluationReason::Resolved(_)) || self.error.is_some()
	}
}
