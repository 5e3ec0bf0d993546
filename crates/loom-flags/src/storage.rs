// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable storage for the flag snapshot and the apply ledger.
//!
//! The two live in separate files so the resolve path and the exposure
//! pipeline never contend on one resource. Every write replaces the whole
//! file (written to a temp file, then renamed into place).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use loom_flags_core::{ApplyLedger, CacheData};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{FlagsError, Result};

pub const FLAGS_CACHE_FILE: &str = "flags_cache.json";
pub const APPLY_LEDGER_FILE: &str = "apply_ledger.json";

#[async_trait]
pub trait Storage: Send + Sync {
	/// Replaces the persisted snapshot.
	async fn store(&self, snapshot: &CacheData) -> Result<()>;

	/// Returns `None` when nothing has been stored (missing or empty file).
	/// Undecodable content is a [`FlagsError::Parse`].
	async fn read(&self) -> Result<Option<CacheData>>;

	/// Removes the persisted snapshot. Missing files are fine.
	async fn clear(&self) -> Result<()>;

	/// Replaces the persisted apply ledger.
	async fn write_apply_data(&self, ledger: &ApplyLedger) -> Result<()>;

	/// Returns an empty ledger when nothing has been stored.
	/// Undecodable content is a [`FlagsError::Parse`].
	async fn read_apply_data(&self) -> Result<ApplyLedger>;
}

/// JSON files under one directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
	dir: PathBuf,
}

impl FileStorage {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	/// Creates the directory if needed.
	pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
		let storage = Self::new(dir);
		tokio::fs::create_dir_all(&storage.dir)
			.await
			.map_err(|e| FlagsError::storage(&storage.dir, e))?;

		info!(dir = %storage.dir.display(), "opened flags storage");
		Ok(storage)
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub fn flags_path(&self) -> PathBuf {
		self.dir.join(FLAGS_CACHE_FILE)
	}

	pub fn ledger_path(&self) -> PathBuf {
		self.dir.join(APPLY_LEDGER_FILE)
	}

	async fn write_json<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<()> {
		tokio::fs::create_dir_all(&self.dir)
			.await
			.map_err(|e| FlagsError::storage(&self.dir, e))?;

		let json = serde_json::to_string_pretty(value)?;
		let tmp_path = path.with_extension("json.tmp");

		tokio::fs::write(&tmp_path, &json)
			.await
			.map_err(|e| FlagsError::storage(&tmp_path, e))?;
		tokio::fs::rename(&tmp_path, path)
			.await
			.map_err(|e| FlagsError::storage(path, e))?;

		debug!(path = %path.display(), bytes = json.len(), "wrote file");
		Ok(())
	}

	async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
		let contents = match tokio::fs::read_to_string(path).await {
			Ok(contents) => contents,
			Err(e) if e.kind() == ErrorKind::NotFound => {
				debug!(path = %path.display(), "file not found");
				return Ok(None);
			}
			Err(e) => return Err(FlagsError::storage(path, e)),
		};

		if contents.trim().is_empty() {
			return Ok(None);
		}

		serde_json::from_str(&contents)
			.map(Some)
			.map_err(|e| FlagsError::Parse(format!("{}: {e}", path.display())))
	}
}

#[async_trait]
impl Storage for FileStorage {
	async fn store(&self, snapshot: &CacheData) -> Result<()> {
		self.write_json(&self.flags_path(), snapshot).await
	}

	async fn read(&self) -> Result<Option<CacheData>> {
		self.read_json(&self.flags_path()).await
	}

	async fn clear(&self) -> Result<()> {
		let path = self.flags_path();
		match tokio::fs::remove_file(&path).await {
			Ok(()) => {
				info!(path = %path.display(), "cleared flags cache");
				Ok(())
			}
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(FlagsError::storage(path, e)),
		}
	}

	async fn write_apply_data(&self, ledger: &ApplyLedger) -> Result<()> {
		self.write_json(&self.ledger_path(), ledger).await
	}

	async fn read_apply_data(&self) -> Result<ApplyLedger> {
		Ok(self
			.read_json(&self.ledger_path())
			.await?
			.unwrap_or_default())
	}
}
