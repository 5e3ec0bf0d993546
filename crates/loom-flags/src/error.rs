// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the flags SDK.

use std::path::PathBuf;

use loom_common_http::{is_retryable_status, RetryableError};
use thiserror::Error;

/// Result type alias for flags operations.
pub type Result<T> = std::result::Result<T, FlagsError>;

/// Errors that can occur in the flags SDK.
///
/// Network, storage and parse failures are separate variants because they
/// are handled differently: network failures are retried, storage failures
/// point at a local problem that will not fix itself, and parse failures on
/// persisted files reset that file to empty.
#[derive(Debug, Error)]
pub enum FlagsError {
	/// Client secret is missing or blank.
	#[error("client secret is required")]
	MissingClientSecret,

	/// Base URL is missing or invalid.
	#[error("invalid base URL: {0}")]
	InvalidBaseUrl(String),

	/// Configuration could not be loaded or failed validation.
	#[error("invalid configuration: {0}")]
	Config(String),

	/// HTTP request failed.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	/// Server returned an error response.
	#[error("server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	/// Rate limited by the server.
	#[error("rate limited, retry after {retry_after_secs:?} seconds")]
	RateLimited { retry_after_secs: Option<u64> },

	/// Persisted or wire data could not be decoded.
	#[error("parse error: {0}")]
	Parse(String),

	/// Reading or writing local storage failed.
	#[error("storage error at {}: {source}", path.display())]
	Storage {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// Client has been shut down.
	#[error("client has been shut down")]
	ClientShutdown,
}

impl FlagsError {
	pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		Self::Storage {
			path: path.into(),
			source,
		}
	}

	/// True for failures talking to the remote service.
	pub fn is_network(&self) -> bool {
		matches!(
			self,
			Self::RequestFailed(_) | Self::ServerError { .. } | Self::RateLimited { .. }
		)
	}

	/// True for local disk failures.
	pub fn is_storage(&self) -> bool {
		matches!(self, Self::Storage { .. })
	}

	pub fn is_parse(&self) -> bool {
		matches!(self, Self::Parse(_))
	}
}

impl From<serde_json::Error> for FlagsError {
	fn from(e: serde_json::Error) -> Self {
		Self::Parse(e.to_string())
	}
}

impl RetryableError for FlagsError {
	fn is_retryable(&self) -> bool {
		match self {
			FlagsError::RequestFailed(e) => e.is_retryable(),
			FlagsError::ServerError { status, .. } => is_retryable_status(*status),
			FlagsError::RateLimited { .. } => true,
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_server_error_retryable_statuses() {
		for status in [429, 408, 500, 502, 503, 504] {
			let err = FlagsError::ServerError {
				status,
				message: "test".to_string(),
			};
			assert!(err.is_retryable(), "status {status} should be retryable");
		}
	}

	#[test]
	fn test_server_error_non_retryable_statuses() {
		for status in [400, 401, 403, 404, 422] {
			let err = FlagsError::ServerError {
				status,
				message: "test".to_string(),
			};
			assert!(
				!err.is_retryable(),
				"status {status} should not be retryable"
			);
		}
	}

	#[test]
	fn test_storage_is_not_network() {
		let err = FlagsError::storage(
			"/tmp/flags_cache.json",
			std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
		);
		assert!(err.is_storage());
		assert!(!err.is_network());
		assert!(!err.is_retryable());
		assert!(err.to_string().contains("flags_cache.json"));
	}

	#[test]
	fn test_rate_limited_is_network_and_retryable() {
		let err = FlagsError::RateLimited {
			retry_after_secs: Some(30),
		};
		assert!(err.is_network());
		assert!(err.is_retryable());
	}

	#[test]
	fn test_json_error_maps_to_parse() {
		let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
		let err: FlagsError = json_err.into();
		assert!(err.is_parse());
		assert!(!err.is_storage());
	}
}
