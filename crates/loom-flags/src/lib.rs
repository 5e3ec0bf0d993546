// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature Flags Rust SDK for Loom.
//!
//! Resolves flags against the remote resolver, caches the result in memory
//! and on disk for offline use, and reports flag exposures through a durable
//! pipeline that survives restarts without losing or duplicating reports.
//!
//! # Features
//!
//! - **Offline Cache**: The last resolved snapshot is persisted and reloaded on start
//! - **Context Staleness**: Lookups for a different evaluation context return `Stale`
//! - **Durable Exposures**: Every exposure is written to disk before it is sent
//! - **Batched Delivery**: Exposures are sent in chunks of at most 20 flags
//! - **Non-blocking Apply**: Recording an exposure never waits and never fails
//!
//! # Example
//!
//! ```ignore
//! use loom_flags::{EvaluationContext, FlagsClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FlagsClient::builder()
//!         .client_secret("cs_xxx")
//!         .storage_dir("/var/lib/myapp/flags")
//!         .build()
//!         .await?;
//!
//!     let context = EvaluationContext::new()
//!         .with_targeting_key("user123")
//!         .with_attribute("plan", serde_json::json!("enterprise"));
//!
//!     client.fetch_and_activate(&context, &[]).await?;
//!
//!     let enabled = client.get_bool("new_flow.enabled", &context, false);
//!     let theme = client.get_string("ui.theme", &context, "light");
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

mod applier;
mod cache;
mod client;
mod config;
mod error;
mod http;
mod processor;
mod remote;
mod storage;

pub use applier::FlagApplier;
pub use cache::FlagCache;
pub use client::{EvaluationError, EvaluationReason, FlagEvaluation, FlagsClient, FlagsClientBuilder};
pub use config::{
	default_storage_dir, FlagsConfig, FlagsConfigLayer, DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT,
	DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use error::{FlagsError, Result};
pub use http::HttpFlagsClient;
pub use processor::{
	ApplyRequest, BatchOutcome, BatchResult, EventProcessor, ProcessorCommand, ProcessorConfig,
	ProcessorStats,
};
pub use remote::{ApplyClient, ResolveClient, ResolveResponse, SharedApplyClient, SharedResolveClient};
pub use storage::{FileStorage, Storage, APPLY_LEDGER_FILE, FLAGS_CACHE_FILE};

// Re-export core types for convenience
pub use loom_common_http::RetryConfig;
pub use loom_flags_core::{
	AppliedFlag, ApplyInstance, ApplyLedger, CacheData, CacheEntry, CacheResolveResult,
	ClientSecret, EvaluationContext, EventStatus, PendingChunk, ResolveReason, ResolvedFlag,
	ResolvedFlags, DEFAULT_APPLY_CHUNK_SIZE,
};
