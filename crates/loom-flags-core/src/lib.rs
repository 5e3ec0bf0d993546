// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom feature flags client SDK.
//!
//! This crate holds the data model shared by the SDK (`loom-flags`) and its
//! tests. It does no I/O.
//!
//! # Overview
//!
//! - [`EvaluationContext`] with a hash that is stable across process runs
//! - [`CacheData`] snapshots of resolved flags and [`CacheResolveResult`]
//! - [`ApplyLedger`], the `CREATED -> SENDING -> SENT` exposure state machine
//! - [`ClientSecret`], redacted in logs
//!
//! # Example
//!
//! ```
//! use loom_flags_core::{ApplyLedger, EvaluationContext, EventStatus};
//!
//! let ctx = EvaluationContext::new()
//!     .with_targeting_key("user123")
//!     .with_attribute("plan", serde_json::json!("enterprise"));
//! assert_eq!(ctx.hash(), ctx.clone().hash());
//!
//! let mut ledger = ApplyLedger::new();
//! ledger.record("token", "checkout.new_flow", chrono::Utc::now());
//! let chunks = ledger.take_pending_chunks(20);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(ledger.count_with_status(EventStatus::Sending), 1);
//! ```

pub mod apply;
pub mod context;
pub mod secret;
pub mod snapshot;

pub use apply::{
	AppliedFlag, ApplyInstance, ApplyLedger, EventStatus, PendingChunk, DEFAULT_APPLY_CHUNK_SIZE,
};
pub use context::{EvaluationContext, TARGETING_KEY_ATTRIBUTE};
pub use secret::{ClientSecret, REDACTED};
pub use snapshot::{
	CacheData, CacheEntry, CacheResolveResult, ResolveReason, ResolvedFlag, ResolvedFlags,
};

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	// Property-based tests for context hash determinism
	proptest! {
		#[test]
		fn context_hash_is_deterministic(
			targeting_key in "[a-zA-Z0-9]{1,20}",
			plan in "[a-z]{1,10}",
			age in 0i64..120,
		) {
			let ctx = EvaluationContext::new()
				.with_targeting_key(&targeting_key)
				.with_attribute("plan", serde_json::json!(plan))
				.with_attribute("age", serde_json::json!(age));

			prop_assert_eq!(ctx.hash(), ctx.clone().hash());
		}

		#[test]
		fn different_targeting_keys_yield_different_hashes(
			key1 in "[a-zA-Z0-9]{1,20}",
			key2 in "[a-zA-Z0-9]{1,20}",
		) {
			if key1 != key2 {
				let ctx1 = EvaluationContext::new().with_targeting_key(&key1);
				let ctx2 = EvaluationContext::new().with_targeting_key(&key2);
				prop_assert_ne!(ctx1.hash(), ctx2.hash());
			}
		}

		#[test]
		fn context_digest_is_64_hex_chars(key in "[a-zA-Z0-9]{0,20}") {
			let digest = EvaluationContext::new().with_targeting_key(&key).digest();
			prop_assert_eq!(digest.len(), 64);
			prop_assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
		}
	}

	// Property-based tests for the persisted ledger form
	proptest! {
		#[test]
		fn persisted_view_never_contains_fully_sent_tokens(
			flags in prop::collection::vec("[a-z]{1,8}", 1..10),
			deliver in proptest::bool::ANY,
		) {
			let mut ledger = ApplyLedger::new();
			for flag in &flags {
				ledger.record("tok", flag, chrono::Utc::now());
			}
			for chunk in ledger.take_pending_chunks(DEFAULT_APPLY_CHUNK_SIZE) {
				ledger.complete(&chunk.resolve_token, &chunk.flag_names(), deliver);
			}

			let view = ledger.persisted_view();
			prop_assert_eq!(view.contains_token("tok"), !deliver);
		}
	}
}
