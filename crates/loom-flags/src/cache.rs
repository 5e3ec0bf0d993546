// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory cache of the latest resolved snapshot.

use std::sync::{Arc, PoisonError, RwLock};

use loom_flags_core::{CacheData, CacheResolveResult, EvaluationContext};
use tracing::debug;

/// Holds the latest [`CacheData`] and answers point lookups against it.
///
/// Cloning shares the same underlying snapshot. Lookups clone the `Arc`, so a
/// concurrent [`FlagCache::refresh`] only ever waits on the pointer swap.
#[derive(Debug, Clone, Default)]
pub struct FlagCache {
	snapshot: Arc<RwLock<Option<Arc<CacheData>>>>,
}

impl FlagCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Replaces the held snapshot.
	pub fn refresh(&self, snapshot: CacheData) {
		debug!(
			resolve_token = %snapshot.resolve_token,
			context_hash = snapshot.evaluation_context_hash,
			flags = snapshot.values.len(),
			"refreshing flag cache"
		);
		let mut guard = self
			.snapshot
			.write()
			.unwrap_or_else(PoisonError::into_inner);
		*guard = Some(Arc::new(snapshot));
	}

	/// Looks `flag_name` up for `context`.
	///
	/// A snapshot resolved for another context is `Stale` whether or not it
	/// contains the flag.
	pub fn resolve(&self, flag_name: &str, context: &EvaluationContext) -> CacheResolveResult {
		self.resolve_for_hash(flag_name, context.hash())
	}

	/// Like [`FlagCache::resolve`], for a precomputed [`EvaluationContext::hash`].
	pub fn resolve_for_hash(&self, flag_name: &str, context_hash: u64) -> CacheResolveResult {
		let Some(snapshot) = self.snapshot() else {
			return CacheResolveResult::NotFound;
		};

		if snapshot.evaluation_context_hash != context_hash {
			return CacheResolveResult::Stale;
		}

		match snapshot.values.get(flag_name) {
			Some(entry) => CacheResolveResult::Found {
				entry: entry.clone(),
				resolve_token: snapshot.resolve_token.clone(),
				reason: entry.reason,
			},
			None => CacheResolveResult::NotFound,
		}
	}

	/// Drops the held snapshot.
	pub fn clear(&self) {
		let mut guard = self
			.snapshot
			.write()
			.unwrap_or_else(PoisonError::into_inner);
		*guard = None;
	}

	/// The snapshot currently held, if any.
	pub fn snapshot(&self) -> Option<Arc<CacheData>> {
		self
			.snapshot
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_flags_core::{CacheEntry, ResolveReason};
	use proptest::prelude::*;
	use serde_json::json;
	use std::collections::HashMap;

	fn entry(variant: &str) -> CacheEntry {
		CacheEntry {
			variant: variant.to_string(),
			value: json!({}),
			reason: ResolveReason::Match,
		}
	}

	fn snapshot_for(ctx: &EvaluationContext, flags: &[&str]) -> CacheData {
		let values: HashMap<String, CacheEntry> = flags
			.iter()
			.map(|f| (f.to_string(), entry("A")))
			.collect();
		CacheData::new("t1", ctx.hash(), values)
	}

	#[test]
	fn empty_cache_is_not_found() {
		let cache = FlagCache::new();
		let ctx = EvaluationContext::new();
		assert_eq!(cache.resolve("f1", &ctx), CacheResolveResult::NotFound);
	}

	#[test]
	fn found_carries_token_and_reason() {
		let cache = FlagCache::new();
		let ctx = EvaluationContext::new().with_targeting_key("u1");
		cache.refresh(snapshot_for(&ctx, &["f1"]));

		match cache.resolve("f1", &ctx) {
			CacheResolveResult::Found {
				entry,
				resolve_token,
				reason,
			} => {
				assert_eq!(entry.variant, "A");
				assert_eq!(resolve_token, "t1");
				assert_eq!(reason, ResolveReason::Match);
			}
			other => panic!("expected Found, got {other:?}"),
		}
	}

	#[test]
	fn other_context_is_stale_even_for_missing_flag() {
		let cache = FlagCache::new();
		let ctx = EvaluationContext::new().with_targeting_key("u1");
		let other = EvaluationContext::new().with_targeting_key("u2");
		cache.refresh(snapshot_for(&ctx, &["f1"]));

		assert_eq!(cache.resolve("f1", &other), CacheResolveResult::Stale);
		assert_eq!(cache.resolve("missing", &other), CacheResolveResult::Stale);
	}

	#[test]
	fn clear_drops_snapshot() {
		let cache = FlagCache::new();
		let ctx = EvaluationContext::new();
		cache.refresh(snapshot_for(&ctx, &["f1"]));
		cache.clear();

		assert!(cache.snapshot().is_none());
		assert_eq!(cache.resolve("f1", &ctx), CacheResolveResult::NotFound);
	}

	#[test]
	fn clones_share_snapshot() {
		let cache = FlagCache::new();
		let reader = cache.clone();
		let ctx = EvaluationContext::new();

		cache.refresh(snapshot_for(&ctx, &["f1"]));
		assert!(reader.resolve("f1", &ctx).is_found());
	}

	#[test]
	fn refresh_replaces_whole_snapshot() {
		let cache = FlagCache::new();
		let ctx = EvaluationContext::new();
		cache.refresh(snapshot_for(&ctx, &["old"]));
		cache.refresh(snapshot_for(&ctx, &["new"]));

		assert_eq!(cache.resolve("old", &ctx), CacheResolveResult::NotFound);
		assert!(cache.resolve("new", &ctx).is_found());
	}

	proptest! {
		#[test]
		fn absent_flags_are_not_found(
			present in prop::collection::hash_set("[a-z]{1,8}", 0..10),
			probe in "[a-z]{1,8}",
		) {
			prop_assume!(!present.contains(&probe));
			let cache = FlagCache::new();
			let ctx = EvaluationContext::new();
			let names: Vec<&str> = present.iter().map(String::as_str).collect();
			cache.refresh(snapshot_for(&ctx, &names));

			prop_assert_eq!(cache.resolve(&probe, &ctx), CacheResolveResult::NotFound);
		}

		#[test]
		fn mismatched_hash_is_always_stale(
			key in "[a-z0-9]{1,12}",
			other_key in "[a-z0-9]{1,12}",
			probe in "[a-z]{1,8}",
		) {
			prop_assume!(key != other_key);
			let cache = FlagCache::new();
			let ctx = EvaluationContext::new().with_targeting_key(&key);
			let other = EvaluationContext::new().with_targeting_key(&other_key);
			cache.refresh(snapshot_for(&ctx, &[probe.as_str()]));

			prop_assert_eq!(cache.resolve(&probe, &other), CacheResolveResult::Stale);
		}
	}
}
