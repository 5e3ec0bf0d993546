// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resolved flag snapshots and cache lookup results.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Why the resolver returned a particular variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveReason {
	Match,
	NoSegmentMatch,
	NoTreatmentMatch,
	FlagArchived,
	TargetingKeyError,
	Error,
	Unspecified,
}

impl ResolveReason {
	/// Parses a reason, accepting both `MATCH` and `RESOLVE_REASON_MATCH`.
	///
	/// Unknown values map to [`ResolveReason::Unspecified`].
	pub fn parse(s: &str) -> Self {
		match s.strip_prefix("RESOLVE_REASON_").unwrap_or(s) {
			"MATCH" => Self::Match,
			"NO_SEGMENT_MATCH" => Self::NoSegmentMatch,
			"NO_TREATMENT_MATCH" => Self::NoTreatmentMatch,
			"FLAG_ARCHIVED" => Self::FlagArchived,
			"TARGETING_KEY_ERROR" => Self::TargetingKeyError,
			"ERROR" => Self::Error,
			_ => Self::Unspecified,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Match => "MATCH",
			Self::NoSegmentMatch => "NO_SEGMENT_MATCH",
			Self::NoTreatmentMatch => "NO_TREATMENT_MATCH",
			Self::FlagArchived => "FLAG_ARCHIVED",
			Self::TargetingKeyError => "TARGETING_KEY_ERROR",
			Self::Error => "ERROR",
			Self::Unspecified => "UNSPECIFIED",
		}
	}
}

impl<'de> Deserialize<'de> for ResolveReason {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		Ok(Self::parse(&s))
	}
}

impl fmt::Display for ResolveReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A single cached flag value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
	pub variant: String,
	#[serde(default)]
	pub value: serde_json::Value,
	pub reason: ResolveReason,
}

/// One flag as returned by the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFlag {
	/// Bare flag name, without any `flags/` prefix.
	pub flag: String,
	pub variant: String,
	pub value: serde_json::Value,
	pub reason: ResolveReason,
}

/// The outcome of a successful remote resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFlags {
	pub resolve_token: String,
	pub flags: Vec<ResolvedFlag>,
}

/// Snapshot of resolved flags for one evaluation context.
///
/// Never mutated after construction; a new resolve produces a new snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheData {
	pub resolve_token: String,
	pub evaluation_context_hash: u64,
	pub values: HashMap<String, CacheEntry>,
}

impl CacheData {
	pub fn new(
		resolve_token: impl Into<String>,
		evaluation_context_hash: u64,
		values: HashMap<String, CacheEntry>,
	) -> Self {
		Self {
			resolve_token: resolve_token.into(),
			evaluation_context_hash,
			values,
		}
	}

	/// Builds a snapshot from a resolve response.
	///
	/// If the resolver returns the same flag twice, the last one wins.
	pub fn from_resolved(resolved: ResolvedFlags, evaluation_context_hash: u64) -> Self {
		let values = resolved
			.flags
			.into_iter()
			.map(|f| {
				(
					f.flag,
					CacheEntry {
						variant: f.variant,
						value: f.value,
						reason: f.reason,
					},
				)
			})
			.collect();

		Self {
			resolve_token: resolved.resolve_token,
			evaluation_context_hash,
			values,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}
}

/// Result of looking a flag up in the in-memory cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheResolveResult {
	Found {
		entry: CacheEntry,
		resolve_token: String,
		reason: ResolveReason,
	},
	NotFound,
	/// The cached snapshot was resolved for a different context.
	Stale,
}

impl CacheResolveResult {
	pub fn is_found(&self) -> bool {
		matches!(self, Self::Found { .. })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn reason_accepts_prefixed_wire_form() {
		assert_eq!(ResolveReason::parse("RESOLVE_REASON_MATCH"), ResolveReason::Match);
		assert_eq!(
			ResolveReason::parse("RESOLVE_REASON_NO_SEGMENT_MATCH"),
			ResolveReason::NoSegmentMatch
		);
		assert_eq!(ResolveReason::parse("MATCH"), ResolveReason::Match);
		assert_eq!(ResolveReason::parse("SOMETHING_NEW"), ResolveReason::Unspecified);
	}

	#[test]
	fn cache_data_uses_camel_case_keys() {
		let mut values = HashMap::new();
		values.insert(
			"f1".to_string(),
			CacheEntry {
				variant: "A".to_string(),
				value: json!({}),
				reason: ResolveReason::Match,
			},
		);
		let data = CacheData::new("t1", 42, values);

		let json = serde_json::to_value(&data).unwrap();
		assert_eq!(json["resolveToken"], "t1");
		assert_eq!(json["evaluationContextHash"], 42);
		assert_eq!(json["values"]["f1"]["variant"], "A");
		assert_eq!(json["values"]["f1"]["reason"], "MATCH");
	}

	#[test]
	fn from_resolved_keys_by_flag_name() {
		let resolved = ResolvedFlags {
			resolve_token: "tok".to_string(),
			flags: vec![
				ResolvedFlag {
					flag: "checkout".to_string(),
					variant: "treatment".to_string(),
					value: json!({"enabled": true}),
					reason: ResolveReason::Match,
				},
				ResolvedFlag {
					flag: "banner".to_string(),
					variant: "".to_string(),
					value: json!(null),
					reason: ResolveReason::NoSegmentMatch,
				},
			],
		};

		let data = CacheData::from_resolved(resolved, 7);
		assert_eq!(data.resolve_token, "tok");
		assert_eq!(data.evaluation_context_hash, 7);
		assert_eq!(data.values.len(), 2);
		assert_eq!(data.values["checkout"].value["enabled"], true);
		assert_eq!(data.values["banner"].reason, ResolveReason::NoSegmentMatch);
	}

	#[test]
	fn entry_without_value_defaults_to_null() {
		let entry: CacheEntry =
			serde_json::from_str(r#"{"variant":"B","reason":"FLAG_ARCHIVED"}"#).unwrap();
		assert_eq!(entry.value, serde_json::Value::Null);
		assert_eq!(entry.reason, ResolveReason::FlagArchived);
	}
}
