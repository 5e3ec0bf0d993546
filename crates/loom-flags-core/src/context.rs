// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation context and its stable hash.
//!
//! A resolved snapshot is only valid for the context that produced it. The
//! cache compares [`EvaluationContext::hash`] against the hash recorded in the
//! snapshot, so the hash must be identical across process runs and platforms.
//! It is derived from SHA-256 over the canonical JSON form of the context,
//! where attribute keys are always emitted in sorted order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Attribute key under which the targeting key is sent on the wire.
pub const TARGETING_KEY_ATTRIBUTE: &str = "targeting_key";

/// The context a set of flags is resolved against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
	/// Identity used for bucketing (user id, device id, ...).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub targeting_key: Option<String>,

	/// Free-form attributes, kept ordered so hashing is deterministic.
	#[serde(default)]
	pub attributes: BTreeMap<String, serde_json::Value>,
}

impl EvaluationContext {
	/// Creates an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the targeting key.
	pub fn with_targeting_key(mut self, key: impl Into<String>) -> Self {
		self.targeting_key = Some(key.into());
		self
	}

	/// Adds or replaces an attribute.
	pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	/// Flattens the context into the single JSON object the resolver expects.
	///
	/// The targeting key, when present, wins over an attribute of the same name.
	pub fn to_wire(&self) -> serde_json::Value {
		let mut map: serde_json::Map<String, serde_json::Value> = self
			.attributes
			.iter()
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect();

		if let Some(key) = &self.targeting_key {
			map.insert(
				TARGETING_KEY_ATTRIBUTE.to_string(),
				serde_json::Value::String(key.clone()),
			);
		}

		serde_json::Value::Object(map)
	}

	/// Computes the hex-encoded SHA-256 digest of the canonical wire form.
	pub fn digest(&self) -> String {
		hex::encode(self.digest_bytes())
	}

	/// Returns the stable context hash recorded in cached snapshots.
	///
	/// This is the first eight bytes of [`Self::digest`], read big endian.
	pub fn hash(&self) -> u64 {
		let digest = self.digest_bytes();
		let mut prefix = [0u8; 8];
		prefix.copy_from_slice(&digest[..8]);
		u64::from_be_bytes(prefix)
	}

	fn digest_bytes(&self) -> [u8; 32] {
		// serde_json::Map is a BTreeMap without the preserve_order feature, so
		// nested objects serialize with sorted keys as well.
		let canonical = self.to_wire().to_string();
		let mut hasher = Sha256::new();
		hasher.update(canonical.as_bytes());
		hasher.finalize().into()
	}
}
