// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The apply ledger: which flag exposures exist and how far each one got.
//!
//! Every `(resolve_token, flag)` pair moves through
//! `CREATED -> SENDING -> SENT`. A failed delivery moves `SENDING` back to
//! `CREATED`, and so does loading a ledger written by a previous process,
//! since nothing confirms that an in-flight send from that process landed.
//!
//! The ledger itself is plain data. Serializing access to it is the job of the
//! event processor in `loom-flags`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of flags delivered in one apply request.
pub const DEFAULT_APPLY_CHUNK_SIZE: usize = 20;

/// Delivery state of a single exposure event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
	Created,
	Sending,
	Sent,
}

/// One exposure event for a `(resolve_token, flag)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyInstance {
	/// When the flag was first applied. Later applies never overwrite it.
	pub time: DateTime<Utc>,
	pub event_status: EventStatus,
}

impl ApplyInstance {
	pub fn created(time: DateTime<Utc>) -> Self {
		Self {
			time,
			event_status: EventStatus::Created,
		}
	}
}

/// A flag exposure as handed to the apply client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedFlag {
	pub flag: String,
	pub apply_time: DateTime<Utc>,
}

/// A bounded batch of exposures for one resolve token, already marked `SENDING`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChunk {
	pub resolve_token: String,
	pub flags: Vec<AppliedFlag>,
}

impl PendingChunk {
	pub fn flag_names(&self) -> Vec<String> {
		self.flags.iter().map(|f| f.flag.clone()).collect()
	}
}

/// `resolve_token -> flag -> ApplyInstance`.
///
/// Serializes as the bare nested map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplyLedger {
	tokens: BTreeMap<String, BTreeMap<String, ApplyInstance>>,
}

impl ApplyLedger {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records an exposure. Returns `false` if the pair was already present,
	/// in which case nothing changes.
	pub fn record(&mut self, resolve_token: &str, flag: &str, time: DateTime<Utc>) -> bool {
		let flags = self.tokens.entry(resolve_token.to_string()).or_default();
		if flags.contains_key(flag) {
			return false;
		}
		flags.insert(flag.to_string(), ApplyInstance::created(time));
		true
	}

	pub fn get(&self, resolve_token: &str, flag: &str) -> Option<&ApplyInstance> {
		self.tokens.get(resolve_token).and_then(|f| f.get(flag))
	}

	/// Demotes every `SENDING` entry to `CREATED`. Returns how many moved.
	///
	/// Called once on load; an in-flight send from a previous process is
	/// treated as never delivered.
	pub fn recover_in_flight(&mut self) -> usize {
		let mut recovered = 0;
		for instance in self.tokens.values_mut().flat_map(|f| f.values_mut()) {
			if instance.event_status == EventStatus::Sending {
				instance.event_status = EventStatus::Created;
				recovered += 1;
			}
		}
		recovered
	}

	/// Collects every `CREATED` entry into chunks of at most `chunk_size`
	/// flags per token and marks them `SENDING`.
	///
	/// Flags within a token are chunked in name order. A `chunk_size` of zero
	/// is treated as one.
	pub fn take_pending_chunks(&mut self, chunk_size: usize) -> Vec<PendingChunk> {
		let chunk_size = chunk_size.max(1);
		let mut chunks = Vec::new();

		for (token, flags) in self.tokens.iter_mut() {
			let mut pending: Vec<AppliedFlag> = Vec::new();
			for (flag, instance) in flags.iter_mut() {
				if instance.event_status != EventStatus::Created {
					continue;
				}
				instance.event_status = EventStatus::Sending;
				pending.push(AppliedFlag {
					flag: flag.clone(),
					apply_time: instance.time,
				});
			}

			for batch in pending.chunks(chunk_size) {
				chunks.push(PendingChunk {
					resolve_token: token.clone(),
					flags: batch.to_vec(),
				});
			}
		}

		chunks
	}

	/// Applies a delivery outcome to the given flags.
	///
	/// Only `SENDING` entries move: to `SENT` on success, back to `CREATED`
	/// on failure. A `SENT` entry is terminal and is never reopened.
	pub fn complete(&mut self, resolve_token: &str, flags: &[String], delivered: bool) -> usize {
		let Some(entries) = self.tokens.get_mut(resolve_token) else {
			return 0;
		};

		let target = if delivered {
			EventStatus::Sent
		} else {
			EventStatus::Created
		};

		let mut updated = 0;
		for flag in flags {
			if let Some(instance) = entries.get_mut(flag) {
				if instance.event_status == EventStatus::Sending {
					instance.event_status = target;
					updated += 1;
				}
			}
		}
		updated
	}

	/// The form written to disk: tokens whose entries are all `SENT` are left out.
	pub fn persisted_view(&self) -> ApplyLedger {
		let tokens = self
			.tokens
			.iter()
			.filter(|(_, flags)| {
				flags
					.values()
					.any(|i| i.event_status != EventStatus::Sent)
			})
			.map(|(token, flags)| (token.clone(), flags.clone()))
			.collect();

		ApplyLedger { tokens }
	}

	/// Number of `(token, flag)` entries.
	pub fn len(&self) -> usize {
		self.tokens.values().map(BTreeMap::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn contains_token(&self, resolve_token: &str) -> bool {
		self.tokens.contains_key(resolve_token)
	}

	pub fn count_with_status(&self, status: EventStatus) -> usize {
		self
			.tokens
			.values()
			.flat_map(BTreeMap::values)
			.filter(|i| i.event_status == status)
			.count()
	}
}
