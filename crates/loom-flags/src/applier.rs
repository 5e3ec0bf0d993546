// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fire-and-forget front door to the event processor.

use std::sync::Arc;

use tracing::debug;

use crate::processor::{EventProcessor, ProcessorConfig, ProcessorStats};
use crate::remote::SharedApplyClient;
use crate::storage::Storage;

/// Records flag exposures without ever blocking or failing the caller.
///
/// `apply` is synchronous and safe to call from any thread, including inside
/// a flag evaluation hot path. Delivery, retries and persistence happen on
/// the processor's owner task.
#[derive(Debug)]
pub struct FlagApplier {
	processor: EventProcessor,
}

impl FlagApplier {
	/// Starts the event processor on the current tokio runtime.
	pub fn new(storage: Arc<dyn Storage>, client: SharedApplyClient, config: ProcessorConfig) -> Self {
		Self {
			processor: EventProcessor::spawn(storage, client, config),
		}
	}

	/// Reports that `flag_name`, resolved under `resolve_token`, was used.
	pub fn apply(&self, flag_name: &str, resolve_token: &str) {
		if !self.processor.apply(flag_name, resolve_token) {
			debug!(
				flag = %flag_name,
				resolve_token = %resolve_token,
				"event processor stopped, dropping exposure"
			);
		}
	}

	/// Retries everything not yet delivered, e.g. after connectivity returns.
	pub fn flush(&self) {
		if !self.processor.flush() {
			debug!("event processor stopped, ignoring flush");
		}
	}

	pub fn stats(&self) -> Arc<ProcessorStats> {
		self.processor.stats()
	}

	pub fn is_running(&self) -> bool {
		self.processor.is_running()
	}

	/// Waits for in-flight batches (bounded by the shutdown timeout), persists
	/// the ledger and stops the owner task.
	pub async fn shutdown(&self) {
		self.processor.shutdown().await;
	}
}
