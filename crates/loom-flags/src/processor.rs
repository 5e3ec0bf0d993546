// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Single-writer event processor for flag exposures.
//!
//! One owner task holds the [`ApplyLedger`]. Everything else talks to it over
//! two unbounded channels:
//!
//! - commands ([`ProcessorCommand`]) from any number of callers, and
//! - [`BatchResult`]s from the delivery tasks it spawns.
//!
//! The owner loop is the only code that reads or writes the ledger, so no
//! lock guards it. After every mutation the loop writes the ledger to storage
//! before handling the next message. Network sends run in their own tasks and
//! never block the loop.
//!
//! Retries are request driven: a failed batch goes back to `CREATED` and is
//! picked up by the next flush, which happens on the next apply request or an
//! explicit [`ProcessorCommand::Flush`]. There is no timer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use loom_flags_core::{ApplyLedger, PendingChunk, DEFAULT_APPLY_CHUNK_SIZE};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::error::Result;
use crate::remote::SharedApplyClient;
use crate::storage::Storage;

/// A request to record one flag exposure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest {
	pub resolve_token: String,
	pub flag: String,
}

/// Command sent to the owner task.
#[derive(Debug)]
pub enum ProcessorCommand {
	/// Record an exposure, persist, then flush.
	Apply(ApplyRequest),
	/// Dispatch everything still `CREATED`.
	Flush,
	/// Stop accepting commands, wait for in-flight batches, persist and exit.
	Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
	Success,
	Failure,
}

/// Completion notice from a delivery task.
#[derive(Debug, Clone)]
pub struct BatchResult {
	pub resolve_token: String,
	pub flags: Vec<String>,
	pub outcome: BatchOutcome,
}

/// Configuration for the event processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
	/// Maximum flags per apply request.
	pub chunk_size: usize,
	/// How long shutdown waits for in-flight batches.
	pub shutdown_timeout: Duration,
}

impl Default for ProcessorConfig {
	fn default() -> Self {
		Self {
			chunk_size: DEFAULT_APPLY_CHUNK_SIZE,
			shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
		}
	}
}

/// Counters updated by the owner task, readable from any thread.
#[derive(Debug, Default)]
pub struct ProcessorStats {
	applies_recorded: AtomicU64,
	batches_dispatched: AtomicU64,
	batches_sent: AtomicU64,
	batches_failed: AtomicU64,
	storage_failures: AtomicU64,
}

impl ProcessorStats {
	/// New `(token, flag)` pairs added to the ledger.
	pub fn applies_recorded(&self) -> u64 {
		self.applies_recorded.load(Ordering::SeqCst)
	}

	/// Delivery tasks spawned.
	pub fn batches_dispatched(&self) -> u64 {
		self.batches_dispatched.load(Ordering::SeqCst)
	}

	pub fn batches_sent(&self) -> u64 {
		self.batches_sent.load(Ordering::SeqCst)
	}

	pub fn batches_failed(&self) -> u64 {
		self.batches_failed.load(Ordering::SeqCst)
	}

	/// Ledger reads or writes that failed. Unlike network failures these do
	/// not heal on retry, so hosts should alert on a growing count.
	pub fn storage_failures(&self) -> u64 {
		self.storage_failures.load(Ordering::SeqCst)
	}
}

/// Handle to the owner task.
pub struct EventProcessor {
	commands: mpsc::UnboundedSender<ProcessorCommand>,
	stats: Arc<ProcessorStats>,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl EventProcessor {
	/// Spawns the owner task on the current tokio runtime.
	///
	/// The task loads the ledger, re-queues anything left `SENDING` by a
	/// previous run and flushes before handling the first command.
	pub fn spawn(
		storage: Arc<dyn Storage>,
		client: SharedApplyClient,
		config: ProcessorConfig,
	) -> Self {
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();
		let (results_tx, results_rx) = mpsc::unbounded_channel();
		let stats = Arc::new(ProcessorStats::default());

		let owner = OwnerTask {
			ledger: ApplyLedger::new(),
			storage,
			client,
			config,
			stats: Arc::clone(&stats),
			results_tx,
			results_rx,
			in_flight: 0,
			dirty: false,
		};

		let task = tokio::spawn(owner.run(commands_rx));

		Self {
			commands: commands_tx,
			stats,
			task: Mutex::new(Some(task)),
		}
	}

	/// Enqueues a command without waiting. Returns `false` if the owner task
	/// has stopped.
	pub fn submit(&self, command: ProcessorCommand) -> bool {
		self.commands.send(command).is_ok()
	}

	pub fn apply(&self, flag: impl Into<String>, resolve_token: impl Into<String>) -> bool {
		self.submit(ProcessorCommand::Apply(ApplyRequest {
			resolve_token: resolve_token.into(),
			flag: flag.into(),
		}))
	}

	pub fn flush(&self) -> bool {
		self.submit(ProcessorCommand::Flush)
	}

	pub fn stats(&self) -> Arc<ProcessorStats> {
		Arc::clone(&self.stats)
	}

	pub fn is_running(&self) -> bool {
		!self.commands.is_closed()
	}

	/// Asks the owner task to stop and waits for it. Calling this twice is fine.
	pub async fn shutdown(&self) {
		let _ = self.commands.send(ProcessorCommand::Shutdown);

		let task = self.task.lock().await.take();
		if let Some(task) = task {
			if let Err(e) = task.await {
				error!(error = %e, "event processor task panicked");
			}
		}
	}
}

impl std::fmt::Debug for EventProcessor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventProcessor")
			.field("running", &self.is_running())
			.field("stats", &self.stats)
			.finish()
	}
}

struct OwnerTask {
	ledger: ApplyLedger,
	storage: Arc<dyn Storage>,
	client: SharedApplyClient,
	config: ProcessorConfig,
	stats: Arc<ProcessorStats>,
	results_tx: mpsc::UnboundedSender<BatchResult>,
	results_rx: mpsc::UnboundedReceiver<BatchResult>,
	in_flight: usize,
	/// The in-memory ledger holds changes the last write failed to persist.
	dirty: bool,
}

impl OwnerTask {
	async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ProcessorCommand>) {
		info!(chunk_size = self.config.chunk_size, "starting event processor");

		self.load().await;
		self.flush().await;

		loop {
			// Unbiased select: neither channel has priority.
			tokio::select! {
				command = commands.recv() => match command {
					Some(ProcessorCommand::Apply(request)) => self.on_apply(request).await,
					Some(ProcessorCommand::Flush) => self.flush().await,
					Some(ProcessorCommand::Shutdown) | None => break,
				},
				Some(result) = self.results_rx.recv() => self.on_batch_result(result).await,
			}
		}

		self.stop(commands).await;
	}

	async fn load(&mut self) {
		match self.storage.read_apply_data().await {
			Ok(ledger) => self.ledger = ledger,
			Err(e) if e.is_parse() => {
				warn!(error = %e, "apply ledger is unreadable, starting empty");
			}
			Err(e) => {
				self.stats.storage_failures.fetch_add(1, Ordering::SeqCst);
				error!(kind = "storage", error = %e, "failed to load apply ledger, starting empty");
			}
		}

		let recovered = self.ledger.recover_in_flight();
		if recovered > 0 {
			info!(recovered, "re-queued exposures left in flight by a previous run");
		}
		debug!(entries = self.ledger.len(), "loaded apply ledger");
	}

	async fn on_apply(&mut self, request: ApplyRequest) {
		let inserted = self
			.ledger
			.record(&request.resolve_token, &request.flag, Utc::now());

		if inserted {
			self.stats.applies_recorded.fetch_add(1, Ordering::SeqCst);
			debug!(
				resolve_token = %request.resolve_token,
				flag = %request.flag,
				"recorded flag exposure"
			);
			self.dirty = true;
		}

		self.flush().await;
	}

	async fn flush(&mut self) {
		// Durability precedes batching: nothing is sent that is not on disk.
		if self.dirty && self.persist().await.is_err() {
			debug!("ledger not persisted, holding back apply batches");
			return;
		}

		let chunks = self.ledger.take_pending_chunks(self.config.chunk_size);
		if chunks.is_empty() {
			return;
		}

		debug!(chunks = chunks.len(), "dispatching apply batches");
		for chunk in chunks {
			self.dispatch(chunk);
		}
	}

	fn dispatch(&mut self, chunk: PendingChunk) {
		let client = Arc::clone(&self.client);
		let results = self.results_tx.clone();

		self.in_flight += 1;
		self.stats.batches_dispatched.fetch_add(1, Ordering::SeqCst);

		tokio::spawn(async move {
			let flags = chunk.flag_names();
			let outcome = match client.apply(&chunk.flags, &chunk.resolve_token).await {
				Ok(()) => BatchOutcome::Success,
				Err(e) => {
					warn!(
						resolve_token = %chunk.resolve_token,
						count = flags.len(),
						error = %e,
						"apply batch failed, will retry on next flush"
					);
					BatchOutcome::Failure
				}
			};

			// The owner may already be gone during shutdown; the ledger on
			// disk still says SENDING and is recovered on next start.
			let _ = results.send(BatchResult {
				resolve_token: chunk.resolve_token,
				flags,
				outcome,
			});
		});
	}

	async fn on_batch_result(&mut self, result: BatchResult) {
		self.in_flight = self.in_flight.saturating_sub(1);

		let delivered = result.outcome == BatchOutcome::Success;
		let updated = self
			.ledger
			.complete(&result.resolve_token, &result.flags, delivered);

		if delivered {
			self.stats.batches_sent.fetch_add(1, Ordering::SeqCst);
		} else {
			self.stats.batches_failed.fetch_add(1, Ordering::SeqCst);
		}

		debug!(
			resolve_token = %result.resolve_token,
			outcome = ?result.outcome,
			updated,
			"applied batch result"
		);

		let _ = self.persist().await;
	}

	async fn persist(&mut self) -> Result<()> {
		let view = self.ledger.persisted_view();
		if let Err(e) = self.storage.write_apply_data(&view).await {
			self.dirty = true;
			self.stats.storage_failures.fetch_add(1, Ordering::SeqCst);
			error!(kind = "storage", error = %e, "failed to persist apply ledger");
			return Err(e);
		}
		self.dirty = false;
		Ok(())
	}

	async fn stop(mut self, mut commands: mpsc::UnboundedReceiver<ProcessorCommand>) {
		commands.close();

		// Exposures queued before shutdown are recorded so the next run sends them.
		let mut late = 0usize;
		while let Ok(command) = commands.try_recv() {
			if let ProcessorCommand::Apply(request) = command {
				if self
					.ledger
					.record(&request.resolve_token, &request.flag, Utc::now())
				{
					self.stats.applies_recorded.fetch_add(1, Ordering::SeqCst);
					late += 1;
				}
			}
		}
		if late > 0 {
			debug!(late, "recorded exposures queued behind shutdown");
		}

		if self.in_flight > 0 {
			let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
			while self.in_flight > 0 {
				match tokio::time::timeout_at(deadline, self.results_rx.recv()).await {
					Ok(Some(result)) => self.on_batch_result(result).await,
					Ok(None) => break,
					Err(_) => {
						warn!(
							in_flight = self.in_flight,
							"timed out waiting for apply batches during shutdown"
						);
						break;
					}
				}
			}
		}

		let _ = self.persist().await;
		info!("event processor stopped");
	}
}
