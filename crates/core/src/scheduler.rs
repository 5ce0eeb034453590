//! Periodic, non-overlapping polling of the extraction pipeline.
//!
//! The scheduler is an explicit object with an explicit run/stop
//! lifecycle owned by whoever constructs it - never a process-wide
//! singleton - so tests can run several independent instances. A
//! single run-in-progress guard drops (not queues) triggers that fire
//! while a run is active.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use capwatch_protocol::{PersistedRecord, RunPayload, UsageSnapshot};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::ScrapeError;
use crate::extract::ExtractionEngine;
use crate::page::PageProvider;
use crate::retry::{self, RetryError, RetryFailure, RetryPolicy};
use crate::session::SessionStore;
use crate::storage::RecordStore;

/// Scheduling and retry composition knobs.
///
/// `retry_within_run` makes the relationship between the retry budget
/// and the polling cadence explicit: when true, each run retries
/// transient failures internally and the interval stays untouched;
/// when false, a run is a single attempt and "try again" is purely the
/// next tick.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	pub interval: Duration,
	pub retry: RetryPolicy,
	pub retry_within_run: bool,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(300),
			retry: RetryPolicy::default(),
			retry_within_run: true,
		}
	}
}

/// What a single cycle did.
#[derive(Debug)]
pub enum CycleOutcome {
	/// One record (snapshot or error) was written.
	Persisted(PathBuf),
	/// A run was already in flight; this trigger was dropped.
	Skipped,
	/// Shutdown fired during the run; nothing was persisted.
	Abandoned,
	/// The outcome could not be written to storage.
	StorageFailed,
}

/// Stops a running scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
	tx: watch::Sender<bool>,
}

impl SchedulerHandle {
	pub fn stop(&self) {
		let _ = self.tx.send(true);
	}
}

/// Drives one extraction pipeline at a time on the caller's runtime.
pub struct Scheduler<P: PageProvider> {
	engine: ExtractionEngine,
	sessions: SessionStore,
	records: RecordStore,
	provider: P,
	config: SchedulerConfig,
	in_flight: AtomicBool,
	shutdown_tx: watch::Sender<bool>,
	shutdown_rx: watch::Receiver<bool>,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

impl<P: PageProvider> Scheduler<P> {
	pub fn new(
		engine: ExtractionEngine,
		sessions: SessionStore,
		records: RecordStore,
		provider: P,
		config: SchedulerConfig,
	) -> Self {
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		Self {
			engine,
			sessions,
			records,
			provider,
			config,
			in_flight: AtomicBool::new(false),
			shutdown_tx,
			shutdown_rx,
		}
	}

	/// Handle for stopping the loop from another task.
	pub fn handle(&self) -> SchedulerHandle {
		SchedulerHandle { tx: self.shutdown_tx.clone() }
	}

	/// Ticks until stopped. The first cycle runs immediately; missed
	/// ticks are skipped rather than queued.
	pub async fn run(&self) {
		let mut rx = self.shutdown_rx.clone();
		let mut ticker = tokio::time::interval(self.config.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
		info!(
			target = "capwatch.sched",
			interval_secs = self.config.interval.as_secs(),
			"scheduler started"
		);

		loop {
			tokio::select! {
				_ = ticker.tick() => {
					self.run_cycle().await;
				}
				changed = rx.changed() => {
					if changed.is_err() || *rx.borrow() {
						info!(target = "capwatch.sched", "scheduler stopped");
						return;
					}
				}
			}
		}
	}

	/// One Idle -> Running -> Idle transition. Safe to call from an
	/// on-demand trigger; overlapping calls are dropped, logged as a
	/// skipped cycle, and persist nothing.
	pub async fn run_cycle(&self) -> CycleOutcome {
		if self.in_flight.swap(true, Ordering::SeqCst) {
			warn!(target = "capwatch.sched", "run already in progress; dropping trigger");
			return CycleOutcome::Skipped;
		}
		let _guard = InFlightGuard(&self.in_flight);

		// Cheap session gate first: no browser activity when there is
		// nothing to authenticate with.
		if !self.sessions.validate_local() {
			info!(target = "capwatch.sched", "no usable session; persisting session_required");
			let record = ScrapeError::SessionRequired.to_record().with_attempts(1);
			return self.persist(RunPayload::Error(record));
		}

		let page = match self.provider.acquire().await {
			Ok(page) => page,
			Err(err) => {
				error!(target = "capwatch.sched", error = %err, "page acquisition failed");
				let record = err.to_record().with_attempts(1);
				return self.persist(RunPayload::Error(record));
			}
		};

		let result: Result<UsageSnapshot, RetryError> = if self.config.retry_within_run {
			retry::execute(&self.config.retry, Some(self.shutdown_rx.clone()), || {
				self.engine.collect(page.as_ref())
			})
			.await
		} else {
			self.engine.collect(page.as_ref()).await.map_err(|error| {
				RetryError::Failed(RetryFailure { error, attempts: 1, history: Vec::new() })
			})
		};

		match result {
			Ok(snapshot) => {
				info!(
					target = "capwatch.sched",
					strategy = %snapshot.strategy_used,
					found = snapshot.found_components,
					"poll succeeded"
				);
				self.persist(RunPayload::Snapshot(snapshot))
			}
			Err(RetryError::Failed(failure)) => {
				warn!(
					target = "capwatch.sched",
					attempts = failure.attempts,
					error = %failure.error,
					"poll failed"
				);
				self.persist(RunPayload::Error(failure.into_record()))
			}
			Err(RetryError::Cancelled) => {
				info!(target = "capwatch.sched", "run abandoned at backoff boundary");
				CycleOutcome::Abandoned
			}
		}
	}

	fn persist(&self, payload: RunPayload) -> CycleOutcome {
		match self.records.append(&PersistedRecord::new(payload)) {
			Ok(path) => CycleOutcome::Persisted(path),
			Err(err) => {
				error!(target = "capwatch.sched", error = %err, "failed to persist record");
				CycleOutcome::StorageFailed
			}
		}
	}
}
