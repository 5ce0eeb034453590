//! Exponential-backoff retry with a surfaced attempt history.
//!
//! Retry is an explicit higher-order call rather than hidden control
//! flow: callers pass the fallible operation and the policy, and a
//! failure comes back with the full attempt history so "failed after N
//! attempts" is distinguishable from "failed immediately".

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::warn;

use crate::error::ScrapeError;

/// Backoff and attempt-budget parameters. All fields positive;
/// `max_attempts >= 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
	pub initial_delay_ms: u64,
	pub multiplier: f64,
	pub max_attempts: u32,
	pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			initial_delay_ms: 1000,
			multiplier: 2.0,
			max_attempts: 4,
			max_delay_ms: 60_000,
		}
	}
}

impl RetryPolicy {
	/// Delay waited after the given failed attempt (1-based):
	/// `min(initial * multiplier^(attempt-1), max_delay)`.
	pub fn delay_after(&self, attempt: u32) -> Duration {
		let raw = self.initial_delay_ms as f64 * self.multiplier.powi(attempt.saturating_sub(1) as i32);
		Duration::from_millis((raw as u64).min(self.max_delay_ms))
	}
}

/// One failed attempt and the backoff that followed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
	pub attempt: u32,
	pub delay_ms: u64,
	pub reason: String,
}

/// Final failure of a retried operation, with the accumulated history.
/// `history` holds one entry per backoff wait, so an exhausted budget
/// of `n` attempts carries `n - 1` entries and an immediate terminal
/// failure carries none.
#[derive(Debug)]
pub struct RetryFailure {
	pub error: ScrapeError,
	pub attempts: u32,
	pub history: Vec<AttemptRecord>,
}

impl RetryFailure {
	/// Converts into the wire envelope, attaching attempt count and
	/// history as diagnostics. Never includes session secrets.
	pub fn into_record(self) -> capwatch_protocol::ErrorRecord {
		let mut record = self.error.to_record().with_attempts(self.attempts);
		if !self.history.is_empty() {
			let mut diagnostics = record.diagnostics.take().unwrap_or_default();
			diagnostics.insert(
				"attempt_history".to_string(),
				serde_json::to_value(&self.history).unwrap_or(serde_json::Value::Null),
			);
			record = record.with_diagnostics(diagnostics);
		}
		record
	}
}

/// Outcome of [`execute`] when the operation did not succeed.
#[derive(Debug)]
pub enum RetryError {
	Failed(RetryFailure),
	/// Shutdown was signalled during a backoff wait. No further attempt
	/// was started and no record should be persisted for this run.
	Cancelled,
}

/// Runs `operation` under `policy`.
///
/// Attempt 1 runs immediately. Retryable failures back off and retry
/// until the budget is spent; terminal failures (challenge page, dead
/// session, fatal) stop at once. A `shutdown` receiver, when provided,
/// is honored at backoff wait boundaries only - it never interrupts an
/// attempt in flight.
pub async fn execute<T, F, Fut>(
	policy: &RetryPolicy,
	mut shutdown: Option<watch::Receiver<bool>>,
	mut operation: F,
) -> Result<T, RetryError>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, ScrapeError>>,
{
	let mut history: Vec<AttemptRecord> = Vec::new();
	let mut attempt: u32 = 1;

	loop {
		match operation().await {
			Ok(value) => return Ok(value),
			Err(error) => {
				if error.is_terminal() || attempt >= policy.max_attempts {
					return Err(RetryError::Failed(RetryFailure { error, attempts: attempt, history }));
				}

				let delay = policy.delay_after(attempt);
				warn!(
					target = "capwatch.retry",
					attempt,
					max_attempts = policy.max_attempts,
					delay_ms = delay.as_millis() as u64,
					error = %error,
					"attempt failed; backing off"
				);
				history.push(AttemptRecord {
					attempt,
					delay_ms: delay.as_millis() as u64,
					reason: error.to_string(),
				});

				if wait_or_cancel(delay, shutdown.as_mut()).await {
					return Err(RetryError::Cancelled);
				}
				attempt += 1;
			}
		}
	}
}

/// Sleeps for `delay`, returning `true` if shutdown fired first.
async fn wait_or_cancel(delay: Duration, shutdown: Option<&mut watch::Receiver<bool>>) -> bool {
	let Some(rx) = shutdown else {
		sleep(delay).await;
		return false;
	};

	if *rx.borrow() {
		return true;
	}

	let sleeper = sleep(delay);
	tokio::pin!(sleeper);
	loop {
		tokio::select! {
			_ = &mut sleeper => return false,
			changed = rx.changed() => {
				if changed.is_err() || *rx.borrow() {
					return true;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicU32, Ordering};

	use super::*;

	fn fast_policy(max_attempts: u32) -> RetryPolicy {
		RetryPolicy {
			initial_delay_ms: 10,
			multiplier: 2.0,
			max_attempts,
			max_delay_ms: 25,
		}
	}

	#[tokio::test(start_paused = true)]
	async fn retryable_failure_consumes_exact_attempt_budget() {
		let calls = Arc::new(AtomicU32::new(0));
		let calls2 = calls.clone();
		let policy = fast_policy(4);

		let result: Result<(), RetryError> = execute(&policy, None, move || {
			let calls = calls2.clone();
			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				Err(ScrapeError::Navigation { url: "u".into(), message: "down".into() })
			}
		})
		.await;

		assert_eq!(calls.load(Ordering::SeqCst), 4);
		match result {
			Err(RetryError::Failed(failure)) => {
				assert_eq!(failure.attempts, 4);
				let delays: Vec<u64> = failure.history.iter().map(|r| r.delay_ms).collect();
				// d, min(d*m, cap), min(d*m^2, cap): 10, 20, capped 25.
				assert_eq!(delays, vec![10, 20, 25]);
			}
			other => panic!("expected Failed, got {other:?}"),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn terminal_failure_stops_after_one_attempt() {
		let calls = Arc::new(AtomicU32::new(0));
		let calls2 = calls.clone();
		let policy = fast_policy(10);

		let result: Result<(), RetryError> = execute(&policy, None, move || {
			let calls = calls2.clone();
			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				Err(ScrapeError::ChallengeDetected)
			}
		})
		.await;

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		match result {
			Err(RetryError::Failed(failure)) => {
				assert_eq!(failure.attempts, 1);
				assert!(failure.history.is_empty());
			}
			other => panic!("expected Failed, got {other:?}"),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn transient_failures_resolve_locally() {
		let calls = Arc::new(AtomicU32::new(0));
		let calls2 = calls.clone();
		let policy = fast_policy(4);

		let result = execute(&policy, None, move || {
			let calls = calls2.clone();
			async move {
				if calls.fetch_add(1, Ordering::SeqCst) < 2 {
					Err(ScrapeError::Timeout { operation: "navigation".into(), seconds: 1 })
				} else {
					Ok("snapshot")
				}
			}
		})
		.await;

		assert!(matches!(result, Ok("snapshot")));
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn shutdown_cancels_at_backoff_boundary() {
		let (tx, rx) = watch::channel(false);
		let policy = RetryPolicy {
			initial_delay_ms: 60_000,
			multiplier: 2.0,
			max_attempts: 3,
			max_delay_ms: 60_000,
		};

		let calls = Arc::new(AtomicU32::new(0));
		let calls2 = calls.clone();
		let task = tokio::spawn(async move {
			execute::<(), _, _>(&policy, Some(rx), move || {
				let calls = calls2.clone();
				async move {
					calls.fetch_add(1, Ordering::SeqCst);
					Err(ScrapeError::Navigation { url: "u".into(), message: "down".into() })
				}
			})
			.await
		});

		// Let the first attempt fail and enter its backoff wait.
		tokio::task::yield_now().await;
		tx.send(true).unwrap();

		match task.await.unwrap() {
			Err(RetryError::Cancelled) => {}
			other => panic!("expected Cancelled, got {other:?}"),
		}
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn failure_record_carries_attempts_and_history() {
		let failure = RetryFailure {
			error: ScrapeError::Navigation { url: "u".into(), message: "down".into() },
			attempts: 3,
			history: vec![
				AttemptRecord { attempt: 1, delay_ms: 10, reason: "down".into() },
				AttemptRecord { attempt: 2, delay_ms: 20, reason: "down".into() },
			],
		};
		let record = failure.into_record();
		assert_eq!(record.attempts, Some(3));
		let history = &record.diagnostics.unwrap()["attempt_history"];
		assert_eq!(history.as_array().unwrap().len(), 2);
	}
}
