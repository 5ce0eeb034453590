//! `watch`: scheduled polling until interrupted.

use std::time::Duration;

use capwatch_core::{Scheduler, SchedulerConfig};
use tracing::info;

use crate::browser::HeadlessProvider;
use crate::commands::{CliFailure, WorkerContext};

pub async fn run(ctx: WorkerContext, interval_minutes: Option<u64>) -> Result<(), CliFailure> {
	let minutes = interval_minutes.unwrap_or(ctx.config.interval_minutes);
	let config = SchedulerConfig {
		interval: interval_from_minutes(minutes),
		retry: ctx.config.retry.clone(),
		retry_within_run: ctx.config.retry_within_run,
	};

	let provider = HeadlessProvider::new(ctx.profile_dir(), ctx.session_store());
	let scheduler = Scheduler::new(
		ctx.engine(),
		ctx.session_store(),
		ctx.record_store(),
		provider,
		config,
	);

	let handle = scheduler.handle();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!(target = "capwatch.sched", "interrupt received; stopping after the current run");
			handle.stop();
		}
	});

	scheduler.run().await;
	Ok(())
}

/// Floors at one minute and saturates instead of overflowing on
/// absurd flag values.
fn interval_from_minutes(minutes: u64) -> Duration {
	Duration::from_secs(minutes.max(1).saturating_mul(60))
}
