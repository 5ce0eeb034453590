//! `poll-once`: one extraction run, one record, one envelope.
//!
//! Transient failures are retried inside the run per the configured
//! policy; only the final outcome crosses the process boundary. The
//! outcome - snapshot or terminal error - is also appended to the
//! record store so on-demand polls and scheduled polls share one
//! history.

use capwatch_core::{retry, RetryError, RetryFailure, ScrapeError};
use capwatch_protocol::{codec, PersistedRecord, RunPayload, UsageSnapshot};
use tracing::warn;

use crate::browser::{BrowserSession, DashboardPage};
use crate::commands::{emit_stdout, CliFailure, WorkerContext};

pub async fn run(ctx: &WorkerContext) -> Result<(), CliFailure> {
	let sessions = ctx.session_store();
	let Some(session) = sessions.load().filter(|_| sessions.validate_local()) else {
		let failure = CliFailure::from(ScrapeError::SessionRequired);
		persist(ctx, RunPayload::Error(failure.record.clone()));
		return Err(failure);
	};

	let browser = BrowserSession::launch(&ctx.profile_dir(), true).await?;
	let collected = collect(ctx, &browser, &session).await;
	browser.close().await;

	match collected {
		Ok(snapshot) => {
			persist(ctx, RunPayload::Snapshot(snapshot.clone()));
			let bytes = codec::encode_snapshot(&snapshot)
				.map_err(|e| CliFailure::fatal(format!("failed to encode snapshot: {e}")))?;
			emit_stdout(bytes)
		}
		Err(RetryError::Failed(failure)) => {
			let record = failure.into_record();
			persist(ctx, RunPayload::Error(record.clone()));
			Err(record.into())
		}
		// No shutdown channel is wired here, so cancellation cannot
		// occur; treat it as fatal if it ever does.
		Err(RetryError::Cancelled) => Err(CliFailure::fatal("run cancelled")),
	}
}

async fn collect(
	ctx: &WorkerContext,
	browser: &BrowserSession,
	session: &capwatch_core::Session,
) -> Result<UsageSnapshot, RetryError> {
	let page = browser.new_page().await.map_err(single_attempt)?;
	browser.restore_session(&page, session).await.map_err(single_attempt)?;
	let dash = DashboardPage::new(page);
	let engine = ctx.engine();

	if ctx.config.retry_within_run {
		retry::execute(&ctx.config.retry, None, || engine.collect(&dash)).await
	} else {
		engine.collect(&dash).await.map_err(single_attempt)
	}
}

fn single_attempt(error: ScrapeError) -> RetryError {
	RetryError::Failed(RetryFailure { error, attempts: 1, history: Vec::new() })
}

/// Record-store writes never mask the run outcome; a failed write is
/// logged and the envelope still goes out.
fn persist(ctx: &WorkerContext, payload: RunPayload) {
	if let Err(err) = ctx.record_store().append(&PersistedRecord::new(payload)) {
		warn!(target = "capwatch.storage", error = %err, "failed to persist run record");
	}
}
