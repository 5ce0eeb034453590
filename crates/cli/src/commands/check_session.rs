//! `check-session`: is the stored session usable?
//!
//! Without `--verify` this is a purely local structural check - no
//! browser, no network. With `--verify` it loads the dashboard through
//! a headless browser and confirms the server still honors the
//! cookies.

use capwatch_core::{ScrapeError, Session, SessionStore};
use capwatch_protocol::{codec, SessionCheck};
use tracing::info;

use crate::browser::{BrowserSession, DashboardPage};
use crate::commands::{emit_encoded, CliFailure, WorkerContext};

pub async fn run(ctx: &WorkerContext, verify: bool) -> Result<(), CliFailure> {
	let sessions = ctx.session_store();
	let Some(mut session) = sessions.load() else {
		return Err(ScrapeError::SessionRequired.into());
	};
	if !sessions.validate_local() {
		return Err(ScrapeError::SessionRequired.into());
	}

	if verify {
		let browser = BrowserSession::launch(&ctx.profile_dir(), true).await?;
		let checked = live_check(ctx, &browser, &mut session, &sessions).await;
		browser.close().await;
		match checked {
			Ok(true) => info!(target = "capwatch.session", "server accepted the session"),
			Ok(false) => return Err(ScrapeError::SessionExpired.into()),
			Err(err) => return Err(err.into()),
		}
	}

	emit_encoded(&SessionCheck { session_valid: true }, codec::encode_session_check)
}

async fn live_check(
	ctx: &WorkerContext,
	browser: &BrowserSession,
	session: &mut Session,
	sessions: &SessionStore,
) -> Result<bool, ScrapeError> {
	let page = browser.new_page().await?;
	browser.restore_session(&page, session).await?;

	let dash = DashboardPage::new(page);
	let valid = sessions.validate_live(&dash, &ctx.config.usage_url).await?;
	if valid {
		session.mark_validated();
		sessions.save(session)?;
	}
	Ok(valid)
}
