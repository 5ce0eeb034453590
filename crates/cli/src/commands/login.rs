//! `login`: headed browser flow for manual authentication.
//!
//! The human does the actual logging in; this command just opens the
//! page, waits for the URL to leave the login route, and persists the
//! resulting cookie jar. Any failure here exits 3.

use std::time::Duration;

use capwatch_core::{PageContext, ScrapeError, Session};
use capwatch_protocol::{codec, LoginOutcome};
use tracing::info;

use crate::browser::{BrowserSession, DashboardPage};
use crate::commands::{emit_encoded, CliFailure, WorkerContext};

/// How long the human gets to complete the login.
const LOGIN_WAIT: Duration = Duration::from_secs(300);
const POLL_STEP: Duration = Duration::from_secs(2);

pub async fn run(ctx: &WorkerContext) -> Result<(), CliFailure> {
	let browser = BrowserSession::launch(&ctx.profile_dir(), false)
		.await
		.map_err(|e| CliFailure::from(e).as_login_failure())?;

	let outcome = attended_login(ctx, &browser).await;
	browser.close().await;
	outcome.map_err(|e| CliFailure::from(e).as_login_failure())?;

	emit_encoded(&LoginOutcome::success(), codec::encode_login)
}

async fn attended_login(ctx: &WorkerContext, browser: &BrowserSession) -> Result<(), ScrapeError> {
	let page = browser.new_page().await?;
	let dash = DashboardPage::new(page.clone());
	dash.navigate(&ctx.config.login_url).await?;

	eprintln!("Complete the login in the opened browser window.");
	info!(target = "capwatch.login", url = %ctx.config.login_url, "waiting for manual login");

	let deadline = tokio::time::Instant::now() + LOGIN_WAIT;
	loop {
		tokio::time::sleep(POLL_STEP).await;
		let url = dash.current_url().await?;
		if !url.is_empty() && !url.contains("/login") {
			break;
		}
		if tokio::time::Instant::now() >= deadline {
			return Err(ScrapeError::Timeout {
				operation: "manual login".to_string(),
				seconds: LOGIN_WAIT.as_secs(),
			});
		}
	}

	let cookies = browser.export_cookies(&page).await?;
	let mut session = Session::new(cookies);
	if session.cookie_count() == 0 {
		return Err(ScrapeError::Fatal("login finished but no cookies were captured".to_string()));
	}
	session.mark_validated();
	ctx.session_store().save(&session)?;
	info!(target = "capwatch.login", cookies = session.cookie_count(), "session persisted");
	Ok(())
}
