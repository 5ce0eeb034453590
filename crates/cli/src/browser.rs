//! chromiumoxide-backed page driving.
//!
//! Each run owns its browser: the handle is launched for the run,
//! handed to the pipeline as a [`PageContext`], and torn down on every
//! exit path. No browser state is shared between runs except the
//! on-disk profile directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use capwatch_core::{PageContext, PageProvider, ScrapeError, Session, SessionStore};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Flags that keep the dashboard from flagging the run as automation
/// and keep headless Chrome stable in constrained environments.
const LAUNCH_ARGS: [&str; 5] = [
	"--disable-blink-features=AutomationControlled",
	"--disable-gpu",
	"--no-sandbox",
	"--disable-dev-shm-usage",
	"--window-size=1280,900",
];

fn fatal(context: &str, err: impl std::fmt::Display) -> ScrapeError {
	ScrapeError::Fatal(format!("{context}: {err}"))
}

/// A launched browser plus its CDP event pump.
pub struct BrowserSession {
	browser: Browser,
	handler: JoinHandle<()>,
}

impl BrowserSession {
	/// Launches Chrome against the persistent profile. Headless for
	/// unattended polling, headed for the manual login flow.
	pub async fn launch(profile_dir: &Path, headless: bool) -> Result<Self, ScrapeError> {
		std::fs::create_dir_all(profile_dir)?;

		let mut builder = BrowserConfig::builder()
			.user_data_dir(profile_dir)
			.args(LAUNCH_ARGS.to_vec());
		if headless {
			builder = builder.new_headless_mode();
		} else {
			builder = builder.with_head();
		}
		let config = builder
			.build()
			.map_err(|e| ScrapeError::Fatal(format!("browser configuration rejected: {e}")))?;

		let (browser, mut handler) = Browser::launch(config)
			.await
			.map_err(|e| fatal("failed to launch browser", e))?;
		let handler = tokio::spawn(async move {
			while let Some(event) = handler.next().await {
				if event.is_err() {
					break;
				}
			}
		});
		debug!(target = "capwatch.browser", headless, "browser launched");
		Ok(Self { browser, handler })
	}

	pub async fn new_page(&self) -> Result<Page, ScrapeError> {
		self.browser
			.new_page("about:blank")
			.await
			.map_err(|e| fatal("failed to open page", e))
	}

	/// Installs the saved cookie bundle into the page.
	pub async fn restore_session(&self, page: &Page, session: &Session) -> Result<(), ScrapeError> {
		let cookies: Vec<CookieParam> = serde_json::from_value(session.cookies.clone())
			.map_err(|e| ScrapeError::Fatal(format!("saved cookie bundle is unusable: {e}")))?;
		if cookies.is_empty() {
			return Err(ScrapeError::SessionRequired);
		}
		page.set_cookies(cookies)
			.await
			.map_err(|e| fatal("failed to restore cookies", e))?;
		Ok(())
	}

	/// Exports the page's cookie jar as an opaque bundle for the
	/// session store.
	pub async fn export_cookies(&self, page: &Page) -> Result<serde_json::Value, ScrapeError> {
		let cookies = page
			.get_cookies()
			.await
			.map_err(|e| fatal("failed to read cookies", e))?;
		serde_json::to_value(cookies).map_err(|e| fatal("failed to serialize cookies", e))
	}

	/// Orderly teardown. Errors are logged, not propagated: by this
	/// point the run's outcome is already decided.
	pub async fn close(mut self) {
		if let Err(err) = self.browser.close().await {
			warn!(target = "capwatch.browser", error = %err, "browser close failed");
		}
		if let Err(err) = self.browser.wait().await {
			warn!(target = "capwatch.browser", error = %err, "browser did not exit cleanly");
		}
		self.handler.abort();
	}

	fn close_detached(self) {
		tokio::spawn(self.close());
	}
}

/// [`PageContext`] over a live chromiumoxide page. When constructed
/// with [`DashboardPage::owning`], dropping it tears the browser down.
pub struct DashboardPage {
	page: Page,
	owner: Option<BrowserSession>,
}

impl DashboardPage {
	pub fn new(page: Page) -> Self {
		Self { page, owner: None }
	}

	pub fn owning(page: Page, browser: BrowserSession) -> Self {
		Self { page, owner: Some(browser) }
	}
}

impl Drop for DashboardPage {
	fn drop(&mut self) {
		if let Some(owner) = self.owner.take() {
			owner.close_detached();
		}
	}
}

#[async_trait]
impl PageContext for DashboardPage {
	async fn current_url(&self) -> Result<String, ScrapeError> {
		let url = self
			.page
			.url()
			.await
			.map_err(|e| fatal("failed to read page url", e))?;
		Ok(url.unwrap_or_default())
	}

	async fn navigate(&self, url: &str) -> Result<(), ScrapeError> {
		self.page.goto(url).await.map_err(|e| ScrapeError::Navigation {
			url: url.to_string(),
			message: e.to_string(),
		})?;
		self.page
			.wait_for_navigation()
			.await
			.map_err(|e| ScrapeError::Navigation {
				url: url.to_string(),
				message: format!("load did not settle: {e}"),
			})?;
		Ok(())
	}

	async fn content(&self) -> Result<String, ScrapeError> {
		self.page
			.content()
			.await
			.map_err(|e| fatal("failed to read page content", e))
	}

	async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ScrapeError> {
		let result = self
			.page
			.evaluate(script)
			.await
			.map_err(|e| fatal("script evaluation failed", e))?;
		result
			.into_value()
			.map_err(|e| fatal("script returned an unusable value", e))
	}
}

/// Launches a fresh headless browser per scheduler run and restores
/// the saved session into it.
pub struct HeadlessProvider {
	profile_dir: PathBuf,
	sessions: SessionStore,
}

impl HeadlessProvider {
	pub fn new(profile_dir: impl Into<PathBuf>, sessions: SessionStore) -> Self {
		Self { profile_dir: profile_dir.into(), sessions }
	}
}

#[async_trait]
impl PageProvider for HeadlessProvider {
	async fn acquire(&self) -> Result<Box<dyn PageContext>, ScrapeError> {
		let Some(session) = self.sessions.load() else {
			return Err(ScrapeError::SessionRequired);
		};

		let browser = BrowserSession::launch(&self.profile_dir, true).await?;
		let page = match browser.new_page().await {
			Ok(page) => page,
			Err(err) => {
				browser.close().await;
				return Err(err);
			}
		};
		if let Err(err) = browser.restore_session(&page, &session).await {
			browser.close().await;
			return Err(err);
		}
		Ok(Box::new(DashboardPage::owning(page, browser)))
	}
}
