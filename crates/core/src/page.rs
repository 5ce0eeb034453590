//! Browser-session abstraction supplied by the embedding binary.
//!
//! The core never talks to a browser directly; it drives whatever
//! implements [`PageContext`]. The active run exclusively owns the
//! page handle for its duration and releases it on every exit path.

use async_trait::async_trait;

use crate::error::ScrapeError;

/// A live page the extraction chain can interrogate.
#[async_trait]
pub trait PageContext: Send + Sync {
	/// URL the page currently shows, after any redirects.
	async fn current_url(&self) -> Result<String, ScrapeError>;

	/// Navigates to `url` and waits for the load to settle.
	async fn navigate(&self, url: &str) -> Result<(), ScrapeError>;

	/// Full HTML of the current document.
	async fn content(&self) -> Result<String, ScrapeError>;

	/// Evaluates a JS expression, returning its JSON value.
	async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ScrapeError>;
}

/// Hands the scheduler a fresh page for each run.
///
/// Acquisition covers browser/page startup; failures surface as
/// ordinary pipeline errors so a crashed browser becomes a persisted
/// record, not a panic.
#[async_trait]
pub trait PageProvider: Send + Sync {
	async fn acquire(&self) -> Result<Box<dyn PageContext>, ScrapeError>;
}
