//! Persisted authentication session for the dashboard.
//!
//! The session file holds the cookie bundle exported after a manual
//! login. It is the one secret-bearing artifact in the system: it is
//! never logged, never serialized into diagnostics, and its Debug
//! output is redacted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ScrapeError;
use crate::extract::is_challenge_page;
use crate::page::PageContext;

pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Opaque credential bundle plus bookkeeping timestamps.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
	pub schema_version: u32,
	/// Cookie set exported from the browser. Opaque to the core.
	pub cookies: serde_json::Value,
	pub saved_at: DateTime<Utc>,
	#[serde(default)]
	pub last_validated_at: Option<DateTime<Utc>>,
}

impl Session {
	pub fn new(cookies: serde_json::Value) -> Self {
		Self {
			schema_version: SESSION_SCHEMA_VERSION,
			cookies,
			saved_at: Utc::now(),
			last_validated_at: None,
		}
	}

	/// Number of cookies in the bundle; zero means no credentials.
	pub fn cookie_count(&self) -> usize {
		self.cookies.as_array().map(Vec::len).unwrap_or(0)
	}

	pub fn mark_validated(&mut self) {
		self.last_validated_at = Some(Utc::now());
	}
}

// Redacted by hand: the cookie bundle must never reach logs or
// diagnostics payloads.
impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("schema_version", &self.schema_version)
			.field("cookies", &format!("<redacted; {} entries>", self.cookie_count()))
			.field("saved_at", &self.saved_at)
			.field("last_validated_at", &self.last_validated_at)
			.finish()
	}
}

/// Loads, saves and validates the persisted session.
#[derive(Debug, Clone)]
pub struct SessionStore {
	path: PathBuf,
}

impl SessionStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Loads the persisted session. Missing or unreadable files are
	/// `None`, not errors: an absent session is a normal state.
	pub fn load(&self) -> Option<Session> {
		let content = std::fs::read_to_string(&self.path).ok()?;
		match serde_json::from_str::<Session>(&content) {
			Ok(session) => Some(session),
			Err(err) => {
				warn!(target = "capwatch.session", error = %err, "session file unparseable; treating as absent");
				None
			}
		}
	}

	/// Persists the session atomically (temp file + rename).
	pub fn save(&self, session: &Session) -> Result<(), ScrapeError> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let tmp = self.path.with_extension("json.tmp");
		let json = serde_json::to_string_pretty(session)
			.map_err(|e| ScrapeError::Fatal(format!("failed to serialize session: {e}")))?;
		std::fs::write(&tmp, json)?;
		std::fs::rename(&tmp, &self.path)?;
		debug!(target = "capwatch.session", path = %self.path.display(), "session saved");
		Ok(())
	}

	/// Removes the session file if present.
	pub fn clear(&self) -> Result<bool, ScrapeError> {
		match std::fs::remove_file(&self.path) {
			Ok(()) => Ok(true),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
			Err(err) => Err(err.into()),
		}
	}

	/// Structural sanity check only: file present, parseable, schema
	/// version known, nonempty cookie set. Performs no browser or
	/// network activity - this is the cheap path behind
	/// `check-session` without `--verify`.
	pub fn validate_local(&self) -> bool {
		match self.load() {
			Some(session) => {
				session.schema_version == SESSION_SCHEMA_VERSION && session.cookie_count() > 0
			}
			None => false,
		}
	}

	/// Live validation: loads the usage page and checks that the
	/// server still accepts the session. Only runs when explicitly
	/// requested - it is a full navigation.
	pub async fn validate_live(&self, page: &dyn PageContext, usage_url: &str) -> Result<bool, ScrapeError> {
		page.navigate(usage_url).await?;

		let url = page.current_url().await?;
		if url.contains("/login") {
			return Ok(false);
		}

		let html = page.content().await?;
		if is_challenge_page(&html) {
			return Err(ScrapeError::ChallengeDetected);
		}
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use tempfile::TempDir;

	use super::*;

	fn cookie_bundle() -> serde_json::Value {
		json!([
			{ "name": "sessionKey", "value": "sk-secret-value", "domain": ".dash.example" },
			{ "name": "cf_clearance", "value": "tok", "domain": ".dash.example" }
		])
	}

	#[test]
	fn save_load_round_trip() {
		let tmp = TempDir::new().unwrap();
		let store = SessionStore::new(tmp.path().join("session.json"));
		store.save(&Session::new(cookie_bundle())).unwrap();

		let loaded = store.load().unwrap();
		assert_eq!(loaded.cookie_count(), 2);
		assert!(store.validate_local());
	}

	#[test]
	fn absent_file_is_locally_invalid() {
		let tmp = TempDir::new().unwrap();
		let store = SessionStore::new(tmp.path().join("session.json"));
		assert!(store.load().is_none());
		assert!(!store.validate_local());
	}

	#[test]
	fn empty_cookie_bundle_is_locally_invalid() {
		let tmp = TempDir::new().unwrap();
		let store = SessionStore::new(tmp.path().join("session.json"));
		store.save(&Session::new(json!([]))).unwrap();
		assert!(!store.validate_local());
	}

	#[test]
	fn corrupt_file_is_treated_as_absent() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("session.json");
		std::fs::write(&path, "{ not json").unwrap();
		let store = SessionStore::new(&path);
		assert!(store.load().is_none());
		assert!(!store.validate_local());
	}

	#[test]
	fn debug_output_never_contains_cookie_values() {
		let session = Session::new(cookie_bundle());
		let debugged = format!("{session:?}");
		assert!(!debugged.contains("sk-secret-value"));
		assert!(debugged.contains("redacted"));
	}

	#[test]
	fn clear_removes_the_file() {
		let tmp = TempDir::new().unwrap();
		let store = SessionStore::new(tmp.path().join("session.json"));
		store.save(&Session::new(cookie_bundle())).unwrap();
		assert!(store.clear().unwrap());
		assert!(!store.clear().unwrap());
	}
}
