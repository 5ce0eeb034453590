//! Worker configuration, read from `config.json` in the data dir.
//!
//! Every field has a default, so a missing file is a fully working
//! setup; a present-but-unparseable file is an error rather than a
//! silent fallback.

use std::path::{Path, PathBuf};

use capwatch_core::{RecordStore, RetryPolicy};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub usage_url: String,
	pub login_url: String,
	pub interval_minutes: u64,
	pub navigation_timeout_secs: u64,
	pub retry: RetryPolicy,
	/// Retry transient failures inside a run. When false, a run is a
	/// single attempt and recovery is left to the polling cadence.
	pub retry_within_run: bool,
	pub max_records: usize,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			usage_url: "https://claude.ai/settings/usage".to_string(),
			login_url: "https://claude.ai/login".to_string(),
			interval_minutes: 5,
			navigation_timeout_secs: 30,
			retry: RetryPolicy::default(),
			retry_within_run: true,
			max_records: RecordStore::DEFAULT_MAX_RECORDS,
		}
	}
}

impl Config {
	pub fn load(data_dir: &Path) -> anyhow::Result<Self> {
		let path = data_dir.join("config.json");
		if !path.exists() {
			debug!(target = "capwatch.config", "no config file; using defaults");
			return Ok(Self::default());
		}
		let content = std::fs::read_to_string(&path)?;
		let config = serde_json::from_str(&content)
			.map_err(|e| anyhow::anyhow!("config file {} is invalid: {e}", path.display()))?;
		Ok(config)
	}
}

/// Resolves the data directory: explicit flag, then the platform data
/// dir, then a dotdir in the working directory.
pub fn resolve_data_dir(flag: Option<PathBuf>) -> PathBuf {
	if let Some(dir) = flag {
		return dir;
	}
	dirs::data_dir()
		.map(|d| d.join("capwatch"))
		.unwrap_or_else(|| PathBuf::from(".capwatch"))
}
