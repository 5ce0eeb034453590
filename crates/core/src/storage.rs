//! Timestamped record persistence for poll outcomes.
//!
//! One file per run, filename-ordered by collection time, written
//! atomically so an abandoned cycle can never leave a torn record.

use std::path::{Path, PathBuf};

use capwatch_protocol::PersistedRecord;
use tracing::{debug, warn};

use crate::error::ScrapeError;

const RECORD_PREFIX: &str = "usage_";

/// Appends run records to a directory, pruning the oldest beyond a
/// cap. The default cap keeps one week of five-minute polls.
#[derive(Debug, Clone)]
pub struct RecordStore {
	dir: PathBuf,
	max_records: usize,
}

impl RecordStore {
	pub const DEFAULT_MAX_RECORDS: usize = 2016;

	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self {
			dir: dir.into(),
			max_records: Self::DEFAULT_MAX_RECORDS,
		}
	}

	pub fn with_max_records(mut self, max_records: usize) -> Self {
		self.max_records = max_records.max(1);
		self
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Writes one record atomically and prunes old ones. Returns the
	/// path written.
	pub fn append(&self, record: &PersistedRecord) -> Result<PathBuf, ScrapeError> {
		std::fs::create_dir_all(&self.dir)?;

		let name = format!(
			"{RECORD_PREFIX}{}.json",
			record.collected_at.format("%Y%m%dT%H%M%S%3fZ")
		);
		let path = self.dir.join(&name);
		let tmp = self.dir.join(format!("{name}.tmp"));

		let json = serde_json::to_string_pretty(record)
			.map_err(|e| ScrapeError::Fatal(format!("failed to serialize record: {e}")))?;
		std::fs::write(&tmp, json)?;
		std::fs::rename(&tmp, &path)?;
		debug!(target = "capwatch.storage", path = %path.display(), "record persisted");

		self.prune()?;
		Ok(path)
	}

	/// Record paths in collection order (filenames sort by timestamp).
	pub fn list(&self) -> Result<Vec<PathBuf>, ScrapeError> {
		let mut records = Vec::new();
		let entries = match std::fs::read_dir(&self.dir) {
			Ok(entries) => entries,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(records),
			Err(err) => return Err(err.into()),
		};
		for entry in entries {
			let path = entry?.path();
			let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
				continue;
			};
			if name.starts_with(RECORD_PREFIX) && name.ends_with(".json") {
				records.push(path);
			}
		}
		records.sort();
		Ok(records)
	}

	fn prune(&self) -> Result<(), ScrapeError> {
		let records = self.list()?;
		if records.len() <= self.max_records {
			return Ok(());
		}
		let excess = records.len() - self.max_records;
		for stale in &records[..excess] {
			if let Err(err) = std::fs::remove_file(stale) {
				warn!(target = "capwatch.storage", path = %stale.display(), error = %err, "failed to prune record");
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use capwatch_protocol::{ErrorCode, ErrorRecord, PersistedRecord};
	use tempfile::TempDir;

	use super::*;

	fn record() -> PersistedRecord {
		PersistedRecord::new(ErrorRecord::new(ErrorCode::Timeout, "slow page"))
	}

	#[test]
	fn append_writes_one_parseable_record() {
		let tmp = TempDir::new().unwrap();
		let store = RecordStore::new(tmp.path());
		let path = store.append(&record()).unwrap();

		assert!(path.exists());
		let content = std::fs::read_to_string(&path).unwrap();
		let back: PersistedRecord = serde_json::from_str(&content).unwrap();
		match back.payload {
			capwatch_protocol::RunPayload::Error(err) => assert_eq!(err.error_code, ErrorCode::Timeout),
			other => panic!("expected error payload, got {other:?}"),
		}
		// No leftover temp file after the atomic rename.
		assert_eq!(store.list().unwrap().len(), 1);
	}

	#[test]
	fn records_are_filename_ordered_and_pruned() {
		let tmp = TempDir::new().unwrap();
		let store = RecordStore::new(tmp.path()).with_max_records(3);

		for i in 0..5 {
			let mut rec = record();
			rec.collected_at = chrono::Utc::now() + chrono::Duration::milliseconds(i * 10);
			store.append(&rec).unwrap();
		}

		let records = store.list().unwrap();
		assert_eq!(records.len(), 3);
		let names: Vec<_> = records
			.iter()
			.map(|p| p.file_name().unwrap().to_string_lossy().to_string())
			.collect();
		let mut sorted = names.clone();
		sorted.sort();
		assert_eq!(names, sorted);
	}

	#[test]
	fn listing_a_missing_dir_is_empty() {
		let tmp = TempDir::new().unwrap();
		let store = RecordStore::new(tmp.path().join("nope"));
		assert!(store.list().unwrap().is_empty());
	}
}
