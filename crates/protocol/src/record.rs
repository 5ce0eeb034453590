use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error_record::ErrorRecord;
use crate::snapshot::UsageSnapshot;

/// Outcome of one pipeline run. Exactly one snapshot or one error
/// record is produced per run - never both, never neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunPayload {
	Snapshot(UsageSnapshot),
	Error(ErrorRecord),
}

impl From<UsageSnapshot> for RunPayload {
	fn from(snapshot: UsageSnapshot) -> Self {
		RunPayload::Snapshot(snapshot)
	}
}

impl From<ErrorRecord> for RunPayload {
	fn from(record: ErrorRecord) -> Self {
		RunPayload::Error(record)
	}
}

/// Shape handed to the storage collaborator: one timestamped record
/// per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRecord {
	pub payload: RunPayload,
	pub collected_at: DateTime<Utc>,
}

impl PersistedRecord {
	pub fn new(payload: impl Into<RunPayload>) -> Self {
		Self {
			payload: payload.into(),
			collected_at: Utc::now(),
		}
	}
}
