//! Worker entry points and the exit-code contract.
//!
//! Every command ends in exactly one of two shapes: a single JSON
//! object on stdout and exit 0, or a single JSON error record as the
//! last stderr line and a nonzero exit. Codes: 2 for an invalid or
//! expired session, 3 for a failed login, 4 for everything else.

pub mod check_session;
pub mod login;
pub mod poll_once;
pub mod watch;

use std::path::PathBuf;
use std::time::Duration;

use capwatch_core::{ExtractionEngine, RecordStore, ScrapeError, SessionStore};
use capwatch_protocol::{codec, ErrorCode, ErrorRecord};

use crate::config::{self, Config};

pub const EXIT_SESSION_INVALID: i32 = 2;
pub const EXIT_LOGIN_FAILED: i32 = 3;
pub const EXIT_FATAL: i32 = 4;

/// A terminal command failure: the record to emit and the code to
/// exit with.
#[derive(Debug)]
pub struct CliFailure {
	pub record: ErrorRecord,
	pub exit_code: i32,
}

impl CliFailure {
	pub fn fatal(message: impl Into<String>) -> Self {
		Self {
			record: ErrorRecord::new(ErrorCode::Fatal, message),
			exit_code: EXIT_FATAL,
		}
	}

	/// Reclassifies the failure for the login flow, where any failure
	/// exits 3 regardless of the underlying error code.
	pub fn as_login_failure(mut self) -> Self {
		self.exit_code = EXIT_LOGIN_FAILED;
		self
	}
}

pub fn exit_code_for(code: ErrorCode) -> i32 {
	match code {
		ErrorCode::SessionRequired | ErrorCode::SessionExpired => EXIT_SESSION_INVALID,
		_ => EXIT_FATAL,
	}
}

impl From<ScrapeError> for CliFailure {
	fn from(err: ScrapeError) -> Self {
		let record = err.to_record();
		let exit_code = exit_code_for(record.error_code);
		Self { record, exit_code }
	}
}

impl From<ErrorRecord> for CliFailure {
	fn from(record: ErrorRecord) -> Self {
		let exit_code = exit_code_for(record.error_code);
		Self { record, exit_code }
	}
}

/// Resolved paths and configuration shared by all commands.
pub struct WorkerContext {
	pub data_dir: PathBuf,
	pub config: Config,
}

impl WorkerContext {
	pub fn resolve(data_dir_flag: Option<PathBuf>) -> Result<Self, CliFailure> {
		let data_dir = config::resolve_data_dir(data_dir_flag);
		let config = Config::load(&data_dir).map_err(|e| CliFailure::fatal(e.to_string()))?;
		Ok(Self { data_dir, config })
	}

	pub fn session_store(&self) -> SessionStore {
		SessionStore::new(self.data_dir.join("session.json"))
	}

	pub fn record_store(&self) -> RecordStore {
		RecordStore::new(self.data_dir.join("usage_data")).with_max_records(self.config.max_records)
	}

	pub fn profile_dir(&self) -> PathBuf {
		self.data_dir.join("browser-profile")
	}

	pub fn engine(&self) -> ExtractionEngine {
		ExtractionEngine::new(
			&self.config.usage_url,
			Duration::from_secs(self.config.navigation_timeout_secs),
		)
	}
}

/// Prints the success envelope as the only stdout content.
pub fn emit_stdout(bytes: Vec<u8>) -> Result<(), CliFailure> {
	let line = String::from_utf8(bytes)
		.map_err(|e| CliFailure::fatal(format!("envelope is not valid UTF-8: {e}")))?;
	println!("{line}");
	Ok(())
}

/// Encodes and prints a success envelope.
pub fn emit_encoded<T>(
	value: &T,
	encode: fn(&T) -> Result<Vec<u8>, codec::CodecError>,
) -> Result<(), CliFailure> {
	let bytes = encode(value).map_err(|e| CliFailure::fatal(format!("failed to encode envelope: {e}")))?;
	emit_stdout(bytes)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn session_errors_exit_two_and_the_rest_exit_four() {
		assert_eq!(exit_code_for(ErrorCode::SessionRequired), 2);
		assert_eq!(exit_code_for(ErrorCode::SessionExpired), 2);
		assert_eq!(exit_code_for(ErrorCode::CloudflareDetected), 4);
		assert_eq!(exit_code_for(ErrorCode::Timeout), 4);
		assert_eq!(exit_code_for(ErrorCode::ExtractionFailed), 4);
		assert_eq!(exit_code_for(ErrorCode::Fatal), 4);
	}

	#[test]
	fn login_reclassification_keeps_the_record() {
		let failure = CliFailure::from(ScrapeError::Timeout {
			operation: "login wait".to_string(),
			seconds: 300,
		})
		.as_login_failure();
		assert_eq!(failure.exit_code, EXIT_LOGIN_FAILED);
		assert_eq!(failure.record.error_code, ErrorCode::Timeout);
	}
}
