use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standardized error codes for programmatic handling across the
/// process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
	SessionRequired,
	NavigationFailed,
	SessionExpired,
	ExtractionFailed,
	CloudflareDetected,
	Timeout,
	Fatal,
}

impl ErrorCode {
	/// Whether a worker-internal retry may resolve this failure.
	/// Challenge pages and dead sessions never clear on their own, and
	/// retrying against them raises trigger risk.
	pub fn is_retryable(self) -> bool {
		matches!(self, ErrorCode::NavigationFailed | ErrorCode::ExtractionFailed | ErrorCode::Timeout)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			ErrorCode::SessionRequired => "session_required",
			ErrorCode::NavigationFailed => "navigation_failed",
			ErrorCode::SessionExpired => "session_expired",
			ErrorCode::ExtractionFailed => "extraction_failed",
			ErrorCode::CloudflareDetected => "cloudflare_detected",
			ErrorCode::Timeout => "timeout",
			ErrorCode::Fatal => "fatal",
		}
	}
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for ErrorCode {
	type Err = UnknownErrorCode;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"session_required" => Ok(ErrorCode::SessionRequired),
			"navigation_failed" => Ok(ErrorCode::NavigationFailed),
			"session_expired" => Ok(ErrorCode::SessionExpired),
			"extraction_failed" => Ok(ErrorCode::ExtractionFailed),
			"cloudflare_detected" => Ok(ErrorCode::CloudflareDetected),
			"timeout" => Ok(ErrorCode::Timeout),
			"fatal" => Ok(ErrorCode::Fatal),
			other => Err(UnknownErrorCode(other.to_string())),
		}
	}
}

/// An `error_code` string that is not part of the protocol.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown error_code: {0}")]
pub struct UnknownErrorCode(pub String);

/// The single machine-readable failure envelope a worker writes to
/// stderr. Diagnostics carry attempt history and strategy traces but
/// must never contain session secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
	pub error_code: ErrorCode,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<String>,
	pub timestamp: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub attempts: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub diagnostics: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ErrorRecord {
	pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			error_code,
			message: message.into(),
			details: None,
			timestamp: Utc::now(),
			attempts: None,
			diagnostics: None,
		}
	}

	pub fn with_details(mut self, details: impl Into<String>) -> Self {
		self.details = Some(details.into());
		self
	}

	pub fn with_attempts(mut self, attempts: u32) -> Self {
		self.attempts = Some(attempts);
		self
	}

	pub fn with_diagnostics(mut self, diagnostics: serde_json::Map<String, serde_json::Value>) -> Self {
		self.diagnostics = Some(diagnostics);
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_code_round_trips_through_strings() {
		for code in [
			ErrorCode::SessionRequired,
			ErrorCode::NavigationFailed,
			ErrorCode::SessionExpired,
			ErrorCode::ExtractionFailed,
			ErrorCode::CloudflareDetected,
			ErrorCode::Timeout,
			ErrorCode::Fatal,
		] {
			let parsed: ErrorCode = code.as_str().parse().unwrap();
			assert_eq!(parsed, code);
		}
		assert!("not_a_code".parse::<ErrorCode>().is_err());
	}

	#[test]
	fn terminal_codes_are_not_retryable() {
		assert!(!ErrorCode::CloudflareDetected.is_retryable());
		assert!(!ErrorCode::SessionRequired.is_retryable());
		assert!(!ErrorCode::SessionExpired.is_retryable());
		assert!(!ErrorCode::Fatal.is_retryable());
		assert!(ErrorCode::NavigationFailed.is_retryable());
		assert!(ErrorCode::Timeout.is_retryable());
	}
}
