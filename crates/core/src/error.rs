use capwatch_protocol::{ErrorCode, ErrorRecord, Strategy};

/// Failure raised by a pipeline operation.
///
/// Every variant maps onto exactly one wire [`ErrorCode`]; the code's
/// retryable/terminal classification drives the retry loop.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
	#[error("no saved session; manual login required")]
	SessionRequired,

	#[error("session rejected by the server; re-login required")]
	SessionExpired,

	#[error("navigation to {url} failed: {message}")]
	Navigation { url: String, message: String },

	#[error("{operation} timed out after {seconds}s")]
	Timeout { operation: String, seconds: u64 },

	#[error("challenge page served instead of dashboard content")]
	ChallengeDetected,

	#[error("no extraction strategy produced components (tried: {})", format_strategies(tried))]
	Extraction { tried: Vec<Strategy> },

	#[error("io failure: {0}")]
	Io(#[from] std::io::Error),

	#[error("{0}")]
	Fatal(String),
}

fn format_strategies(tried: &[Strategy]) -> String {
	tried.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
}

impl ScrapeError {
	/// The wire error code for this failure.
	pub fn code(&self) -> ErrorCode {
		match self {
			ScrapeError::SessionRequired => ErrorCode::SessionRequired,
			ScrapeError::SessionExpired => ErrorCode::SessionExpired,
			ScrapeError::Navigation { .. } => ErrorCode::NavigationFailed,
			ScrapeError::Timeout { .. } => ErrorCode::Timeout,
			ScrapeError::ChallengeDetected => ErrorCode::CloudflareDetected,
			ScrapeError::Extraction { .. } => ErrorCode::ExtractionFailed,
			ScrapeError::Io(_) | ScrapeError::Fatal(_) => ErrorCode::Fatal,
		}
	}

	/// Terminal failures stop the retry loop on the first attempt.
	pub fn is_terminal(&self) -> bool {
		!self.code().is_retryable()
	}

	/// Converts into the wire envelope. Attempt history is attached by
	/// the retry loop; this carries only the failure itself.
	pub fn to_record(&self) -> ErrorRecord {
		let mut record = ErrorRecord::new(self.code(), self.to_string());
		if let ScrapeError::Extraction { tried } = self {
			let mut diagnostics = serde_json::Map::new();
			diagnostics.insert(
				"strategies_tried".to_string(),
				serde_json::Value::Array(
					tried.iter().map(|s| serde_json::Value::String(s.to_string())).collect(),
				),
			);
			record = record.with_diagnostics(diagnostics);
		}
		record
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn codes_map_one_to_one() {
		assert_eq!(ScrapeError::SessionRequired.code(), ErrorCode::SessionRequired);
		assert_eq!(ScrapeError::ChallengeDetected.code(), ErrorCode::CloudflareDetected);
		assert_eq!(
			ScrapeError::Navigation { url: "u".into(), message: "m".into() }.code(),
			ErrorCode::NavigationFailed
		);
		assert_eq!(ScrapeError::Fatal("x".into()).code(), ErrorCode::Fatal);
	}

	#[test]
	fn extraction_failure_lists_tried_strategies() {
		let err = ScrapeError::Extraction { tried: vec![Strategy::Js, Strategy::Dom, Strategy::PlainText] };
		let record = err.to_record();
		let diagnostics = record.diagnostics.unwrap();
		let tried = diagnostics["strategies_tried"].as_array().unwrap();
		assert_eq!(tried.len(), 3);
		assert_eq!(tried[0], "js");
	}
}
