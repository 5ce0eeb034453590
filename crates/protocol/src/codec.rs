//! Encoding and decoding of the single-object protocol envelopes.
//!
//! A worker's entire machine-readable output for one invocation is one
//! self-contained JSON object on stdout (success) or stderr (failure).
//! Decoding distinguishes two failure levels: `JsonParse` when the
//! bytes are not valid JSON at all, and `Protocol` when the JSON is
//! well-formed but violates the schema.

use serde::Serialize;
use serde_json::Value;

use crate::error_record::ErrorRecord;
use crate::snapshot::{LoginOutcome, SessionCheck, UsageSnapshot};

/// Decoding failure classification.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
	/// The bytes were not structured data at all.
	#[error("invalid JSON: {0}")]
	JsonParse(#[from] serde_json::Error),
	/// Well-formed JSON that does not match the protocol schema.
	#[error("protocol violation: {0}")]
	Protocol(String),
}

/// A decoded protocol envelope.
#[derive(Debug, Clone)]
pub enum Decoded {
	Snapshot(UsageSnapshot),
	Error(ErrorRecord),
	SessionCheck(SessionCheck),
	Login(LoginOutcome),
}

/// Serializes a snapshot as the stdout envelope for `poll-once`.
pub fn encode_snapshot(snapshot: &UsageSnapshot) -> Result<Vec<u8>, CodecError> {
	encode(snapshot)
}

/// Serializes an error record as the stderr envelope.
pub fn encode_error(record: &ErrorRecord) -> Result<Vec<u8>, CodecError> {
	encode(record)
}

/// Serializes the stdout envelope for `check-session`.
pub fn encode_session_check(check: &SessionCheck) -> Result<Vec<u8>, CodecError> {
	encode(check)
}

/// Serializes the stdout envelope for `login`.
pub fn encode_login(outcome: &LoginOutcome) -> Result<Vec<u8>, CodecError> {
	encode(outcome)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
	Ok(serde_json::to_vec(value)?)
}

/// Decodes one protocol envelope.
///
/// The document must be a single object carrying exactly one of the
/// known shapes; a document mixing a snapshot and an error, or carrying
/// an unknown `error_code`, is a `Protocol` error rather than a parse
/// error.
pub fn decode(bytes: &[u8]) -> Result<Decoded, CodecError> {
	let value: Value = serde_json::from_slice(bytes)?;
	decode_value(value)
}

/// Decodes an already-parsed JSON document.
pub fn decode_value(value: Value) -> Result<Decoded, CodecError> {
	let Value::Object(ref map) = value else {
		return Err(CodecError::Protocol("envelope must be a single JSON object".to_string()));
	};

	let has_error = map.contains_key("error_code");
	let has_snapshot = map.contains_key("components") || map.contains_key("strategy_used");

	if has_error && has_snapshot {
		return Err(CodecError::Protocol(
			"envelope mixes snapshot and error fields in one document".to_string(),
		));
	}

	if has_error {
		// Unknown error_code strings fail field deserialization; that is
		// a schema violation, not a parse failure.
		let record: ErrorRecord = serde_json::from_value(value)
			.map_err(|e| CodecError::Protocol(format!("malformed error record: {e}")))?;
		return Ok(Decoded::Error(record));
	}

	if has_snapshot {
		let mut snapshot: UsageSnapshot = serde_json::from_value(value)
			.map_err(|e| CodecError::Protocol(format!("malformed usage snapshot: {e}")))?;
		// Derive-based deserialization bypasses the constructors, so
		// the invariants they enforce get checked here: the component
		// count must be consistent, and percentages stay in 0..=100.
		if snapshot.found_components != snapshot.components.len() {
			return Err(CodecError::Protocol(format!(
				"found_components is {} but the document carries {} components",
				snapshot.found_components,
				snapshot.components.len()
			)));
		}
		for component in &mut snapshot.components {
			component.percentage = component.percentage.clamp(0.0, 100.0);
		}
		return Ok(Decoded::Snapshot(snapshot));
	}

	if map.contains_key("session_valid") {
		let check: SessionCheck = serde_json::from_value(value)
			.map_err(|e| CodecError::Protocol(format!("malformed session check: {e}")))?;
		return Ok(Decoded::SessionCheck(check));
	}

	if map.contains_key("login") {
		let outcome: LoginOutcome = serde_json::from_value(value)
			.map_err(|e| CodecError::Protocol(format!("malformed login outcome: {e}")))?;
		return Ok(Decoded::Login(outcome));
	}

	Err(CodecError::Protocol("envelope matches no known payload shape".to_string()))
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::snapshot::{Strategy, UsageComponent};

	fn sample_snapshot() -> UsageSnapshot {
		UsageSnapshot::new(
			vec![
				UsageComponent::new("current_session", 45.0, Some("Resets 6:00 PM".into())),
				UsageComponent::new("weekly_all_models", 12.5, None),
				UsageComponent::new("weekly_opus", 3.0, None),
			],
			Strategy::Dom,
			serde_json::Value::Null,
		)
	}

	#[test]
	fn snapshot_round_trip_preserves_percentages_and_count() {
		let snapshot = sample_snapshot();
		let bytes = encode_snapshot(&snapshot).unwrap();
		match decode(&bytes).unwrap() {
			Decoded::Snapshot(back) => {
				assert_eq!(back.found_components, snapshot.found_components);
				assert_eq!(back.strategy_used, Strategy::Dom);
				for (a, b) in back.components.iter().zip(snapshot.components.iter()) {
					assert_eq!(a.percentage, b.percentage);
					assert_eq!(a.name, b.name);
				}
			}
			other => panic!("expected snapshot, got {other:?}"),
		}
	}

	#[test]
	fn error_record_round_trips() {
		let record = crate::ErrorRecord::new(crate::ErrorCode::CloudflareDetected, "challenge page served")
			.with_attempts(1);
		let bytes = encode_error(&record).unwrap();
		match decode(&bytes).unwrap() {
			Decoded::Error(back) => {
				assert_eq!(back.error_code, crate::ErrorCode::CloudflareDetected);
				assert_eq!(back.attempts, Some(1));
			}
			other => panic!("expected error, got {other:?}"),
		}
	}

	#[test]
	fn invalid_bytes_are_a_parse_error() {
		let err = decode(b"not json at all").unwrap_err();
		assert!(matches!(err, CodecError::JsonParse(_)));
	}

	#[test]
	fn unknown_error_code_is_a_protocol_error() {
		let doc = json!({
			"error_code": "quantum_flux",
			"message": "??",
			"timestamp": "2026-01-01T00:00:00Z"
		});
		let err = decode(doc.to_string().as_bytes()).unwrap_err();
		assert!(matches!(err, CodecError::Protocol(_)));
	}

	#[test]
	fn mixed_snapshot_and_error_is_rejected() {
		let doc = json!({
			"error_code": "fatal",
			"message": "boom",
			"timestamp": "2026-01-01T00:00:00Z",
			"components": [],
			"found_components": 0
		});
		let err = decode(doc.to_string().as_bytes()).unwrap_err();
		assert!(matches!(err, CodecError::Protocol(_)));
	}

	#[test]
	fn inconsistent_component_count_is_rejected() {
		let doc = json!({
			"components": [
				{ "name": "current_session", "percentage": 45.0 }
			],
			"found_components": 9,
			"strategy_used": "dom",
			"collected_at": "2026-01-01T00:00:00Z"
		});
		let err = decode(doc.to_string().as_bytes()).unwrap_err();
		assert!(matches!(err, CodecError::Protocol(_)));
	}

	#[test]
	fn out_of_range_percentages_are_clamped_on_decode() {
		let doc = json!({
			"components": [
				{ "name": "current_session", "percentage": 450.0 },
				{ "name": "weekly_opus", "percentage": -3.0 }
			],
			"found_components": 2,
			"strategy_used": "dom",
			"collected_at": "2026-01-01T00:00:00Z"
		});
		match decode(doc.to_string().as_bytes()).unwrap() {
			Decoded::Snapshot(snapshot) => {
				assert_eq!(snapshot.components[0].percentage, 100.0);
				assert_eq!(snapshot.components[1].percentage, 0.0);
			}
			other => panic!("expected snapshot, got {other:?}"),
		}
	}

	#[test]
	fn non_object_documents_are_rejected() {
		for doc in ["[1,2,3]", "42", "\"ok\"", "null"] {
			let err = decode(doc.as_bytes()).unwrap_err();
			assert!(matches!(err, CodecError::Protocol(_)), "doc {doc} should be a protocol error");
		}
	}

	#[test]
	fn missing_required_fields_are_a_protocol_error() {
		let doc = json!({ "error_code": "fatal" });
		let err = decode(doc.to_string().as_bytes()).unwrap_err();
		assert!(matches!(err, CodecError::Protocol(_)));
	}

	#[test]
	fn command_payloads_decode() {
		match decode(br#"{"session_valid": true}"#).unwrap() {
			Decoded::SessionCheck(check) => assert!(check.session_valid),
			other => panic!("expected session check, got {other:?}"),
		}
		match decode(br#"{"login": "success"}"#).unwrap() {
			Decoded::Login(outcome) => assert_eq!(outcome.login, "success"),
			other => panic!("expected login, got {other:?}"),
		}
	}
}
