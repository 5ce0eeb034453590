use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extraction technique that produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
	Js,
	Dom,
	PlainText,
}

impl std::fmt::Display for Strategy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Strategy::Js => write!(f, "js"),
			Strategy::Dom => write!(f, "dom"),
			Strategy::PlainText => write!(f, "plain_text"),
		}
	}
}

/// One usage meter scraped off the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageComponent {
	pub name: String,
	pub percentage: f64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reset_text: Option<String>,
}

impl UsageComponent {
	/// Builds a component with the percentage clamped to `0..=100`.
	pub fn new(name: impl Into<String>, percentage: f64, reset_text: Option<String>) -> Self {
		Self {
			name: name.into(),
			percentage: percentage.clamp(0.0, 100.0),
			reset_text,
		}
	}
}

/// One complete or partial extraction result for a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
	pub components: Vec<UsageComponent>,
	pub found_components: usize,
	pub strategy_used: Strategy,
	pub collected_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
	pub raw_payload: serde_json::Value,
}

impl UsageSnapshot {
	/// Builds a snapshot, clamping percentages and deriving `found_components`.
	pub fn new(components: Vec<UsageComponent>, strategy_used: Strategy, raw_payload: serde_json::Value) -> Self {
		let components: Vec<UsageComponent> = components
			.into_iter()
			.map(|c| UsageComponent::new(c.name, c.percentage, c.reset_text))
			.collect();
		let found_components = components.len();
		Self {
			components,
			found_components,
			strategy_used,
			collected_at: Utc::now(),
			raw_payload,
		}
	}

	/// A snapshot is complete when every expected component was found.
	/// Partial snapshots are valid results, not errors.
	pub fn is_complete(&self, expected: usize) -> bool {
		self.found_components >= expected
	}
}

/// Success payload for `check-session`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionCheck {
	pub session_valid: bool,
}

/// Success payload for `login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginOutcome {
	pub login: String,
}

impl LoginOutcome {
	pub fn success() -> Self {
		Self { login: "success".to_string() }
	}
}
