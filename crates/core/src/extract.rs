//! Ordered multi-strategy extraction against the usage dashboard.
//!
//! The dashboard's DOM/JS surface is unstable, so one run walks a
//! fixed strategy chain - script evaluation, structural markup scan,
//! plain-text scan - and takes the first strategy that finds anything.
//! Results are never merged across strategies. Challenge detection
//! runs before any strategy and short-circuits the whole chain.

use std::sync::LazyLock;
use std::time::Duration;

use capwatch_protocol::{Strategy, UsageComponent, UsageSnapshot};
use regex_lite::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ScrapeError;
use crate::page::PageContext;

/// Phrases and element hooks that mark an anti-bot challenge page
/// rather than dashboard content.
pub const CHALLENGE_MARKERS: [&str; 5] = [
	"Just a moment",
	"Checking your browser",
	"Please enable JavaScript and cookies",
	"cf-challenge",
	"cf-browser-verification",
];

/// One expected usage meter and the label it appears under.
#[derive(Debug, Clone, Copy)]
pub struct ComponentSpec {
	pub id: &'static str,
	pub label: &'static str,
}

/// The three meters the dashboard exposes.
pub const EXPECTED_COMPONENTS: [ComponentSpec; 3] = [
	ComponentSpec { id: "current_session", label: "Current session" },
	ComponentSpec { id: "weekly_all_models", label: "All models" },
	ComponentSpec { id: "weekly_opus", label: "Opus only" },
];

/// Outcome of a single strategy against the current page. Challenge
/// detection happens once before the chain runs, so it is not a
/// per-strategy outcome.
#[derive(Debug)]
pub enum StrategyOutcome {
	Found(Vec<UsageComponent>),
	NotApplicable,
}

static PERCENT_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"([0-9]{1,3}(?:\.[0-9]+)?)\s*%").unwrap());
static ELEMENT_PERCENT_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r">\s*([0-9]{1,3}(?:\.[0-9]+)?)\s*%").unwrap());
static RESET_TEXT_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r">([^<>]*[Rr]esets[^<>]*)<").unwrap());

/// Window scanned after a label match, in bytes of markup/text.
const LABEL_WINDOW: usize = 900;

/// Script probing priority-ordered selectors per component. Returns an
/// array of hits; an empty array means the page offers no usable hook.
const JS_PROBE: &str = r#"(() => {
	const bySelectors = (selectors) => {
		for (const selector of selectors) {
			try {
				const el = document.querySelector(selector);
				if (el) return el.textContent.trim();
			} catch (e) {}
		}
		return null;
	};
	const parsePercent = (text) => {
		if (!text) return null;
		const m = text.match(/(\d+\.?\d*)\s*%/);
		return m ? parseFloat(m[1]) : null;
	};
	const specs = [
		{
			name: 'current_session',
			percent: ['[data-testid="usage-session-percent"]', '.usage-metric[data-period="session"] .percentage'],
			reset: ['[data-testid="usage-session-reset"]', '.usage-metric[data-period="session"] .reset-time'],
		},
		{
			name: 'weekly_all_models',
			percent: ['[data-testid="usage-week-percent"]', '.usage-metric[data-period="week"] .percentage'],
			reset: ['[data-testid="usage-week-reset"]', '.usage-metric[data-period="week"] .reset-time'],
		},
		{
			name: 'weekly_opus',
			percent: ['[data-testid="usage-opus-percent"]', '.usage-metric[data-model="opus"] .percentage'],
			reset: ['[data-testid="usage-opus-reset"]', '.usage-metric[data-model="opus"] .reset-time'],
		},
	];
	const hits = [];
	for (const spec of specs) {
		const percentage = parsePercent(bySelectors(spec.percent));
		if (percentage === null) continue;
		hits.push({ name: spec.name, percentage, reset_text: bySelectors(spec.reset) });
	}
	return hits;
})()"#;

/// Runs the strategy chain against a live page context.
#[derive(Debug, Clone)]
pub struct ExtractionEngine {
	usage_url: String,
	navigation_timeout: Duration,
}

impl ExtractionEngine {
	pub fn new(usage_url: impl Into<String>, navigation_timeout: Duration) -> Self {
		Self {
			usage_url: usage_url.into(),
			navigation_timeout,
		}
	}

	pub fn usage_url(&self) -> &str {
		&self.usage_url
	}

	/// Navigates to the usage page and extracts one snapshot. This is
	/// the unit of work the retry policy wraps.
	pub async fn collect(&self, page: &dyn PageContext) -> Result<UsageSnapshot, ScrapeError> {
		self.navigate(page).await?;
		self.extract(page).await
	}

	/// Navigates to the usage URL, bounded by the operation timeout.
	/// A redirect to the login page means the saved session is dead.
	pub async fn navigate(&self, page: &dyn PageContext) -> Result<(), ScrapeError> {
		tokio::time::timeout(self.navigation_timeout, page.navigate(&self.usage_url))
			.await
			.map_err(|_| ScrapeError::Timeout {
				operation: "navigation".to_string(),
				seconds: self.navigation_timeout.as_secs(),
			})??;

		let url = page.current_url().await?;
		if url.contains("/login") {
			return Err(ScrapeError::SessionExpired);
		}
		Ok(())
	}

	/// Runs the ordered strategy chain. Never returns an empty snapshot
	/// as success: a strategy only wins with at least one component,
	/// and a fully-exhausted chain is an `extraction_failed` carrying
	/// the tried-strategy list.
	pub async fn extract(&self, page: &dyn PageContext) -> Result<UsageSnapshot, ScrapeError> {
		let html = page.content().await?;
		if is_challenge_page(&html) {
			info!(target = "capwatch.extract", "challenge markers present; aborting chain");
			return Err(ScrapeError::ChallengeDetected);
		}

		let mut tried = Vec::new();
		for strategy in [Strategy::Js, Strategy::Dom, Strategy::PlainText] {
			tried.push(strategy);
			let outcome = match strategy {
				Strategy::Js => self.js_evaluation(page).await,
				Strategy::Dom => dom_query(&html),
				Strategy::PlainText => plain_text_scan(&html),
			};

			match outcome {
				StrategyOutcome::Found(components) => {
					info!(
						target = "capwatch.extract",
						strategy = %strategy,
						found = components.len(),
						expected = EXPECTED_COMPONENTS.len(),
						"strategy produced components"
					);
					let raw = raw_payload_for(&components);
					return Ok(UsageSnapshot::new(components, strategy, raw));
				}
				StrategyOutcome::NotApplicable => {
					debug!(target = "capwatch.extract", strategy = %strategy, "strategy not applicable");
				}
			}
		}

		Err(ScrapeError::Extraction { tried })
	}

	/// Strategy 1: evaluate a selector probe in the page. A script
	/// error or an empty hit list moves the chain along rather than
	/// failing the run.
	async fn js_evaluation(&self, page: &dyn PageContext) -> StrategyOutcome {
		#[derive(Deserialize)]
		struct JsHit {
			name: String,
			percentage: f64,
			reset_text: Option<String>,
		}

		let value = match page.evaluate(JS_PROBE).await {
			Ok(value) => value,
			Err(err) => {
				debug!(target = "capwatch.extract", error = %err, "js probe failed");
				return StrategyOutcome::NotApplicable;
			}
		};

		let hits: Vec<JsHit> = match serde_json::from_value(value) {
			Ok(hits) => hits,
			Err(err) => {
				debug!(target = "capwatch.extract", error = %err, "js probe returned unexpected shape");
				return StrategyOutcome::NotApplicable;
			}
		};

		if hits.is_empty() {
			return StrategyOutcome::NotApplicable;
		}

		StrategyOutcome::Found(
			hits.into_iter()
				.map(|hit| UsageComponent::new(hit.name, hit.percentage, hit.reset_text))
				.collect(),
		)
	}
}

/// Challenge detection: markers indicating a verification page rather
/// than target content.
pub fn is_challenge_page(html: &str) -> bool {
	CHALLENGE_MARKERS.iter().any(|marker| html.contains(marker))
}

/// Strategy 2: structural markup scan. Finds each label in the raw
/// HTML, then the nearest following element whose text is a
/// percentage, plus an optional reset line in the same block.
fn dom_query(html: &str) -> StrategyOutcome {
	let mut components = Vec::new();
	for spec in EXPECTED_COMPONENTS {
		let Some(pos) = find_case_insensitive(html, spec.label) else {
			continue;
		};
		let window = window_after(html, pos, LABEL_WINDOW);
		let Some(caps) = ELEMENT_PERCENT_RE.captures(window) else {
			continue;
		};
		let Ok(percentage) = caps[1].parse::<f64>() else {
			continue;
		};
		let reset_text = RESET_TEXT_RE
			.captures(window)
			.map(|c| c[1].trim().to_string())
			.filter(|s| !s.is_empty());
		components.push(UsageComponent::new(spec.id, percentage, reset_text));
	}

	if components.is_empty() {
		StrategyOutcome::NotApplicable
	} else {
		StrategyOutcome::Found(components)
	}
}

/// Strategy 3: tag-stripped text scan. Looks for a percentage in a
/// bounded window after each label in the visible text.
fn plain_text_scan(html: &str) -> StrategyOutcome {
	let text = strip_tags(html);
	let mut components = Vec::new();
	for spec in EXPECTED_COMPONENTS {
		let Some(pos) = find_case_insensitive(&text, spec.label) else {
			continue;
		};
		let window = window_after(&text, pos, LABEL_WINDOW);
		let Some(caps) = PERCENT_RE.captures(window) else {
			continue;
		};
		let Ok(percentage) = caps[1].parse::<f64>() else {
			continue;
		};
		components.push(UsageComponent::new(spec.id, percentage, None));
	}

	if components.is_empty() {
		StrategyOutcome::NotApplicable
	} else {
		StrategyOutcome::Found(components)
	}
}

fn raw_payload_for(components: &[UsageComponent]) -> serde_json::Value {
	serde_json::to_value(components).unwrap_or(serde_json::Value::Null)
}

/// Byte offset of `needle` in `haystack`, ignoring case. Walks the
/// original string so the offset is valid even when lowercasing would
/// change byte lengths (e.g. U+0130).
fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
	let needle_lower = needle.to_lowercase();
	if needle_lower.is_empty() {
		return Some(0);
	}
	haystack
		.char_indices()
		.map(|(pos, _)| pos)
		.find(|&pos| starts_with_ignore_case(&haystack[pos..], &needle_lower))
}

fn starts_with_ignore_case(text: &str, needle_lower: &str) -> bool {
	let mut text_lower = text.chars().flat_map(char::to_lowercase);
	needle_lower.chars().all(|n| text_lower.next() == Some(n))
}

fn window_after(text: &str, pos: usize, len: usize) -> &str {
	let end = ceil_char_boundary(text, text.len().min(pos + len));
	&text[pos..end]
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
	if index >= text.len() {
		return text.len();
	}
	while !text.is_char_boundary(index) {
		index += 1;
	}
	index
}

/// Replaces markup with spaces so adjacent text nodes stay separated.
fn strip_tags(html: &str) -> String {
	let mut out = String::with_capacity(html.len());
	let mut in_tag = false;
	for ch in html.chars() {
		match ch {
			'<' => {
				in_tag = true;
				out.push(' ');
			}
			'>' => in_tag = false,
			c if !in_tag => out.push(c),
			_ => {}
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;

	use super::*;

	struct FixturePage {
		html: String,
		eval_result: Option<serde_json::Value>,
		url: String,
	}

	impl FixturePage {
		fn dom_only(html: &str) -> Self {
			Self {
				html: html.to_string(),
				eval_result: None,
				url: "https://dash.example/usage".to_string(),
			}
		}
	}

	#[async_trait]
	impl PageContext for FixturePage {
		async fn current_url(&self) -> Result<String, ScrapeError> {
			Ok(self.url.clone())
		}

		async fn navigate(&self, _url: &str) -> Result<(), ScrapeError> {
			Ok(())
		}

		async fn content(&self) -> Result<String, ScrapeError> {
			Ok(self.html.clone())
		}

		async fn evaluate(&self, _script: &str) -> Result<serde_json::Value, ScrapeError> {
			match &self.eval_result {
				Some(value) => Ok(value.clone()),
				None => Err(ScrapeError::Fatal("no js hook in fixture".to_string())),
			}
		}
	}

	fn engine() -> ExtractionEngine {
		ExtractionEngine::new("https://dash.example/usage", Duration::from_secs(30))
	}

	const DOM_FIXTURE: &str = r#"
		<main>
			<section><h3>Current session</h3><span class="pct">45%</span><p>Resets 6:00 PM</p></section>
			<section><h3>All models</h3><span class="pct">12.5%</span><p>Resets Thu</p></section>
			<section><h3>Opus only</h3><span class="pct">3%</span><p>Resets Thu</p></section>
		</main>"#;

	#[tokio::test]
	async fn dom_fixture_yields_dom_strategy_with_three_components() {
		let page = FixturePage::dom_only(DOM_FIXTURE);
		let snapshot = engine().extract(&page).await.unwrap();
		assert_eq!(snapshot.strategy_used, Strategy::Dom);
		assert_eq!(snapshot.found_components, 3);
		assert_eq!(snapshot.components[0].percentage, 45.0);
		assert_eq!(snapshot.components[0].reset_text.as_deref(), Some("Resets 6:00 PM"));
		assert_eq!(snapshot.components[1].percentage, 12.5);
	}

	#[tokio::test]
	async fn js_hook_wins_over_dom_when_present() {
		let mut page = FixturePage::dom_only(DOM_FIXTURE);
		page.eval_result = Some(serde_json::json!([
			{ "name": "current_session", "percentage": 51.0, "reset_text": "Resets 6:00 PM" }
		]));
		let snapshot = engine().extract(&page).await.unwrap();
		assert_eq!(snapshot.strategy_used, Strategy::Js);
		assert_eq!(snapshot.found_components, 1);
		assert_eq!(snapshot.components[0].percentage, 51.0);
	}

	#[tokio::test]
	async fn challenge_markers_abort_the_chain() {
		let page = FixturePage::dom_only("<html><body><h1>Just a moment...</h1></body></html>");
		let err = engine().extract(&page).await.unwrap_err();
		assert!(matches!(err, ScrapeError::ChallengeDetected));
	}

	#[tokio::test]
	async fn plain_text_is_the_last_resort() {
		let page = FixturePage::dom_only(
			"<body>Current session usage at 45% of cap. All models 12% this week. Opus only 3% this week.</body>",
		);
		let snapshot = engine().extract(&page).await.unwrap();
		assert_eq!(snapshot.strategy_used, Strategy::PlainText);
		assert_eq!(snapshot.found_components, 3);
	}

	#[tokio::test]
	async fn partial_findings_are_success_not_error() {
		let page = FixturePage::dom_only(
			r#"<section><h3>Current session</h3><span>45%</span></section>"#,
		);
		let snapshot = engine().extract(&page).await.unwrap();
		assert_eq!(snapshot.found_components, 1);
		assert!(!snapshot.is_complete(EXPECTED_COMPONENTS.len()));
	}

	#[tokio::test]
	async fn exhausted_chain_reports_tried_strategies() {
		let page = FixturePage::dom_only("<html><body><p>nothing of interest</p></body></html>");
		let err = engine().extract(&page).await.unwrap_err();
		match err {
			ScrapeError::Extraction { tried } => {
				assert_eq!(tried, vec![Strategy::Js, Strategy::Dom, Strategy::PlainText]);
			}
			other => panic!("expected Extraction, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn login_redirect_is_session_expired() {
		let mut page = FixturePage::dom_only(DOM_FIXTURE);
		page.url = "https://dash.example/login?return=/usage".to_string();
		let err = engine().navigate(&page).await.unwrap_err();
		assert!(matches!(err, ScrapeError::SessionExpired));
	}

	#[test]
	fn case_insensitive_find_returns_offsets_into_the_original() {
		// Four U+0130 chars: lowercasing grows each from 2 to 3 bytes,
		// so an offset taken in a lowercased copy would be skewed.
		let text = "İİİİ All Models: 12%";
		let pos = find_case_insensitive(text, "all models").unwrap();
		assert_eq!(&text[pos..pos + "All Models".len()], "All Models");
	}

	#[tokio::test]
	async fn labels_are_found_on_non_ascii_pages() {
		let page = FixturePage::dom_only(
			r#"<h1>İstanbul • İzmir — kullanım</h1>
			<section><h3>Current session</h3><span>45%</span></section>"#,
		);
		let snapshot = engine().extract(&page).await.unwrap();
		assert_eq!(snapshot.found_components, 1);
		assert_eq!(snapshot.components[0].percentage, 45.0);
	}

	#[test]
	fn strip_tags_keeps_text_separated() {
		let text = strip_tags("<p>Current session</p><span>45%</span>");
		assert!(text.contains("Current session"));
		assert!(text.contains("45%"));
		assert!(!text.contains('<'));
	}
}
