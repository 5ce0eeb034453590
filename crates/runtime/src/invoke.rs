//! Spawning the worker and interpreting its exit contract.
//!
//! Exit codes: 0 success, 2 session invalid/expired, 3 login failed,
//! 4 everything else. On success the envelope is the last stdout line;
//! on failure it is the last stderr line (human-readable log lines may
//! precede it). Anything outside that contract is a host-visible
//! protocol or output error, never silently coerced into a worker
//! failure.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use capwatch_protocol::codec::{self, CodecError, Decoded};
use capwatch_protocol::ErrorRecord;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// One worker invocation, as argv.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
	/// Validate the stored session; `verify` adds a live navigation.
	CheckSession { verify: bool },
	/// Interactive headed login.
	Login,
	/// One extraction run.
	PollOnce,
}

impl WorkerCommand {
	pub fn argv(self) -> Vec<&'static str> {
		match self {
			WorkerCommand::CheckSession { verify: false } => vec!["check-session"],
			WorkerCommand::CheckSession { verify: true } => vec!["check-session", "--verify"],
			WorkerCommand::Login => vec!["login"],
			WorkerCommand::PollOnce => vec!["poll-once"],
		}
	}
}

/// How an invocation went wrong, from the host's point of view.
#[derive(Debug, Error)]
pub enum InvokeError {
	#[error("failed to spawn worker: {0}")]
	Spawn(#[source] std::io::Error),
	#[error("worker i/o failed: {0}")]
	Io(#[source] std::io::Error),
	/// The worker exceeded its deadline and was killed. Partial output
	/// is discarded; a truncated envelope is worse than none.
	#[error("worker exceeded {}s deadline and was killed", .0.as_secs())]
	Timeout(Duration),
	/// The worker finished and reported a failure through the contract.
	#[error("worker exited {exit_code}: [{}] {}", record.error_code, record.message)]
	Worker { exit_code: i32, record: ErrorRecord },
	/// Exit code and streams disagree, or the envelope is well-formed
	/// JSON that violates the schema (including unknown error codes).
	#[error("worker protocol violation: {0}")]
	Protocol(String),
	/// The expected envelope position held bytes that are not JSON.
	#[error("worker output undecodable: {0}")]
	MalformedOutput(String),
}

impl InvokeError {
	/// The worker-reported record, when the worker itself failed.
	pub fn worker_record(&self) -> Option<&ErrorRecord> {
		match self {
			InvokeError::Worker { record, .. } => Some(record),
			_ => None,
		}
	}
}

/// A completed, successfully decoded invocation.
#[derive(Debug)]
pub struct Invocation {
	pub outcome: Decoded,
	pub elapsed: Duration,
}

/// Spawns worker processes and enforces the output contract.
#[derive(Debug, Clone)]
pub struct Invoker {
	program: PathBuf,
	workdir: Option<PathBuf>,
	timeout: Duration,
}

impl Invoker {
	pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
			workdir: None,
			timeout: Self::DEFAULT_TIMEOUT,
		}
	}

	pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
		self.workdir = Some(workdir.into());
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	/// Runs one worker command to completion.
	///
	/// Concurrent invocations are independent; each gets its own child.
	/// Dropping the returned future kills the child (kill-on-drop), so
	/// host-side cancellation can never leak a headless browser.
	pub async fn invoke(&self, command: WorkerCommand) -> Result<Invocation, InvokeError> {
		let argv = command.argv();
		debug!(target = "capwatch.invoke", program = %self.program.display(), ?argv, "spawning worker");

		let mut cmd = Command::new(&self.program);
		cmd.args(&argv)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		if let Some(dir) = &self.workdir {
			cmd.current_dir(dir);
		}

		let child = cmd.spawn().map_err(InvokeError::Spawn)?;
		let started = Instant::now();

		// Dropping wait_with_output on deadline expiry triggers
		// kill-on-drop, so the child never outlives the timeout.
		let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
			Ok(result) => result.map_err(InvokeError::Io)?,
			Err(_) => {
				warn!(target = "capwatch.invoke", timeout_secs = self.timeout.as_secs(), "worker deadline expired; child killed");
				return Err(InvokeError::Timeout(self.timeout));
			}
		};
		let elapsed = started.elapsed();

		let Some(exit_code) = output.status.code() else {
			return Err(InvokeError::Protocol("worker terminated by signal".to_string()));
		};

		match exit_code {
			0 => {
				let decoded = decode_last_line(&output.stdout, "stdout")?;
				if let Decoded::Error(_) = decoded {
					return Err(InvokeError::Protocol(
						"exit code 0 but stdout carries an error record".to_string(),
					));
				}
				Ok(Invocation { outcome: decoded, elapsed })
			}
			2 | 3 | 4 => {
				let decoded = decode_last_line(&output.stderr, "stderr")?;
				let Decoded::Error(record) = decoded else {
					return Err(InvokeError::Protocol(format!(
						"exit code {exit_code} but stderr envelope is not an error record"
					)));
				};
				Err(InvokeError::Worker { exit_code, record })
			}
			other => Err(InvokeError::Protocol(format!("undocumented exit code {other}"))),
		}
	}
}

/// Decodes the last nonempty line of a stream as a protocol envelope.
fn decode_last_line(stream: &[u8], name: &str) -> Result<Decoded, InvokeError> {
	let text = String::from_utf8_lossy(stream);
	let Some(line) = text.lines().rev().find(|line| !line.trim().is_empty()) else {
		return Err(InvokeError::Protocol(format!("worker {name} carried no envelope")));
	};

	codec::decode(line.trim().as_bytes()).map_err(|err| match err {
		CodecError::JsonParse(e) => {
			InvokeError::MalformedOutput(format!("last {name} line is not JSON: {e}"))
		}
		CodecError::Protocol(msg) => InvokeError::Protocol(msg),
	})
}
