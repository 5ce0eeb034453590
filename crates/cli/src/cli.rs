//! Command-line surface of the worker binary.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "capwatch", version, about = "Usage dashboard polling worker")]
pub struct Cli {
	/// Base directory for session, config, and usage records.
	#[arg(long, global = true, value_name = "DIR")]
	pub data_dir: Option<PathBuf>,

	/// Increase log verbosity on stderr (-v info, -vv debug).
	#[arg(short, long, global = true, action = ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Validate the stored session.
	CheckSession {
		/// Also load the dashboard and confirm the server accepts it.
		#[arg(long)]
		verify: bool,
	},
	/// Open a headed browser for manual login and persist the session.
	Login,
	/// Run one extraction and print the snapshot.
	PollOnce,
	/// Poll on a fixed interval until interrupted.
	Watch {
		/// Minutes between polls; overrides the configured interval.
		#[arg(long, value_name = "MINUTES")]
		interval_minutes: Option<u64>,
	},
}

#[cfg(test)]
mod tests {
	use clap::Parser;

	use super::*;

	#[test]
	fn check_session_parses_with_and_without_verify() {
		let cli = Cli::try_parse_from(["capwatch", "check-session"]).unwrap();
		assert!(matches!(cli.command, Command::CheckSession { verify: false }));

		let cli = Cli::try_parse_from(["capwatch", "check-session", "--verify"]).unwrap();
		assert!(matches!(cli.command, Command::CheckSession { verify: true }));
	}

	#[test]
	fn global_flags_apply_after_the_subcommand() {
		let cli = Cli::try_parse_from(["capwatch", "poll-once", "-vv", "--data-dir", "/tmp/cw"]).unwrap();
		assert_eq!(cli.verbose, 2);
		assert_eq!(cli.data_dir.as_deref(), Some(std::path::Path::new("/tmp/cw")));
		assert!(matches!(cli.command, Command::PollOnce));
	}

	#[test]
	fn watch_accepts_an_interval_override() {
		let cli = Cli::try_parse_from(["capwatch", "watch", "--interval-minutes", "10"]).unwrap();
		assert!(matches!(cli.command, Command::Watch { interval_minutes: Some(10) }));
	}

	#[test]
	fn unknown_subcommands_are_rejected() {
		assert!(Cli::try_parse_from(["capwatch", "frobnicate"]).is_err());
	}
}
