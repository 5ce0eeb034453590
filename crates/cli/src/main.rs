//! Worker binary entry point: parse, dispatch, enforce the output
//! contract on the way out.

mod browser;
mod cli;
mod commands;
mod config;
mod logging;

use clap::Parser;

use crate::commands::CliFailure;

#[tokio::main]
async fn main() {
	let args = cli::Cli::parse();
	logging::init(args.verbose);

	let ctx = match commands::WorkerContext::resolve(args.data_dir) {
		Ok(ctx) => ctx,
		Err(failure) => exit_with(failure),
	};

	let result = match args.command {
		cli::Command::CheckSession { verify } => commands::check_session::run(&ctx, verify).await,
		cli::Command::Login => commands::login::run(&ctx).await,
		cli::Command::PollOnce => commands::poll_once::run(&ctx).await,
		cli::Command::Watch { interval_minutes } => commands::watch::run(ctx, interval_minutes).await,
	};

	if let Err(failure) = result {
		exit_with(failure);
	}
}

/// Emits the machine-readable record as the last stderr line, then
/// exits with the contract code.
fn exit_with(failure: CliFailure) -> ! {
	match capwatch_protocol::codec::encode_error(&failure.record) {
		Ok(bytes) => eprintln!("{}", String::from_utf8_lossy(&bytes)),
		Err(_) => eprintln!(
			r#"{{"error_code":"fatal","message":"error record could not be encoded","timestamp":"{}"}}"#,
			chrono::Utc::now().to_rfc3339()
		),
	}
	std::process::exit(failure.exit_code);
}
