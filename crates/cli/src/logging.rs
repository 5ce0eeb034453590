//! Tracing setup. Everything human-readable goes to stderr; stdout is
//! reserved for the machine envelope.

use tracing_subscriber::EnvFilter;

pub fn init(verbose: u8) {
	let default = match verbose {
		0 => "warn",
		1 => "info",
		_ => "debug",
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();
}
