//! Stderr logging setup shared by every process role.
//!
//! Stdout is protocol/output-only in all three roles, so the subscriber
//! always writes to stderr. `BDG_LOG` overrides the verbosity flag.

use tracing_subscriber::EnvFilter;

pub fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let filter = EnvFilter::try_from_env("BDG_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("bdg={default_level},{default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
