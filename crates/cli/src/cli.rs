use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bdg")]
#[command(about = "Supervised browser debugging from the command line")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the background daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Start a browser session against a URL
    Start {
        url: String,
        /// Remote debugging port
        #[arg(long, default_value = "9222")]
        port: u16,
        /// Run the browser headless
        #[arg(long)]
        headless: bool,
        /// Browser profile directory
        #[arg(long, value_name = "DIR")]
        user_data_dir: Option<PathBuf>,
        /// Stop the session automatically after this many seconds
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
        /// Attach to an existing browser WebSocket endpoint instead of launching
        #[arg(long, value_name = "URL")]
        browser_ws_url: Option<String>,
        /// Activate every telemetry kind
        #[arg(long)]
        include_all: bool,
        /// Capture response bodies up to this many bytes
        #[arg(long, value_name = "BYTES")]
        max_body_size: Option<u64>,
    },

    /// Stop the active session
    Stop,

    /// Show daemon and session status
    Status,

    /// Preview recent telemetry from the active session
    Peek {
        /// How many recent items of each kind to show (max 100)
        #[arg(short = 'n', long, default_value = "10")]
        last: usize,
    },

    /// Internal: run as the session worker
    #[command(hide = true)]
    Worker {
        /// Worker configuration as a single JSON object
        #[arg(long)]
        config: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum DaemonAction {
    /// Start the daemon
    Start {
        /// Run in the foreground instead of detaching
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the daemon (and any active session)
    Stop,
    /// Check whether the daemon is running
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_start_with_options() {
        let cli = Cli::try_parse_from([
            "bdg", "start", "https://example.com", "--headless", "--port", "9333", "--timeout", "60",
        ])
        .unwrap();
        match cli.command {
            Commands::Start { url, port, headless, timeout, .. } => {
                assert_eq!(url, "https://example.com");
                assert_eq!(port, 9333);
                assert!(headless);
                assert_eq!(timeout, Some(60));
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn parse_peek_window() {
        let cli = Cli::try_parse_from(["bdg", "peek", "-n", "25"]).unwrap();
        match cli.command {
            Commands::Peek { last } => assert_eq!(last, 25),
            other => panic!("expected peek, got {other:?}"),
        }
    }

    #[test]
    fn parse_daemon_foreground() {
        let cli = Cli::try_parse_from(["bdg", "daemon", "start", "--foreground"]).unwrap();
        match cli.command {
            Commands::Daemon { action: DaemonAction::Start { foreground } } => assert!(foreground),
            other => panic!("expected daemon start, got {other:?}"),
        }
    }

    #[test]
    fn worker_entry_requires_config() {
        assert!(Cli::try_parse_from(["bdg", "worker"]).is_err());
        let cli = Cli::try_parse_from(["bdg", "worker", "--config", "{}"]).unwrap();
        match cli.command {
            Commands::Worker { config } => assert_eq!(config, "{}"),
            other => panic!("expected worker, got {other:?}"),
        }
    }

    #[test]
    fn verbose_flag_accumulates() {
        let cli = Cli::try_parse_from(["bdg", "-vv", "status"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
