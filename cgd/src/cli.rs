//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "cgd",
    about = "Conversational email campaign builder",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve conversations over a Unix socket
    Serve {
        /// Socket path (overrides config)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Build a campaign interactively in this terminal
    Chat {
        /// Location (tenant) id on the platform
        #[arg(long)]
        location_id: Option<String>,

        /// Business name shown to the model
        #[arg(long)]
        location_name: Option<String>,

        /// IANA timezone of the location
        #[arg(long, default_value = "UTC")]
        timezone: String,
    },

    /// Print the effective configuration as YAML
    ShowConfig,
}

/// Path of the log file written by every command
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("campaignd")
        .join("logs")
        .join("campaignd.log");
    debug!(?path, "get_log_path: returning path");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_with_socket() {
        let cli = Cli::try_parse_from(["cgd", "serve", "--socket", "/tmp/x.sock"]).unwrap();
        match cli.command {
            Some(Command::Serve { socket }) => assert_eq!(socket, Some(PathBuf::from("/tmp/x.sock"))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_chat_defaults() {
        let cli = Cli::try_parse_from(["cgd", "-l", "debug", "chat", "--location-id", "42"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Some(Command::Chat {
                location_id,
                location_name,
                timezone,
            }) => {
                assert_eq!(location_id.as_deref(), Some("42"));
                assert!(location_name.is_none());
                assert_eq!(timezone, "UTC");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_log_path_ends_with_file_name() {
        assert!(get_log_path().ends_with("campaignd/logs/campaignd.log"));
    }
}
