//! CLI command definitions and handlers.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use roomdrop_core::config::Config;

pub mod config;
pub mod receive;
pub mod share;
pub mod status;
pub mod text;

/// Load configuration with graceful fallback to defaults, then apply
/// command-line overrides.
///
/// A config file that cannot be read or fails validation is reported and
/// replaced by the defaults.
pub fn load_config(global: &GlobalArgs) -> Config {
    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring configuration file: {}", e);
        Config::default()
    });

    if let Some(server) = &global.server {
        config.server.base_url.clone_from(server);
    }
    if let Some(ws) = &global.ws {
        config.server.ws_url.clone_from(ws);
    }
    config
}

/// Roomdrop - share files and text through short room codes
#[derive(Parser)]
#[command(name = "roomdrop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Detailed logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Server overrides
    #[command(flatten)]
    pub global: GlobalArgs,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Room backend API root (overrides `server.base_url`)
    #[arg(long, global = true, env = "ROOMDROP_SERVER")]
    pub server: Option<String>,

    /// Message hub endpoint (overrides `server.ws_url`)
    #[arg(long, global = true, env = "ROOMDROP_WS")]
    pub ws: Option<String>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Share files in a new room
    Share(ShareArgs),

    /// Receive files from a room
    Receive(ReceiveArgs),

    /// Share or fetch a text snippet
    Text(TextArgs),

    /// Show who is in a room
    Status(StatusArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the share command
#[derive(Parser)]
pub struct ShareArgs {
    /// Files to share
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the receive command
#[derive(Parser)]
pub struct ReceiveArgs {
    /// Room code or shareable link
    pub code: String,

    /// Output directory for received files
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only fetch these file ids (repeatable); all files by default
    #[arg(short, long = "file", value_name = "ID")]
    pub files: Vec<String>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the text command
#[derive(Parser)]
pub struct TextArgs {
    /// Text subcommand
    #[command(subcommand)]
    pub action: TextAction,
}

/// Text subcommands
#[derive(Subcommand)]
pub enum TextAction {
    /// Store text in a new text room (reads stdin when TEXT is omitted)
    Send {
        /// Text to share
        text: Option<String>,
    },

    /// Print the text stored in a room
    Get {
        /// Room code or shareable link
        code: String,
    },
}

/// Arguments for the status command
#[derive(Parser)]
pub struct StatusArgs {
    /// Room code or shareable link
    pub code: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show all configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Reset to defaults
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_receive_file_filter() {
        let cli = Cli::parse_from([
            "roomdrop", "receive", "ABC123", "--file", "file_0", "--file", "file_2",
        ]);
        let Command::Receive(args) = cli.command else {
            panic!("expected receive");
        };
        assert_eq!(args.code, "ABC123");
        assert_eq!(args.files, vec!["file_0", "file_2"]);
    }

    #[test]
    fn test_server_override() {
        let cli = Cli::parse_from([
            "roomdrop",
            "--server",
            "http://example.test/api",
            "status",
            "ABC123",
        ]);
        let config = load_config(&cli.global);
        assert_eq!(config.server.base_url, "http://example.test/api");
    }
}
