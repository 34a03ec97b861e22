//! Roomdrop CLI - file and text sharing through short room codes
//!
//! One side creates a room and gets a 6-character code; the other side
//! joins with the code (or the shareable link) and pulls the files it
//! wants over the room's relayed message channel.
//!
//! ## Quick Start
//!
//! ```bash
//! # Share files
//! roomdrop share ./document.pdf
//!
//! # Receive files (on another device)
//! roomdrop receive A7K9QX
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use std::process::ExitCode;

use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Share(ref args) => commands::share::run(&cli.global, args).await,
        Command::Receive(ref args) => commands::receive::run(&cli.global, args).await,
        Command::Text(ref args) => commands::text::run(&cli.global, args).await,
        Command::Status(ref args) => commands::status::run(&cli.global, args).await,
        Command::Config(ref args) => commands::config::run(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let core = e.downcast_ref::<roomdrop_core::Error>();
            if let Some(suggestion) = core.and_then(roomdrop_core::Error::suggestion) {
                eprintln!("  Hint: {}", suggestion);
            }
            exit_code(core)
        }
    }
}

/// Exit status for a failed command.
///
/// Bad input exits with 2, failures worth retrying with 75 (`EX_TEMPFAIL`),
/// everything else with 1.
fn exit_code(error: Option<&roomdrop_core::Error>) -> ExitCode {
    match error {
        Some(e) if e.is_validation() => ExitCode::from(2),
        Some(e) if e.is_recoverable() => ExitCode::from(75),
        _ => ExitCode::FAILURE,
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose {
        "warn,roomdrop=debug,roomdrop_core=debug"
    } else {
        "warn,roomdrop=info,roomdrop_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
