//! Config command implementation.

use anyhow::Result;

use roomdrop_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub async fn run(args: &ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = Config::load()?;
            println!();
            println!("Roomdrop Configuration");
            println!("{}", "─".repeat(50));
            println!();
            println!("[general]");
            match &config.general.default_output {
                Some(dir) => println!("  default_output = \"{}\"", dir.display()),
                None => println!("  default_output = (current directory)"),
            }
            println!();
            println!("[server]");
            println!("  base_url = \"{}\"", config.server.base_url);
            println!("  ws_url = \"{}\"", config.server.ws_url);
            println!("  origin = \"{}\"", config.server.origin);
            println!("  request_timeout = {:?}", config.server.request_timeout);
            println!();
            println!("[channel]");
            println!("  reconnect_delay = {:?}", config.channel.reconnect_delay);
            println!("  connect_timeout = {:?}", config.channel.connect_timeout);
            println!("  outbound_capacity = {}", config.channel.outbound_capacity);
            println!();
            println!("[transfer]");
            println!("  chunk_size = {}", config.transfer.chunk_size);
            println!("  chunk_delay_ms = {}", config.transfer.chunk_delay_ms);
            println!("  read_ahead = {}", config.transfer.read_ahead);
            println!("  progress_linger = {:?}", config.transfer.progress_linger);
            println!();
        }

        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }

        ConfigAction::Reset => {
            Config::default().save()?;
            println!("Configuration reset to defaults.");
        }
    }

    Ok(())
}
