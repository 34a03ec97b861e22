//! Status command implementation.

use anyhow::Result;

use roomdrop_core::api::BackendClient;
use roomdrop_core::code::code_from_input;
use roomdrop_core::protocol::Role;

use super::{GlobalArgs, StatusArgs};

/// Run the status command.
pub async fn run(global: &GlobalArgs, args: &StatusArgs) -> Result<()> {
    let config = super::load_config(global);
    let code = code_from_input(&args.code)?;
    let api = BackendClient::new(config.api_config())?;

    let status = api.room_status(&code).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("Room {}", status.code);
    println!("{}", "─".repeat(50));
    if let Some(created) = status.created_at {
        println!("  Created:   {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("  Files:     {}", status.file_count);
    println!("  Senders:   {}", status.sender_count);
    println!("  Receivers: {}", status.receiver_count);

    if !status.clients.is_empty() {
        println!();
        for client in &status.clients {
            let marker = match client.role {
                Role::Sender => "->",
                Role::Receiver => "<-",
            };
            println!(
                "  {} {:<9} {}  joined {}",
                marker,
                client.role.as_str(),
                client.id,
                client.joined_at.format("%H:%M:%S")
            );
        }
    }
    println!();

    Ok(())
}
