//! Share command implementation.

use anyhow::Result;
use tokio::sync::watch;

use roomdrop_core::client::Client;
use roomdrop_core::file::{format_size, offer_paths};
use roomdrop_core::transfer::{ProgressEntry, ProgressStatus};

use super::{GlobalArgs, ShareArgs};
use crate::ui::{mime_icon, progress_line, CodeBox};

/// Run the share command.
pub async fn run(global: &GlobalArgs, args: &ShareArgs) -> Result<()> {
    let config = super::load_config(global);
    let files = offer_paths(&args.paths)?;
    let total_size: u64 = files.iter().map(|f| f.descriptor.size).sum();

    let (client, outputs) = Client::new(&config)?;
    let task = client.spawn().await?;
    let room = client.share(files.clone()).await?;

    if args.json {
        let output = serde_json::json!({
            "status": "waiting",
            "code": room.code.as_str(),
            "link": room.link.to_string(),
            "files": files.iter().map(|f| &f.descriptor).collect::<Vec<_>>(),
            "total_size": total_size,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if args.quiet {
        println!("{}", room.code);
    } else {
        println!();
        println!("Roomdrop v{}", roomdrop_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        CodeBox::new(room.code.as_str())
            .with_caption("Waiting for receivers")
            .display();
        println!();
        println!("  Link: {}", room.link);
        println!();
        println!(
            "  Sharing {} file(s) ({})",
            files.len(),
            format_size(total_size)
        );
        println!();
        for file in &files {
            println!(
                "  {} {}  {}  ({})",
                mime_icon(&file.descriptor.mime_type),
                file.descriptor.id,
                file.descriptor.name,
                format_size(file.descriptor.size)
            );
        }
        println!();
        println!("  Press Ctrl-C to stop sharing.");
        println!();
    }

    let display = if args.quiet || args.json {
        None
    } else {
        Some(tokio::spawn(display_uploads(outputs.progress)))
    };

    tokio::signal::ctrl_c().await?;

    if let Some(handle) = display {
        handle.abort();
    }
    client.reset().await;
    task.abort();

    if !args.quiet && !args.json {
        println!();
        println!("  Stopped sharing room {}.", room.code);
        println!();
    }
    if args.json {
        let output = serde_json::json!({
            "status": "stopped",
            "code": room.code.as_str(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

/// Print a line whenever an upload starts, finishes or fails.
async fn display_uploads(mut rx: watch::Receiver<Vec<ProgressEntry>>) {
    let mut reported: Vec<(String, ProgressStatus)> = Vec::new();

    while rx.changed().await.is_ok() {
        let entries = rx.borrow_and_update().clone();
        for entry in entries {
            let seen = reported
                .iter()
                .any(|(id, status)| *id == entry.transfer_id && *status == entry.status);
            if seen || entry.status == ProgressStatus::Pending {
                continue;
            }

            if entry.status == ProgressStatus::Uploading {
                println!("  Sending {}...", entry.name);
            } else {
                println!("{}", progress_line(&entry));
            }

            reported.retain(|(id, _)| *id != entry.transfer_id);
            reported.push((entry.transfer_id, entry.status));
        }
    }
}
