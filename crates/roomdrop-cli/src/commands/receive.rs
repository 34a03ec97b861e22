//! Receive command implementation.

use std::collections::HashSet;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc::UnboundedReceiver;

use roomdrop_core::channel::ChannelEvent;
use roomdrop_core::client::{Client, ClientOutputs};
use roomdrop_core::code::code_from_input;
use roomdrop_core::file::{format_size, FileDescriptor};
use roomdrop_core::session::JoinOutcome;
use roomdrop_core::transfer::{ProgressEntry, ProgressStatus};

use super::{GlobalArgs, ReceiveArgs};
use crate::ui::{mime_icon, progress_line};

/// Run the receive command.
pub async fn run(global: &GlobalArgs, args: &ReceiveArgs) -> Result<()> {
    let config = super::load_config(global);
    let code = code_from_input(&args.code)?;
    let output_dir = args
        .output
        .clone()
        .or_else(|| config.general.default_output.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&output_dir).await?;

    let (client, mut outputs) = Client::new(&config)?;
    let mut events = client.session().channel().subscribe().await;
    let task = client.spawn().await?;

    if !args.quiet && !args.json {
        println!();
        println!("Roomdrop v{}", roomdrop_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        println!("  Joining room {}...", code);
        println!();
    }

    let files = match client.join(&code).await? {
        JoinOutcome::Joined(files) => files,
        JoinOutcome::AlreadyJoined | JoinOutcome::InFlight => {
            client.session().receiver_files().await
        }
    };
    wait_until_open(&mut events, config.channel.connect_timeout * 2).await?;

    let wanted = select_files(&files, &args.files)?;
    if wanted.is_empty() {
        if !args.quiet && !args.json {
            println!("  The room has no files yet.");
            println!();
        }
        client.reset().await;
        task.abort();
        return Ok(());
    }

    if args.json {
        let output = serde_json::json!({
            "status": "connected",
            "code": code.as_str(),
            "files": &wanted,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !args.quiet {
        let total_size: u64 = wanted.iter().map(|f| f.size).sum();
        println!(
            "  Receiving {} file(s) ({}) to {}",
            wanted.len(),
            format_size(total_size),
            output_dir.display()
        );
        println!();
        for file in &wanted {
            println!("  {} {}", mime_icon(&file.mime_type), file.name);
        }
        println!();
    }

    let mut pending = HashSet::new();
    for file in &wanted {
        pending.insert(client.request_file(&file.id).await?);
    }

    let show_progress = !args.quiet && !args.json;
    let result = collect(&mut outputs, &mut pending, &output_dir, show_progress, args.json).await;

    client.reset().await;
    task.abort();

    let failed = result?;
    if failed > 0 {
        bail!("{} file(s) failed to transfer", failed);
    }

    if show_progress {
        println!();
        println!("  Transfer complete!");
        println!();
        println!("  Files saved to: {}", output_dir.display());
        println!();
    }
    if args.json {
        let output = serde_json::json!({
            "status": "complete",
            "code": code.as_str(),
            "output_dir": output_dir.display().to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

/// Wait for the channel to report an open connection.
async fn wait_until_open(
    events: &mut UnboundedReceiver<ChannelEvent>,
    limit: Duration,
) -> Result<()> {
    let opened = tokio::time::timeout(limit, async {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Connected { .. } => return true,
                ChannelEvent::ReconnectFailed => return false,
                _ => {}
            }
        }
        false
    })
    .await;

    match opened {
        Ok(true) => Ok(()),
        Ok(false) => bail!("could not connect to the room"),
        Err(_) => bail!("timed out connecting to the room"),
    }
}

/// Pick the advertised files to fetch.
fn select_files(files: &[FileDescriptor], ids: &[String]) -> Result<Vec<FileDescriptor>> {
    if ids.is_empty() {
        return Ok(files.to_vec());
    }

    ids.iter()
        .map(|id| {
            files
                .iter()
                .find(|f| f.id == *id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("the room does not offer '{}'", id))
        })
        .collect()
}

/// Save completed payloads until every requested transfer has finished.
///
/// Returns the number of transfers that failed.
async fn collect(
    outputs: &mut ClientOutputs,
    pending: &mut HashSet<String>,
    output_dir: &std::path::Path,
    show_progress: bool,
    json: bool,
) -> Result<usize> {
    let mut failed = 0;

    while !pending.is_empty() {
        tokio::select! {
            completed = outputs.completed.recv() => {
                let Some(payload) = completed else {
                    bail!("client stopped");
                };
                if !pending.remove(&payload.transfer_id) {
                    continue;
                }
                let path = payload.save_to(output_dir).await?;
                if show_progress {
                    clear_line();
                    println!(
                        "  [done] {}  {} in {:.1}s",
                        path.display(),
                        format_size(payload.data.len() as u64),
                        payload.elapsed.as_secs_f64()
                    );
                }
                if json {
                    let output = serde_json::json!({
                        "status": "saved",
                        "name": payload.name,
                        "path": path.display().to_string(),
                        "size": payload.data.len(),
                    });
                    println!("{}", serde_json::to_string(&output)?);
                }
            }
            changed = outputs.progress.changed() => {
                if changed.is_err() {
                    bail!("client stopped");
                }
                let entries = outputs.progress.borrow_and_update().clone();
                failed += drop_failed(&entries, pending, show_progress);
                if show_progress {
                    render(&entries, pending)?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                bail!("interrupted");
            }
        }
    }

    Ok(failed)
}

fn drop_failed(entries: &[ProgressEntry], pending: &mut HashSet<String>, show: bool) -> usize {
    let mut failed = 0;
    for entry in entries {
        if entry.status == ProgressStatus::Error && pending.remove(&entry.transfer_id) {
            if show {
                clear_line();
                println!("{}", progress_line(entry));
            }
            failed += 1;
        }
    }
    failed
}

fn render(entries: &[ProgressEntry], pending: &HashSet<String>) -> Result<()> {
    let active: Vec<String> = entries
        .iter()
        .filter(|e| pending.contains(&e.transfer_id) && e.status.is_active())
        .map(|e| progress_line(e).trim().to_string())
        .collect();
    if active.is_empty() {
        return Ok(());
    }
    print!("\r\x1b[2K  {}", active.join("  |  "));
    io::stdout().flush()?;
    Ok(())
}

fn clear_line() {
    print!("\r\x1b[2K");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> FileDescriptor {
        FileDescriptor {
            id: id.into(),
            name: format!("{id}.bin"),
            size: 1,
            mime_type: String::new(),
            last_modified: None,
        }
    }

    #[test]
    fn test_select_all_by_default() {
        let files = vec![descriptor("file_0"), descriptor("file_1")];
        assert_eq!(select_files(&files, &[]).unwrap(), files);
    }

    #[test]
    fn test_select_subset() {
        let files = vec![descriptor("file_0"), descriptor("file_1")];
        let picked = select_files(&files, &["file_1".to_string()]).unwrap();
        assert_eq!(picked, vec![descriptor("file_1")]);
    }

    #[test]
    fn test_select_unknown_id() {
        let files = vec![descriptor("file_0")];
        assert!(select_files(&files, &["file_9".to_string()]).is_err());
    }
}
