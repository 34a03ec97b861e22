//! Text command implementation.

use anyhow::Result;
use tokio::io::AsyncReadExt;

use roomdrop_core::client::Client;
use roomdrop_core::code::code_from_input;

use super::{GlobalArgs, TextAction, TextArgs};
use crate::ui::CodeBox;

/// Run the text command.
pub async fn run(global: &GlobalArgs, args: &TextArgs) -> Result<()> {
    let config = super::load_config(global);
    let (client, _outputs) = Client::new(&config)?;
    let session = client.session();

    match &args.action {
        TextAction::Send { text } => {
            let text = match text {
                Some(text) => text.clone(),
                None => {
                    let mut buf = String::new();
                    tokio::io::stdin().read_to_string(&mut buf).await?;
                    buf
                }
            };

            let room = session.create_text_room(&text).await?;
            println!();
            CodeBox::new(room.code.as_str())
                .with_caption(&format!("{} characters", text.chars().count()))
                .display();
            println!();
            println!("  Link: {}", room.link);
            println!();
        }

        TextAction::Get { code } => {
            let code = code_from_input(code)?;
            let text = session.fetch_text(&code).await?;
            println!("{}", text);
        }
    }

    Ok(())
}
