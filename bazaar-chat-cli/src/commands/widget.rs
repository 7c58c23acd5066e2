use std::path::PathBuf;

use anyhow::{Context, Result};
use client::{WidgetController, logging::initialize_tracing};
use shared::models::{SenderRole, Timestamp};
use tracing::info;

use super::runtime::{self, ChatRuntime, SessionArgs};

const HELP: &str = "Type a message to send it. /open toggles the conversation, /unread shows the badge, /quit leaves.";

pub async fn run(config_path: Option<PathBuf>, args: SessionArgs) -> Result<()> {
    let config = runtime::load_config(config_path, args, SenderRole::Customer)?;
    initialize_tracing(&config.logging);
    info!(participant = %config.participant.id, "starting support widget");

    let chat = ChatRuntime::build(&config)?;
    let widget = WidgetController::new(chat.engine.clone());
    let events = widget.start().await.context("failed to start chat session")?;
    let printer = runtime::spawn_printer(chat.engine.session());
    println!("{HELP}");

    let viewer_id = config.participant.id.clone();
    let mut lines = runtime::stdin_lines();
    while let Some(line) = runtime::next_line(&mut lines).await? {
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/help" => println!("{HELP}"),
            "/unread" => println!("* {} unread", widget.unread_count()),
            "/open" => match widget.toggle().await {
                Ok(true) => {
                    let now = Timestamp::now();
                    for message in widget.messages() {
                        println!("{}", runtime::format_message(&message, &viewer_id, &now));
                    }
                }
                Ok(false) => println!("* conversation closed"),
                Err(err) => eprintln!("! could not open the conversation: {err}"),
            },
            body => {
                if let Err(err) = widget.send(body).await {
                    eprintln!("! message not sent: {err}");
                }
            }
        }
    }

    events.abort();
    printer.abort();
    chat.shutdown().await;
    Ok(())
}
