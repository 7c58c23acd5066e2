use std::path::PathBuf;

use anyhow::{Context, Result};
use client::{ConversationDirectory, PanelController, logging::initialize_tracing};
use shared::models::{SenderRole, Timestamp};
use tracing::info;

use super::runtime::{self, ChatRuntime, SessionArgs};

const HELP: &str = "/list shows conversations, /open <id> selects one, /close clears the selection, /refresh reloads the directory, /quit leaves. Anything else is sent to the selected customer.";

/// One line per conversation, most recent first. The selection is marked
/// with `>`.
#[must_use]
pub fn render_directory(
    directory: &ConversationDirectory,
    selected: Option<&str>,
    now: &Timestamp,
) -> Vec<String> {
    directory
        .entries()
        .iter()
        .map(|entry| {
            let marker = if selected == Some(entry.counterpart_id.as_str()) {
                '>'
            } else {
                ' '
            };
            let when = entry
                .last_message_time
                .map(|at| at.relative_label(now))
                .unwrap_or_default();
            let unread = match entry.unread_count {
                0 => String::new(),
                count => format!(" ({count})"),
            };
            format!(
                "{marker} {:<20} {when:>6}  {}{unread}  [{}]",
                entry.display_name,
                entry.last_message.as_deref().unwrap_or(""),
                entry.counterpart_id
            )
        })
        .collect()
}

pub async fn run(config_path: Option<PathBuf>, args: SessionArgs) -> Result<()> {
    let config = runtime::load_config(config_path, args, SenderRole::Operator)?;
    initialize_tracing(&config.logging);
    info!(participant = %config.participant.id, "starting operator panel");

    let chat = ChatRuntime::build(&config)?;
    let panel = PanelController::new(chat.engine.clone());
    let events = panel.start().await.context("failed to start chat session")?;
    let printer = runtime::spawn_printer(chat.engine.session());
    println!("{HELP}");

    let viewer_id = config.participant.id.clone();
    let mut lines = runtime::stdin_lines();
    while let Some(line) = runtime::next_line(&mut lines).await? {
        let line = line.trim();
        match line.split_once(' ').map_or((line, ""), |(command, rest)| (command, rest.trim())) {
            ("", _) => {}
            ("/quit", _) => break,
            ("/help", _) => println!("{HELP}"),
            ("/list", _) => {
                let now = Timestamp::now();
                let selected = panel.selected();
                for row in render_directory(&panel.directory(), selected.as_deref(), &now) {
                    println!("{row}");
                }
                println!("* {} unread", panel.total_unread());
            }
            ("/open", counterpart_id) if !counterpart_id.is_empty() => {
                match panel.select(counterpart_id).await {
                    Ok(messages) => {
                        let now = Timestamp::now();
                        for message in &messages {
                            println!("{}", runtime::format_message(message, &viewer_id, &now));
                        }
                    }
                    Err(err) => eprintln!("! could not open {counterpart_id}: {err}"),
                }
            }
            ("/close", _) => panel.clear_selection(),
            ("/refresh", _) => {
                if let Err(err) = panel.refresh_directory().await {
                    eprintln!("! directory refresh failed: {err}");
                }
            }
            _ if line.starts_with('/') => println!("{HELP}"),
            _ => {
                if let Err(err) = panel.send(line).await {
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

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::ConversationSummary;

    fn summary(id: &str, name: &str, unread_count: u32, at: Timestamp) -> ConversationSummary {
        ConversationSummary {
            counterpart_id: id.into(),
            display_name: name.into(),
            email: None,
            avatar: None,
            last_message: Some("is this still available?".into()),
            last_message_time: Some(at),
            unread_count,
        }
    }

    #[test]
    fn rows_show_selection_and_unread() {
        let now = Timestamp::now();
        let directory = ConversationDirectory::from_summaries(vec![
            summary("u1", "Ada", 2, now),
            summary("u2", "Grace", 0, now.plus_millis(-60_000)),
        ]);

        let rows = render_directory(&directory, Some("u2"), &now);

        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("  Ada"));
        assert!(rows[0].contains("(2)"));
        assert!(rows[0].ends_with("[u1]"));
        assert!(rows[1].starts_with("> Grace"));
        assert!(!rows[1].contains('('));
    }
}
