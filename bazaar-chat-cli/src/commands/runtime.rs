//! Wiring shared by the `widget` and `panel` commands: configuration, the
//! engine over a websocket session, and terminal input and output.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Args;
use client::{
    ConnectionSession, RestBootstrap, SessionEvent, SyncEngine, WarmStartStore,
    WebSocketTransport,
};
use shared::{
    config::{Config, ConfigOverrides},
    models::{Message, SenderRole, Timestamp},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::broadcast::error::RecvError,
    task::JoinHandle,
};
use url::Url;

#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Participant id to register as
    #[arg(long, short)]
    pub participant: Option<String>,

    /// Chat REST API base URL (e.g., <http://localhost:8080/api/chat/>)
    #[arg(long)]
    pub api_url: Option<Url>,

    /// Chat socket URL (e.g., <ws://localhost:8080/chat>)
    #[arg(long)]
    pub socket_url: Option<Url>,

    /// Log level or filter directive (e.g., debug or client=trace)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl SessionArgs {
    fn into_overrides(self, role: SenderRole) -> ConfigOverrides {
        ConfigOverrides {
            participant_id: self.participant,
            role: Some(role),
            api_base_url: self.api_url,
            socket_url: self.socket_url,
            log_level: self.log_level,
        }
    }
}

/// Resolve the configuration for a session acting as `role`.
///
/// # Errors
/// Returns an error when the file cannot be loaded or validation fails.
pub fn load_config(path: Option<PathBuf>, args: SessionArgs, role: SenderRole) -> Result<Config> {
    Config::load_config(path, args.into_overrides(role)).context("failed to load configuration")
}

/// A sync engine over a live websocket session.
pub struct ChatRuntime {
    pub engine: SyncEngine,
    pump: JoinHandle<()>,
}

impl ChatRuntime {
    /// # Errors
    /// Returns an error when the REST client cannot be built.
    pub fn build(config: &Config) -> Result<Self> {
        let (transport, events) = WebSocketTransport::new(
            &config.server,
            config.reconnect.clone(),
            config.sync.event_buffer,
        );
        let session = ConnectionSession::new(config.participant(), Arc::new(transport), &config.sync);
        let pump = session.spawn(events);

        let bootstrap = RestBootstrap::new(&config.server).context("failed to build REST client")?;
        let storage = config
            .storage
            .enabled
            .then(|| WarmStartStore::new(config.storage.resolved_directory()));

        Ok(Self {
            engine: SyncEngine::new(session, Arc::new(bootstrap), storage, &config.sync),
            pump,
        })
    }

    pub async fn shutdown(self) {
        self.engine.persist().await;
        self.engine.session().disconnect().await;
        self.pump.abort();
    }
}

pub fn stdin_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}

/// Next input line, or `None` on end of input or Ctrl-C.
///
/// # Errors
/// Returns an error when stdin cannot be read.
pub async fn next_line(lines: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    tokio::select! {
        line = lines.next_line() => line.context("failed to read input"),
        _ = tokio::signal::ctrl_c() => Ok(None),
    }
}

#[must_use]
pub fn format_message(message: &Message, viewer_id: &str, now: &Timestamp) -> String {
    let sender = if message.sender_id == viewer_id {
        "you"
    } else {
        message.sender_id.as_str()
    };
    let status = if message.is_pending() { " (sending)" } else { "" };
    format!(
        "[{}] {sender}: {}{status}",
        message.created_at.relative_label(now),
        message.body
    )
}

/// Print connection changes and messages from other participants.
pub fn spawn_printer(session: &Arc<ConnectionSession>) -> JoinHandle<()> {
    let mut events = session.subscribe();
    let viewer_id = session.participant().id.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::NewMessage(message)) if message.sender_id != viewer_id => {
                    println!("{}", format_message(&message, &viewer_id, &Timestamp::now()));
                }
                Ok(SessionEvent::Registered { resumed: true }) => println!("* reconnected"),
                Ok(SessionEvent::Registered { resumed: false }) => println!("* connected"),
                Ok(SessionEvent::Disconnected { reason }) => println!("* disconnected: {reason}"),
                Ok(SessionEvent::NewMessage(_)) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}
