//! # Configuration
//!
//! Client configuration for chat sessions: who the participant is, where the
//! remote system lives, and how the sync engine, reconnect policy, warm-start
//! storage and logging behave.

pub mod client;

pub use client::{
    Config, ConfigError, ConfigOverrides, LogFormat, LoggingConfig, ParticipantConfig,
    ReconnectConfig, ServerConfig, StorageConfig, SyncConfig,
};
