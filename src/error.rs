// src/error.rs
//! Error taxonomy shared across the pipeline.
//!
//! - `ConfigError`: fatal at startup.
//! - `FetchError`: one source failed; the cycle continues without it.
//! - `StorageError`: persistence failed; the current cycle aborts.
//! - `DispatchError`: one action failed; other actions continue.

use std::path::PathBuf;

use crate::dispatch::ActionType;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("source {source_name}: http request failed: {error}")]
    Http {
        source_name: String,
        #[source]
        error: reqwest::Error,
    },

    #[error("source {source_name}: unexpected http status {status}")]
    Status { source_name: String, status: u16 },

    #[error("source {source_name}: feed parse failed: {message}")]
    Parse { source_name: String, message: String },

    #[error("source {source_name}: task failed: {message}")]
    Task { source_name: String, message: String },
}

impl FetchError {
    pub fn source_name(&self) -> &str {
        match self {
            FetchError::Http { source_name, .. }
            | FetchError::Status { source_name, .. }
            | FetchError::Parse { source_name, .. }
            | FetchError::Task { source_name, .. } => source_name,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding stored payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no notifier registered for action `{0}`")]
    NoNotifier(ActionType),

    #[error("notifier `{channel}` failed for rule {rule}: {error:#}")]
    Notify {
        channel: &'static str,
        rule: String,
        error: anyhow::Error,
    },
}
