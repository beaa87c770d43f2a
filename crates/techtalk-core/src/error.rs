use std::time::Duration;

use thiserror::Error;

/// Why a completion stream ended without finishing the turn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("completion request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed stream: {0}")]
    Malformed(String),

    #[error("provider reported an error: {0}")]
    Api(String),

    #[error("no response data received for {0:?}")]
    Timeout(Duration),

    #[error("no API key configured for {0}")]
    MissingCredential(&'static str),
}

impl From<reqwest::Error> for StreamError {
    fn from(e: reqwest::Error) -> Self {
        StreamError::Transport(e.to_string())
    }
}

/// A send that was refused locally, before any request went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("message is empty")]
    EmptyInput,

    #[error("conversation not found")]
    UnknownConversation,

    #[error("a response is still streaming for this conversation")]
    Busy,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt {field} in store: {value}")]
    Corrupt { field: &'static str, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
