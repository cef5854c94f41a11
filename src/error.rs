//! Unified error handling for slircb.
//!
//! Each pipeline stage has its own error enum; the top-level [`ClientError`]
//! is what the connection loop propagates.

use thiserror::Error;

/// Errors that end (or prevent) a connection.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls setup failed: {0}")]
    Tls(String),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("all configured servers failed")]
    AllServersFailed,
}

/// Errors produced by command and reactive handlers.
///
/// A handler error never ends the connection; the dispatcher converts it
/// into a single diagnostic reply to the originating target.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
}

/// Result type for handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Errors raised at handler registration time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Worker execution offloads to a blocking thread, which only makes
    /// sense for synchronous callables.
    #[error("handler '{0}' is async and cannot run on the blocking pool")]
    AsyncWorker(String),

    #[error("handler '{0}' is already registered")]
    Duplicate(String),

    #[error("invalid command name: {0:?}")]
    InvalidName(String),
}
