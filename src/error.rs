//! Error types for mailprobe

use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("IMAP connection lost")]
    ConnectionLost,

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("no message with trace ID {trace_id} arrived within {waited:?}")]
    Timeout { trace_id: String, waited: Duration },

    #[error("wait for trace ID {0} was cancelled")]
    Cancelled(String),

    #[error("no valid DKIM signature on any message with trace ID {0}")]
    Unverified(String),
}

impl Error {
    /// Whether the failure is a network hiccup worth a reconnect, as
    /// opposed to a protocol or configuration problem that will not go
    /// away on its own.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionLost => true,
            Self::Io(e) => is_transient_kind(e.kind()),
            _ => false,
        }
    }

    /// Wrap an async-imap error, keeping I/O and connection-loss
    /// failures distinguishable from protocol rejections.
    pub(crate) fn imap(context: &str, err: async_imap::error::Error) -> Self {
        match err {
            async_imap::error::Error::Io(e) => Self::Io(e),
            async_imap::error::Error::ConnectionLost => Self::ConnectionLost,
            other => Self::Imap(format!("{context}: {other}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// I/O failures that a fresh connection may not hit again.
pub(crate) const fn is_transient_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::Interrupted
    )
}
