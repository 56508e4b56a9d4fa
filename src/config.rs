//! Connection configuration for the relay and the destination mailbox

use crate::error::{Error, Result};
use crate::folder::Folder;
use std::fmt;

/// Submission port used when the relay address carries none.
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Implicit-TLS IMAP port used when the mailbox address carries none.
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// How the IMAP connection is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// TLS from the first byte (IMAPS, port 993).
    #[default]
    Tls,
    /// Plain TCP upgraded with the STARTTLS command.
    StartTls,
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tls => f.write_str("tls"),
            Self::StartTls => f.write_str("starttls"),
        }
    }
}

/// Destination mailbox that the poller watches.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub address: String,
    pub username: String,
    pub password: String,
    pub mailbox: Folder,
    pub security: Security,
    pub accept_invalid_certs: bool,
}

impl ImapConfig {
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: password.into(),
            mailbox: Folder::Inbox,
            security: Security::default(),
            accept_invalid_certs: false,
        }
    }

    /// `host:port`, with `:993` appended when no port was given.
    #[must_use]
    pub fn addr(&self) -> String {
        with_default_port(&self.address, DEFAULT_IMAP_PORT)
    }

    /// Split [`Self::addr`] into host and numeric port.
    pub fn host_port(&self) -> Result<(String, u16)> {
        split_host_port(&self.addr())
    }
}

/// Relay used to submit the test message.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub address: String,
    /// Empty means anonymous submission.
    pub username: String,
    pub password: String,
    pub accept_invalid_certs: bool,
}

impl SmtpConfig {
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: password.into(),
            accept_invalid_certs: false,
        }
    }

    /// `host:port`, with `:587` appended when no port was given.
    #[must_use]
    pub fn addr(&self) -> String {
        with_default_port(&self.address, DEFAULT_SMTP_PORT)
    }

    pub fn host_port(&self) -> Result<(String, u16)> {
        split_host_port(&self.addr())
    }

    #[must_use]
    pub const fn uses_auth(&self) -> bool {
        !self.username.is_empty()
    }
}

/// Any colon counts as "port already present", which also lets
/// bracketed IPv6 literals through untouched.
fn with_default_port(address: &str, port: u16) -> String {
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:{port}")
    }
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("Missing port in address '{addr}'")))?;
    let port = port
        .parse()
        .map_err(|e| Error::Config(format!("Invalid port in address '{addr}': {e}")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(Error::Config(format!("Missing host in address '{addr}'")));
    }
    Ok((host.to_string(), port))
}
