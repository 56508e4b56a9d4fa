//! Trace identifiers
//!
//! A trace ID ties a submitted probe message to its delivered copy. It
//! travels in a single custom header and is the only thing the poller
//! searches for.

use crate::error::{Error, Result};
use mailparse::MailHeaderMap;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Header carrying the trace ID on every probe message.
pub const TRACE_HEADER: &str = "X-Mailprobe-Trace-ID";

/// A validated, header-safe trace identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// A fresh random (UUID v4) identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a caller-supplied identifier.
    ///
    /// The value ends up verbatim in a header line and in an IMAP
    /// quoted string, so it must be printable ASCII without CR/LF and
    /// without surrounding whitespace.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(Error::Config("trace ID must not be empty".into()));
        }
        if value.trim() != value {
            return Err(Error::Config(
                "trace ID must not start or end with whitespace".into(),
            ));
        }
        if let Some(bad) = value.chars().find(|c| !(' '..='~').contains(c)) {
            return Err(Error::Config(format!(
                "trace ID contains unsupported character {bad:?}"
            )));
        }
        Ok(Self(value.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `HEADER <name> "<value>"` criterion for `UID SEARCH`.
    #[must_use]
    pub fn search_query(&self) -> String {
        let escaped = self.0.replace('\\', "\\\\").replace('"', "\\\"");
        format!("HEADER {TRACE_HEADER} \"{escaped}\"")
    }

    /// Whether `raw` carries a trace header equal to this ID.
    ///
    /// Servers match `HEADER` searches by substring, so a search hit is
    /// only a candidate until this returns true.
    #[must_use]
    pub fn matches(&self, raw: &[u8]) -> bool {
        let Ok((headers, _)) = mailparse::parse_headers(raw) else {
            return false;
        };
        headers
            .get_all_values(TRACE_HEADER)
            .iter()
            .any(|v| v.trim() == self.0)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
