//! IMAP message flags
//!
//! Flags come back with every fetched probe message and `\Deleted` is
//! what cleanup stores, so they get a typed representation instead of
//! raw strings.

use serde::{Serialize, Serializer};
use std::fmt;

/// An IMAP message flag.
///
/// # Examples
///
/// ```
/// use mailprobe::Flag;
///
/// assert_eq!(Flag::Deleted.as_imap_str(), "\\Deleted");
/// assert_eq!(Flag::Keyword("$Junk".to_string()).as_imap_str(), "$Junk");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    /// Session-scoped `\Recent`; never stored by clients.
    Recent,
    /// A user-defined keyword flag (no `\` prefix).
    Keyword(String),
}

impl Flag {
    /// The IMAP wire representation of this flag.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Keyword(kw) => kw,
        }
    }

    /// `+FLAGS.SILENT (...)` store query that adds this flag without
    /// asking the server to echo the new flag list.
    #[must_use]
    pub fn add_silently(&self) -> String {
        format!("+FLAGS.SILENT ({})", self.as_imap_str())
    }
}

impl From<&async_imap::types::Flag<'_>> for Flag {
    fn from(flag: &async_imap::types::Flag<'_>) -> Self {
        use async_imap::types::Flag as Wire;
        match flag {
            Wire::Seen => Self::Seen,
            Wire::Answered => Self::Answered,
            Wire::Flagged => Self::Flagged,
            Wire::Deleted => Self::Deleted,
            Wire::Draft => Self::Draft,
            Wire::Recent => Self::Recent,
            Wire::MayCreate => Self::Keyword("\\*".to_string()),
            Wire::Custom(kw) => Self::Keyword(kw.to_string()),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

impl Serialize for Flag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_imap_str())
    }
}
