//! Mailbox selection
//!
//! The probe normally watches INBOX, but checking whether a test
//! message landed in the junk folder is just as useful, so the mailbox
//! is a typed value rather than a bare string.

use std::fmt;

/// An IMAP mailbox the poller can select.
///
/// # Examples
///
/// ```
/// use mailprobe::Folder;
///
/// assert_eq!(Folder::Inbox.as_str(), "INBOX");
/// assert_eq!(Folder::from("junk"), Folder::Junk);
/// assert_eq!(Folder::custom("Probes").as_str(), "Probes");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Folder {
    /// The INBOX folder (RFC 3501 required, case-insensitive).
    #[default]
    Inbox,
    /// Spam / junk messages.
    Junk,
    /// Any other server-specific mailbox name.
    Custom(String),
}

impl Folder {
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// The IMAP mailbox name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inbox => "INBOX",
            Self::Junk => "Junk",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Folder {
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("inbox") {
            Self::Inbox
        } else if s.eq_ignore_ascii_case("junk") {
            Self::Junk
        } else {
            Self::Custom(s.to_string())
        }
    }
}

impl From<String> for Folder {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}
