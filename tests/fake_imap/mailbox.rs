//! Test data model for the fake IMAP server
//!
//! ```ignore
//! let mailbox = MailboxBuilder::new()
//!     .folder("INBOX")
//!         .email(1, false, raw_probe_bytes)
//!         .email(2, true, unrelated_bytes)
//!     .folder("Junk")
//!     .build();
//! ```
//!
//! The `Mailbox` is shared with the server via `Arc<Mutex<_>>` so tests
//! can drop new messages in while a poller is waiting, and inspect what
//! is left after cleanup.

/// A complete mailbox: a collection of named folders.
#[derive(Debug, Clone)]
pub struct Mailbox {
    pub folders: Vec<Folder>,
}

impl Mailbox {
    /// Look up a folder by name (case-sensitive, matching real IMAP).
    pub fn get_folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.name == name)
    }

    pub fn get_folder_mut(&mut self, name: &str) -> Option<&mut Folder> {
        self.folders.iter_mut().find(|f| f.name == name)
    }

    /// UIDs currently stored in `folder`, in mailbox order.
    pub fn uids(&self, folder: &str) -> Vec<u32> {
        self.get_folder(folder)
            .map(|f| f.emails.iter().map(|e| e.uid).collect())
            .unwrap_or_default()
    }

    /// Append a message as a delivering MTA would, with the next UID.
    pub fn deliver(&mut self, folder: &str, raw: &[u8]) -> u32 {
        let folder = self
            .get_folder_mut(folder)
            .expect("deliver into an existing folder");
        let uid = folder.emails.iter().map(|e| e.uid).max().unwrap_or(0) + 1;
        folder.emails.push(TestEmail {
            uid,
            seen: false,
            deleted: false,
            raw: raw.to_vec(),
        });
        uid
    }
}

/// A single IMAP folder (e.g. "INBOX", "Junk").
#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    pub emails: Vec<TestEmail>,
}

/// A test email stored in a folder.
///
/// - `uid`: unique-per-folder number that never changes.
/// - `seen` / `deleted`: the `\Seen` and `\Deleted` flags. EXPUNGE
///   removes every message with `deleted` set.
/// - `raw`: the complete RFC 5322 message, returned by `BODY[]`.
#[derive(Debug, Clone)]
pub struct TestEmail {
    pub uid: u32,
    pub seen: bool,
    pub deleted: bool,
    pub raw: Vec<u8>,
}

impl TestEmail {
    /// Flag list as it appears inside `FLAGS (...)`.
    pub fn flag_list(&self) -> String {
        let mut flags = Vec::new();
        if self.seen {
            flags.push("\\Seen");
        }
        if self.deleted {
            flags.push("\\Deleted");
        }
        flags.join(" ")
    }
}

/// Builder for constructing a `Mailbox` step by step.
pub struct MailboxBuilder {
    folders: Vec<Folder>,
}

impl MailboxBuilder {
    pub fn new() -> Self {
        Self {
            folders: Vec::new(),
        }
    }

    /// Add a new folder. Subsequent `.email()` calls add to this folder.
    pub fn folder(mut self, name: &str) -> Self {
        self.folders.push(Folder {
            name: name.to_string(),
            emails: Vec::new(),
        });
        self
    }

    /// Add an email to the most recently added folder.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    pub fn email(mut self, uid: u32, seen: bool, raw: &[u8]) -> Self {
        self.folders
            .last_mut()
            .expect("call .folder() before .email()")
            .emails
            .push(TestEmail {
                uid,
                seen,
                deleted: false,
                raw: raw.to_vec(),
            });
        self
    }

    pub fn build(self) -> Mailbox {
        Mailbox {
            folders: self.folders,
        }
    }
}
