//! End-to-end mail delivery probe
//!
//! Submits a test message carrying a unique trace ID through an SMTP
//! relay, then watches the destination IMAP mailbox until the message
//! shows up. Each delivered copy has its DKIM signatures checked and
//! is deleted afterwards, leaving the mailbox as it was.
//!
//! ```no_run
//! # async fn run() -> mailprobe::Result<()> {
//! use mailprobe::{ImapConfig, Poller, Sender, SmtpConfig, TraceId};
//!
//! let trace = TraceId::generate();
//! let mut poller = Poller::connect(ImapConfig::new("imap.example.com", "probe", "secret")).await?;
//! Sender::new(SmtpConfig::new("relay.example.com", "", ""))
//!     .send(&trace, "probe@example.org", "probe@example.com")
//!     .await?;
//! let delivery = poller.wait(&trace).await;
//! poller.close().await;
//! println!("found {} message(s)", delivery?.messages.len());
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod dkim;
mod error;
mod flag;
mod folder;
mod poller;
mod sender;
mod trace;

pub use config::{DEFAULT_IMAP_PORT, DEFAULT_SMTP_PORT, ImapConfig, Security, SmtpConfig};
pub use dkim::{DkimVerifier, SignatureStatus, SignatureVerifier, VerificationResult};
pub use error::{Error, Result};
pub use flag::Flag;
pub use folder::Folder;
pub use poller::{
    Delivery, FetchedMessage, FoundMessage, FoundSet, POLL_INTERVAL, PollSettings, PollState,
    Poller,
};
pub use sender::{Sender, build_message};
pub use trace::{TRACE_HEADER, TraceId};
