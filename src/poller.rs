//! Delivery-confirmation poller
//!
//! Owns one authenticated mailbox session and repeatedly searches it for
//! a trace ID. A round that finds matches fetches them in one batched
//! `UID FETCH`, verifies each message's DKIM signatures, then marks the
//! whole set `\Deleted` and expunges it.
//!
//! ```text
//! Idle -> Searching -> (nothing) Waiting -> Searching ...
//!                   -> Fetching -> Verifying -> Cleaning -> Done
//! any state -> Aborted   (fatal error, deadline, cancellation)
//! ```

use crate::config::ImapConfig;
use crate::connection::{self, ImapSession, TaggedReply};
use crate::dkim::{self, DkimVerifier, SignatureVerifier, VerificationResult};
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::trace::TraceId;
use async_imap::imap_proto::{AttributeValue, MailboxDatum, Response};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};

/// Delay between two searches of the mailbox.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Fetched messages buffered between the fetch and verify halves.
const FETCH_QUEUE_DEPTH: usize = 8;

/// Where the poller currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    Idle,
    Searching,
    Waiting,
    Fetching,
    Verifying,
    Cleaning,
    Done,
    Aborted,
}

/// Knobs for [`Poller::wait`].
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    /// `None` waits forever.
    pub deadline: Option<Duration>,
    /// Consecutive transient failures tolerated before giving up.
    pub max_transient_retries: u32,
    /// Fail the run unless some found message carries a valid signature.
    pub require_valid_signature: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            deadline: None,
            max_transient_retries: 3,
            require_valid_signature: false,
        }
    }
}

/// UIDs matched during one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoundSet(BTreeSet<u32>);

impl FoundSet {
    pub fn insert(&mut self, uid: u32) {
        self.0.insert(uid);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// IMAP sequence-set syntax, e.g. `3,7,9`.
    #[must_use]
    pub fn to_sequence_set(&self) -> String {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl FromIterator<u32> for FoundSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One message as it came off the wire.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub uid: u32,
    pub flags: Vec<Flag>,
    pub body: Vec<u8>,
}

/// A probe message that was found, checked, and removed.
#[derive(Debug, Clone, Serialize)]
pub struct FoundMessage {
    pub uid: u32,
    pub flags: Vec<Flag>,
    pub size: usize,
    pub signatures: Vec<VerificationResult>,
}

/// Successful outcome of [`Poller::wait`].
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub trace_id: TraceId,
    pub messages: Vec<FoundMessage>,
    pub rounds: u32,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

impl Delivery {
    /// Whether any delivered copy carried at least one valid signature.
    #[must_use]
    pub fn has_valid_signature(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.signatures.iter().any(VerificationResult::is_pass))
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Watches one mailbox for probe messages.
pub struct Poller<V = DkimVerifier> {
    config: ImapConfig,
    session: ImapSession,
    verifier: V,
    settings: PollSettings,
    cancel: CancellationToken,
    state: watch::Sender<PollState>,
    span: Span,
}

impl Poller<DkimVerifier> {
    /// Connect, log in, and select the configured mailbox, verifying
    /// signatures against live DNS.
    ///
    /// # Errors
    ///
    /// Returns an error if the resolver cannot be set up or if the dial,
    /// login, or SELECT fails.
    pub async fn connect(config: ImapConfig) -> Result<Self> {
        let verifier = DkimVerifier::new()?;
        Self::connect_with(config, verifier).await
    }
}

impl<V: SignatureVerifier> Poller<V> {
    /// Like [`Poller::connect`], with a caller-supplied verifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the dial, login, or SELECT fails.
    pub async fn connect_with(config: ImapConfig, verifier: V) -> Result<Self> {
        let span = info_span!("poller", mailbox = %config.mailbox, server = %config.addr());
        let session = open_session(&config).instrument(span.clone()).await?;
        Ok(Self {
            config,
            session,
            verifier,
            settings: PollSettings::default(),
            cancel: CancellationToken::new(),
            state: watch::channel(PollState::Idle).0,
            span,
        })
    }

    #[must_use]
    pub fn with_settings(mut self, settings: PollSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Abort [`Poller::wait`] when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Scope all of this poller's events under `span`.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    /// Block until a message carrying `trace` has been found, verified,
    /// and deleted.
    ///
    /// Without a deadline this waits indefinitely for the message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] or [`Error::Cancelled`] when the wait
    /// is cut short, [`Error::Unverified`] when a valid signature was
    /// required but none was found, and any terminal I/O or protocol
    /// error from the session.
    pub async fn wait(&mut self, trace: &TraceId) -> Result<Delivery> {
        info!(parent: &self.span, "Wait for message with id {}", trace);
        let started = Instant::now();
        let deadline = self.settings.deadline;
        let cancel = self.cancel.clone();
        let span = self.span.clone();

        let outcome = tokio::select! {
            res = self.poll(trace, started).instrument(span) => res,
            () = cancel.cancelled() => Err(Error::Cancelled(trace.to_string())),
            () = expire(started, deadline) => Err(Error::Timeout {
                trace_id: trace.to_string(),
                waited: started.elapsed(),
            }),
        };

        match outcome {
            Ok(delivery) => {
                self.transition(PollState::Done);
                if self.settings.require_valid_signature && !delivery.has_valid_signature() {
                    return Err(Error::Unverified(trace.to_string()));
                }
                Ok(delivery)
            }
            Err(e) => {
                self.transition(PollState::Aborted);
                Err(e)
            }
        }
    }

    /// Log out and drop the session.
    pub async fn close(mut self) {
        let span = self.span.clone();
        async {
            if let Err(e) = self.session.logout().await {
                debug!("Logout failed: {}", e);
            }
        }
        .instrument(span)
        .await;
    }

    async fn poll(&mut self, trace: &TraceId, started: Instant) -> Result<Delivery> {
        let mut rounds = 0;
        let mut transient_failures = 0;

        loop {
            rounds += 1;
            match self.round(trace).await {
                Ok(messages) if !messages.is_empty() => {
                    let found: FoundSet = messages.iter().map(|m| m.uid).collect();
                    self.cleanup(&found).await?;
                    return Ok(Delivery {
                        trace_id: trace.clone(),
                        messages,
                        rounds,
                        elapsed: started.elapsed(),
                    });
                }
                Ok(_) => transient_failures = 0,
                Err(e) if e.is_transient() => self.recover(e, &mut transient_failures).await?,
                Err(e) => return Err(e),
            }

            self.transition(PollState::Waiting);
            debug!("Wait for message");
            tokio::time::sleep(self.settings.interval).await;
        }
    }

    /// One search, and if it hits, one fetch-and-verify pass.
    async fn round(&mut self, trace: &TraceId) -> Result<Vec<FoundMessage>> {
        self.transition(PollState::Searching);
        let uids = self.search(trace).await?;
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        info!("Found {} candidate message(s)", uids.len());

        self.transition(PollState::Fetching);
        let (tx, rx) = mpsc::channel(FETCH_QUEUE_DEPTH);
        let uid_set = uids.to_sequence_set();
        let producer = fetch_into(&mut self.session, &uid_set, tx);
        let consumer = consume(rx, &self.verifier, trace, &self.state);
        let ((), found) = tokio::join!(producer, consumer);
        let found = found?;

        if found.is_empty() {
            warn!("Search matched {} but no message carried the exact trace ID", uid_set);
        }
        Ok(found)
    }

    async fn search(&mut self, trace: &TraceId) -> Result<FoundSet> {
        let command = format!("UID SEARCH {}", trace.search_query());
        let mut reply = TaggedReply::start(&mut self.session, "Search failed", &command).await?;
        let mut uids = FoundSet::default();
        while let Some(ids) = reply
            .next(|response| match response {
                Response::MailboxData(MailboxDatum::Search(ids)) => Some(Ok(ids.clone())),
                _ => None,
            })
            .await?
        {
            ids.into_iter().for_each(|uid| uids.insert(uid));
        }
        Ok(uids)
    }

    async fn cleanup(&mut self, found: &FoundSet) -> Result<()> {
        self.transition(PollState::Cleaning);
        debug!("Cleanup messages with the given id");
        let uid_set = found.to_sequence_set();

        self.session
            .run_command_and_check_ok(format!("UID STORE {uid_set} {}", Flag::Deleted.add_silently()))
            .await
            .map_err(|e| Error::imap("Store failed", e))?;

        let expunged = TaggedReply::start(&mut self.session, "Expunge failed", "EXPUNGE")
            .await?
            .finish(|response| matches!(response, Response::Expunge(_)))
            .await?;

        info!("Deleted {} message(s), {} expunged", found.len(), expunged);
        Ok(())
    }

    /// Replace the session after a transient failure.
    ///
    /// Each reconnect attempt counts against `max_transient_retries`, so
    /// a server that stays unreachable ends the wait with the last error.
    async fn recover(&mut self, mut err: Error, failures: &mut u32) -> Result<()> {
        loop {
            if *failures >= self.settings.max_transient_retries {
                return Err(err);
            }
            *failures += 1;
            warn!(
                "Transient failure ({}/{}): {}; reconnecting",
                failures, self.settings.max_transient_retries, err
            );

            match open_session(&self.config).await {
                Ok(session) => {
                    self.session = session;
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    err = e;
                    self.transition(PollState::Waiting);
                    tokio::time::sleep(self.settings.interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn transition(&self, next: PollState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "Poller state");
        }
    }
}

async fn open_session(config: &ImapConfig) -> Result<ImapSession> {
    let mut session = connection::connect(config).await?;
    connection::select(&mut session, &config.mailbox).await?;
    Ok(session)
}

async fn expire(started: Instant, deadline: Option<Duration>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(started + d).await,
        None => std::future::pending().await,
    }
}

/// Producer half: stream one batched `UID FETCH` into `tx`.
///
/// Errors are sent down the channel rather than returned so the
/// consumer sees them before it considers the round finished.
async fn fetch_into(
    session: &mut ImapSession,
    uid_set: &str,
    tx: mpsc::Sender<Result<FetchedMessage>>,
) {
    if let Err(e) = stream_fetch(session, uid_set, &tx).await {
        let _ = tx.send(Err(e)).await;
    }
}

async fn stream_fetch(
    session: &mut ImapSession,
    uid_set: &str,
    tx: &mpsc::Sender<Result<FetchedMessage>>,
) -> Result<()> {
    let command = format!("UID FETCH {uid_set} (UID FLAGS BODY.PEEK[])");
    let mut reply = TaggedReply::start(session, "Fetch failed", &command).await?;
    let mut fetched = 0;
    while let Some(message) = reply.next(fetched_message).await? {
        fetched += 1;
        if tx.send(Ok(message)).await.is_err() {
            return Ok(());
        }
    }
    // The search just matched these UIDs.
    if fetched == 0 {
        return Err(Error::Imap(format!(
            "Fetch failed: server returned none of UIDs {uid_set}"
        )));
    }
    Ok(())
}

/// A fetched message, or `None` for untagged data that is not one
/// (such as a flag update without a body).
fn fetched_message(response: &Response<'_>) -> Option<Result<FetchedMessage>> {
    let Response::Fetch(_, attrs) = response else {
        return None;
    };
    let mut uid = None;
    let mut flags = Vec::new();
    let mut body = None;
    for attr in attrs {
        match attr {
            AttributeValue::Uid(id) => uid = Some(*id),
            AttributeValue::Flags(raw) => flags.extend(
                raw.iter()
                    .map(|f| Flag::from(&async_imap::types::Flag::from(f.as_ref()))),
            ),
            AttributeValue::BodySection {
                section: None,
                data: Some(data),
                ..
            }
            | AttributeValue::Rfc822(Some(data)) => body = Some(data.to_vec()),
            _ => {}
        }
    }
    let body = body?;
    Some(
        uid.map(|uid| FetchedMessage { uid, flags, body })
            .ok_or_else(|| Error::Imap("Server returned a message without UID".into())),
    )
}

/// Consumer half: verify and account for each fetched message, in order.
async fn consume<V: SignatureVerifier>(
    mut rx: mpsc::Receiver<Result<FetchedMessage>>,
    verifier: &V,
    trace: &TraceId,
    state: &watch::Sender<PollState>,
) -> Result<Vec<FoundMessage>> {
    let mut found = Vec::new();
    while let Some(item) = rx.recv().await {
        let message = item?;
        if !trace.matches(&message.body) {
            debug!(uid = message.uid, "Trace header is not an exact match; skipping");
            continue;
        }

        state.send_replace(PollState::Verifying);
        let signatures = verifier.verify(&message.body).await;
        if signatures.is_empty() {
            debug!(uid = message.uid, "Message carries no DKIM signature");
        }
        dkim::log_results(&signatures);

        found.push(FoundMessage {
            uid: message.uid,
            flags: message.flags,
            size: message.body.len(),
            signatures,
        });
    }
    Ok(found)
}
