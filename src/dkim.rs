//! DKIM signature verification
//!
//! A thin wrapper around `mail-auth`: one [`VerificationResult`] per
//! `DKIM-Signature` header, with every non-pass outcome (including DNS
//! lookup failures) folded into [`SignatureStatus::Fail`].
//!
//! Domain keys go through a [`KeyCache`], which remembers DNS answers
//! for their TTL and can hold keys pinned by the caller.

use crate::error::{Error, Result};
use mail_auth::common::parse::TxtRecordParser;
use mail_auth::common::verify::DomainKey;
use mail_auth::{
    AuthenticatedMessage, DkimOutput, DkimResult, MessageAuthenticator, Parameters,
    ResolverCache, Txt,
};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Outcome of checking one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    Pass,
    Fail(String),
}

/// Verification outcome for one signing domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub domain: String,
    pub status: SignatureStatus,
}

impl Serialize for VerificationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("VerificationResult", 3)?;
        state.serialize_field("domain", &self.domain)?;
        match &self.status {
            SignatureStatus::Pass => {
                state.serialize_field("status", "pass")?;
                state.skip_field("reason")?;
            }
            SignatureStatus::Fail(reason) => {
                state.serialize_field("status", "fail")?;
                state.serialize_field("reason", reason)?;
            }
        }
        state.end()
    }
}

impl VerificationResult {
    #[must_use]
    pub fn pass(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            status: SignatureStatus::Pass,
        }
    }

    #[must_use]
    pub fn fail(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            status: SignatureStatus::Fail(reason.into()),
        }
    }

    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self.status, SignatureStatus::Pass)
    }
}

/// Something that can check the signatures on a raw message.
///
/// Verification never fails as a whole: problems with individual
/// signatures are reported in the returned results.
pub trait SignatureVerifier {
    fn verify(&self, raw: &[u8]) -> impl Future<Output = Vec<VerificationResult>>;
}

/// `_domainkey` TXT records by fully qualified name.
///
/// Entries learned from DNS expire with their TTL; pinned entries
/// never do and are never replaced by a lookup.
#[derive(Default)]
pub struct KeyCache {
    entries: Mutex<HashMap<String, (Txt, Option<Instant>)>>,
}

impl KeyCache {
    /// Pin `record` (e.g. `v=DKIM1; k=ed25519; p=...`) as the key for
    /// `selector` at `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the record does not parse.
    pub fn pin(&self, selector: &str, domain: &str, record: &str) -> Result<()> {
        let name = format!("{selector}._domainkey.{domain}.").to_lowercase();
        let key = DomainKey::parse(record.as_bytes())
            .map_err(|e| Error::Config(format!("Invalid domain key for {name}: {e}")))?;
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(name, (Txt::from(key), None));
        }
        Ok(())
    }
}

impl ResolverCache<String, Txt> for KeyCache {
    fn get<Q>(&self, name: &Q) -> Option<Txt>
    where
        String: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entries = self.entries.lock().ok()?;
        match entries.get(name)? {
            (_, Some(valid_until)) if *valid_until <= Instant::now() => None,
            (txt, _) => Some(txt.clone()),
        }
    }

    fn remove<Q>(&self, name: &Q) -> Option<Txt>
    where
        String: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().ok()?.remove(name).map(|(txt, _)| txt)
    }

    fn insert(&self, key: String, value: Txt, valid_until: Instant) {
        debug!("Caching domain key {}", key);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, (value, Some(valid_until)));
        }
    }
}

/// Verifier backed by `mail-auth` and live DNS key lookups.
pub struct DkimVerifier {
    authenticator: MessageAuthenticator,
    keys: KeyCache,
}

impl DkimVerifier {
    /// Verifier resolving domain keys over DNS-over-TLS (Cloudflare).
    ///
    /// # Errors
    ///
    /// Returns an error if the resolver cannot be configured.
    pub fn new() -> Result<Self> {
        let authenticator = MessageAuthenticator::new_cloudflare_tls()
            .map_err(|e| Error::Config(format!("DNS resolver setup failed: {e}")))?;
        Ok(Self::with_authenticator(authenticator))
    }

    #[must_use]
    pub fn with_authenticator(authenticator: MessageAuthenticator) -> Self {
        Self {
            authenticator,
            keys: KeyCache::default(),
        }
    }

    /// Use `record` for `selector` at `domain` instead of asking DNS.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the record does not parse.
    pub fn with_pinned_key(self, selector: &str, domain: &str, record: &str) -> Result<Self> {
        self.keys.pin(selector, domain, record)?;
        Ok(self)
    }
}

impl SignatureVerifier for DkimVerifier {
    async fn verify(&self, raw: &[u8]) -> Vec<VerificationResult> {
        let Some(message) = AuthenticatedMessage::parse(raw) else {
            warn!("Message could not be parsed for DKIM verification");
            return Vec::new();
        };
        let params = Parameters::new(&message).with_txt_cache(&self.keys);
        let outputs = self.authenticator.verify_dkim(params).await;
        outputs.iter().map(to_result).collect()
    }
}

fn to_result(output: &DkimOutput<'_>) -> VerificationResult {
    let domain = output
        .signature()
        .map_or_else(|| "unknown".to_string(), |sig| sig.d.clone());
    VerificationResult {
        domain,
        status: status_of(output.result()),
    }
}

fn status_of(result: &DkimResult) -> SignatureStatus {
    match result {
        DkimResult::Pass => SignatureStatus::Pass,
        DkimResult::Neutral(e)
        | DkimResult::Fail(e)
        | DkimResult::PermError(e)
        | DkimResult::TempError(e) => SignatureStatus::Fail(e.to_string()),
        DkimResult::None => SignatureStatus::Fail("signature not evaluated".to_string()),
    }
}

/// Log each result: valid signatures at info, invalid ones at error.
/// An empty slice (unsigned message) logs nothing.
pub fn log_results(results: &[VerificationResult]) {
    for result in results {
        match &result.status {
            SignatureStatus::Pass => {
                info!("Valid DKIM signature for {}", result.domain);
            }
            SignatureStatus::Fail(reason) => {
                error!("Invalid DKIM signature for {}: {}", result.domain, reason);
            }
        }
    }
}
