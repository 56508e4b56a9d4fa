//! Probe message construction and SMTP submission

use crate::config::SmtpConfig;
use crate::error::{Error, Result};
use crate::trace::{TRACE_HEADER, TraceId};
use chrono::{DateTime, Utc};
use lettre::address::{Address, Envelope};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::{debug, info};
use uuid::Uuid;

pub const SUBJECT: &str = "Mailprobe test mail";
pub const BODY: &str = "This is a delivery test message sent by mailprobe.\n";

/// Port on which relays expect TLS from the first byte.
const SMTPS_PORT: u16 = 465;

/// Raw RFC 5322 probe message.
///
/// Headers and body use CRLF throughout; `\n` in `body` is converted.
#[must_use]
pub fn build_message(
    trace: &TraceId,
    to: &str,
    from: &str,
    date: DateTime<Utc>,
    subject: &str,
    body: &str,
) -> Vec<u8> {
    let domain = from.rsplit_once('@').map_or("localhost", |(_, d)| d);
    let mut msg = format!(
        "To: {to}\r\n\
         From: {from}\r\n\
         Subject: {subject}\r\n\
         Date: {date}\r\n\
         Message-ID: <{id}@{domain}>\r\n\
         {TRACE_HEADER}: {trace}\r\n\
         \r\n",
        date = date.to_rfc2822(),
        id = message_id_local(trace),
    );
    msg.push_str(&body.replace("\r\n", "\n").replace('\n', "\r\n"));
    msg.into_bytes()
}

/// Left-hand side of the Message-ID: the trace ID when it is a valid
/// dot-atom, otherwise a fresh UUID.
fn message_id_local(trace: &TraceId) -> String {
    let id = trace.as_str();
    let atext = |c: char| c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~".contains(c);
    let dot_atom = id.split('.').all(|atom| !atom.is_empty() && atom.chars().all(atext));
    if dot_atom {
        id.to_string()
    } else {
        Uuid::new_v4().to_string()
    }
}

/// Submits probe messages through the configured relay.
pub struct Sender {
    config: SmtpConfig,
}

impl Sender {
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Submit one probe message carrying `trace` from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns an error if an address does not parse, or if the relay
    /// rejects the connection, the login, or the message.
    pub async fn send(&self, trace: &TraceId, from: &str, to: &str) -> Result<()> {
        let envelope = Envelope::new(Some(parse_address(from)?), vec![parse_address(to)?])
            .map_err(|e| Error::Config(format!("Invalid envelope: {e}")))?;
        let raw = build_message(trace, to, from, Utc::now(), SUBJECT, BODY);

        let transport = self.transport()?;
        info!("Send message with id {} via {}", trace, self.config.addr());
        let response = transport
            .send_raw(&envelope, &raw)
            .await
            .map_err(|e| Error::Smtp(format!("Submission failed: {e}")))?;
        debug!(code = %response.code(), "Relay accepted message");
        Ok(())
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let (host, port) = self.config.host_port()?;
        let params = TlsParameters::builder(host.clone())
            .dangerous_accept_invalid_certs(self.config.accept_invalid_certs)
            .build()
            .map_err(|e| Error::Tls(format!("SMTP TLS setup failed: {e}")))?;
        let tls = if port == SMTPS_PORT {
            Tls::Wrapper(params)
        } else {
            Tls::Opportunistic(params)
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .tls(tls);
        if self.config.uses_auth() {
            builder = builder
                .credentials(Credentials::new(
                    self.config.username.clone(),
                    self.config.password.clone(),
                ))
                .authentication(vec![Mechanism::Plain]);
        }
        Ok(builder.build())
    }
}

fn parse_address(addr: &str) -> Result<Address> {
    addr.parse()
        .map_err(|e| Error::Config(format!("Invalid address '{addr}': {e}")))
}
