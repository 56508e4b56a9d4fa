//! IMAP connection and TLS helpers
//!
//! Provides `connect()` (dial, TLS, login) and `select()` for the
//! poller's mailbox session, plus [`TaggedReply`] for commands whose
//! completion status matters.

use crate::config::{ImapConfig, Security};
use crate::error::{Error, Result, is_transient_kind};
use crate::folder::Folder;
use async_imap::Session;
use async_imap::imap_proto::{RequestId, Response, Status};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info};

/// A TLS-wrapped IMAP session.
pub type ImapSession = Session<Compat<tokio_rustls::client::TlsStream<TcpStream>>>;

/// TLS connector trusting the bundled Mozilla roots, or anything at
/// all when `accept_invalid_certs` is set.
///
/// The ring provider is passed explicitly, so callers need not install
/// a process-wide default.
fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(format!("TLS setup failed: {e}")))?;

    let config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier(provider)))
            .with_no_client_auth()
    } else {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Open a fresh TLS-wrapped IMAP session and log in.
///
/// With [`Security::Tls`] the handshake happens right after the TCP
/// connect; with [`Security::StartTls`] the plain connection is
/// upgraded with the STARTTLS command first.
pub async fn connect(config: &ImapConfig) -> Result<ImapSession> {
    let (host, port) = config.host_port()?;
    let addr = format!("{host}:{port}");
    debug!("Connecting to IMAP server at {} ({})", addr, config.security);

    let tcp_stream = TcpStream::connect(&addr).await?;

    let tcp_stream = match config.security {
        Security::Tls => tcp_stream,
        Security::StartTls => {
            let mut client = async_imap::Client::new(tcp_stream.compat());
            client
                .run_command_and_check_ok("STARTTLS", None)
                .await
                .map_err(|e| match Error::imap("STARTTLS failed", e) {
                    Error::Imap(msg) => Error::Tls(msg),
                    other => other,
                })?;
            client.into_inner().into_inner()
        }
    };

    let connector = tls_connector(config.accept_invalid_certs)?;
    let server_name = ServerName::try_from(host.clone())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;

    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| {
            if is_transient_kind(e.kind()) {
                Error::Io(e)
            } else {
                Error::Tls(e.to_string())
            }
        })?;

    let tls_client = async_imap::Client::new(tls_stream.compat());

    let session = tls_client
        .login(&config.username, &config.password)
        .await
        .map_err(|(e, _)| Error::imap("Login failed", e))?;

    info!("Connected to IMAP server {} as {}", addr, config.username);
    Ok(session)
}

/// SELECT a mailbox read-write on an existing session.
pub async fn select(session: &mut ImapSession, folder: &Folder) -> Result<()> {
    let mailbox = session
        .select(folder.as_str())
        .await
        .map_err(|e| Error::imap(&format!("Failed to select {folder}"), e))?;
    debug!(exists = mailbox.exists, "Selected {}", folder);
    Ok(())
}

/// Reply to a command sent with [`TaggedReply::start`].
///
/// async-imap's typed helpers stop at the tagged completion without
/// looking at its status, and take a closed stream for the end of the
/// reply. Here a `NO` or `BAD` completion is an [`Error::Imap`] and a
/// stream that ends early is [`Error::ConnectionLost`].
pub struct TaggedReply<'s> {
    session: &'s mut ImapSession,
    tag: RequestId,
    context: &'static str,
    done: bool,
}

impl<'s> TaggedReply<'s> {
    /// Send `command`; `context` prefixes any error.
    pub async fn start(
        session: &'s mut ImapSession,
        context: &'static str,
        command: &str,
    ) -> Result<Self> {
        let tag = session
            .run_command(command)
            .await
            .map_err(|e| Error::imap(context, e))?;
        Ok(Self {
            session,
            tag,
            context,
            done: false,
        })
    }

    /// Next untagged response that `pick` maps to a value, skipping
    /// the ones it ignores. `Ok(None)` once the command completed OK.
    pub async fn next<T>(
        &mut self,
        mut pick: impl FnMut(&Response<'_>) -> Option<Result<T>>,
    ) -> Result<Option<T>> {
        while !self.done {
            let Some(response) = self.session.read_response().await? else {
                return Err(Error::ConnectionLost);
            };
            match response.parsed() {
                Response::Done {
                    tag,
                    status,
                    information,
                    ..
                } if *tag == self.tag => {
                    self.done = true;
                    if *status != Status::Ok {
                        return Err(Error::Imap(format!(
                            "{}: {status:?} {}",
                            self.context,
                            information.as_deref().unwrap_or_default()
                        )));
                    }
                }
                other => {
                    if let Some(value) = pick(other) {
                        return value.map(Some);
                    }
                }
            }
        }
        Ok(None)
    }

    /// Read to the tagged completion, counting the untagged responses
    /// `count` accepts.
    pub async fn finish(mut self, count: impl Fn(&Response<'_>) -> bool) -> Result<usize> {
        let mut n = 0;
        while self.next(|r| count(r).then_some(Ok(()))).await?.is_some() {
            n += 1;
        }
        Ok(n)
    }
}

/// Certificate verifier that accepts all certificates, for test relays
/// and mailboxes behind self-signed certificates.
#[derive(Debug)]
struct DangerousVerifier(Arc<CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
