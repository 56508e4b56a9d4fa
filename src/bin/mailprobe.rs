#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for end-to-end mail delivery tests

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use mailprobe::{
    Delivery, ImapConfig, PollSettings, Poller, Security, Sender, SignatureStatus, SmtpConfig,
    TraceId,
};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mailprobe")]
#[command(about = "An easy way to test mail delivery end to end")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level, from 0 (silent) to 6 (trace)
    #[arg(short, long, global = true, default_value_t = 4,
          value_parser = clap::value_parser!(u8).range(0..=6))]
    log: u8,

    /// Print the delivery report as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a probe through the relay and wait for it in the mailbox
    Test(TestArgs),
}

#[derive(ClapArgs)]
struct TestArgs {
    /// Envelope sender address
    #[arg(long)]
    from: String,

    /// Envelope recipient address
    #[arg(long)]
    to: String,

    /// SMTP relay address (host or host:port, default port 587)
    #[arg(short = 's', long, required_unless_present = "no_smtp")]
    smtp_address: Option<String>,

    /// SMTP relay login username; omit for anonymous submission
    #[arg(long, default_value = "")]
    smtp_username: String,

    /// SMTP relay login password
    #[arg(long, env = "MAILPROBE_SMTP_PASSWORD", default_value = "", hide_env_values = true)]
    smtp_password: String,

    /// Destination IMAP address (host or host:port, default port 993)
    #[arg(short = 'i', long)]
    imap_address: String,

    /// Destination IMAP login username
    #[arg(long)]
    imap_username: String,

    /// Destination IMAP login password
    #[arg(long, env = "MAILPROBE_IMAP_PASSWORD", default_value = "", hide_env_values = true)]
    imap_password: String,

    /// Mailbox to watch
    #[arg(long, default_value = "INBOX")]
    imap_mailbox: String,

    /// How to encrypt the IMAP connection
    #[arg(long, value_enum, default_value_t = ImapSecurity::Tls)]
    imap_security: ImapSecurity,

    /// Accept invalid TLS certificates from the relay and the mailbox
    #[arg(long)]
    insecure: bool,

    /// Custom trace ID (default: a random UUID)
    #[arg(long)]
    id: Option<String>,

    /// Skip submission and only check the destination mailbox
    #[arg(long)]
    no_smtp: bool,

    /// Give up after this many seconds (default: wait forever)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Fail unless a delivered copy carries a valid DKIM signature
    #[arg(long)]
    require_dkim: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ImapSecurity {
    Tls,
    Starttls,
}

impl From<ImapSecurity> for Security {
    fn from(value: ImapSecurity) -> Self {
        match value {
            ImapSecurity::Tls => Self::Tls,
            ImapSecurity::Starttls => Self::StartTls,
        }
    }
}

const fn level_filter(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::OFF,
        1 | 2 => LevelFilter::ERROR,
        3 => LevelFilter::WARN,
        4 => LevelFilter::INFO,
        5 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(level_filter(args.log).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match &args.command {
        Command::Test(test) => cmd_test(&args, test).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mailprobe: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn cmd_test(args: &Args, test: &TestArgs) -> anyhow::Result<()> {
    let trace = match &test.id {
        Some(id) => TraceId::parse(id)?,
        None => TraceId::generate(),
    };

    let imap = ImapConfig {
        mailbox: test.imap_mailbox.as_str().into(),
        security: test.imap_security.into(),
        accept_invalid_certs: test.insecure,
        ..ImapConfig::new(&test.imap_address, &test.imap_username, &test.imap_password)
    };

    let smtp = if test.no_smtp {
        None
    } else {
        let address = test
            .smtp_address
            .as_deref()
            .ok_or_else(|| mailprobe::Error::Config("flag is required: --smtp-address".into()))?;
        Some(SmtpConfig {
            accept_invalid_certs: test.insecure,
            ..SmtpConfig::new(address, &test.smtp_username, &test.smtp_password)
        })
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let settings = PollSettings {
        deadline: test.timeout.map(Duration::from_secs),
        require_valid_signature: test.require_dkim,
        ..PollSettings::default()
    };
    let mut poller = Poller::connect(imap)
        .await?
        .with_settings(settings)
        .with_cancellation(cancel);

    if let Some(smtp) = smtp {
        if let Err(e) = Sender::new(smtp).send(&trace, &test.from, &test.to).await {
            poller.close().await;
            return Err(e.into());
        }
    }

    let outcome = poller.wait(&trace).await;
    poller.close().await;
    let delivery = outcome?;

    report(args, &delivery)?;
    Ok(())
}

fn report(args: &Args, delivery: &Delivery) -> anyhow::Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(delivery)?);
        return Ok(());
    }

    info!(
        "Message with id {} delivered after {} round(s) in {:.1}s",
        delivery.trace_id,
        delivery.rounds,
        delivery.elapsed.as_secs_f64()
    );
    for message in &delivery.messages {
        let signatures = message
            .signatures
            .iter()
            .map(|s| match &s.status {
                SignatureStatus::Pass => format!("{}=pass", s.domain),
                SignatureStatus::Fail(_) => format!("{}=fail", s.domain),
            })
            .collect::<Vec<_>>();
        let signatures = if signatures.is_empty() {
            "unsigned".to_string()
        } else {
            signatures.join(", ")
        };
        println!(
            "{:<8} {:>8} bytes  dkim: {}",
            message.uid, message.size, signatures
        );
    }
    println!("\n{} message(s) delivered and deleted", delivery.messages.len());
    Ok(())
}
