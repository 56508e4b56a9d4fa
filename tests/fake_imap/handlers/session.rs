//! Session-level commands: CAPABILITY, NOOP, LOGIN, LOGOUT.
//!
//! None of these look at the mailbox. LOGIN optionally checks the
//! password so tests can exercise an authentication failure.

use crate::fake_imap::io::write_line;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub async fn handle_capability<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    stream: &mut BufReader<S>,
) {
    let _ = write_line(stream, "* CAPABILITY IMAP4rev1 STARTTLS\r\n").await;
    let resp = format!("{tag} OK CAPABILITY completed\r\n");
    let _ = write_line(stream, &resp).await;
}

pub async fn handle_noop<S: AsyncRead + AsyncWrite + Unpin>(tag: &str, stream: &mut BufReader<S>) {
    let resp = format!("{tag} OK NOOP completed\r\n");
    let _ = write_line(stream, &resp).await;
}

/// Handle `LOGIN user pass`. With `expected` set, any other password
/// gets `NO [AUTHENTICATIONFAILED]`; the connection stays open.
///
/// Returns `false` when the client went away.
pub async fn handle_login<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    line: &str,
    expected: Option<&str>,
    stream: &mut BufReader<S>,
) -> bool {
    let accepted = expected.is_none_or(|want| password_of(line) == Some(want));
    let resp = if accepted {
        format!("{tag} OK LOGIN completed\r\n")
    } else {
        format!("{tag} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
    };
    write_line(stream, &resp).await.is_ok()
}

pub async fn handle_logout<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    stream: &mut BufReader<S>,
) {
    let _ = write_line(stream, "* BYE Logging out\r\n").await;
    let resp = format!("{tag} OK LOGOUT completed\r\n");
    let _ = write_line(stream, &resp).await;
}

/// Last argument of a `LOGIN` line, unquoted. Good enough for test
/// passwords without spaces or escapes.
fn password_of(line: &str) -> Option<&str> {
    line.split_whitespace()
        .nth(3)
        .map(|p| p.trim_matches('"'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::testing::{output, pipe};

    #[tokio::test]
    async fn capability_advertises_starttls() {
        let (client, mut stream) = pipe();
        handle_capability("A1", &mut stream).await;
        drop(stream);

        let out = output(client).await;
        assert!(out.contains("* CAPABILITY IMAP4rev1 STARTTLS"));
        assert!(out.ends_with("A1 OK CAPABILITY completed\r\n"));
    }

    #[tokio::test]
    async fn login_without_expected_password_accepts_anything() {
        let (client, mut stream) = pipe();
        let alive = handle_login("A0001", "A0001 LOGIN \"u\" \"x\"", None, &mut stream).await;
        drop(stream);

        assert!(alive);
        assert_eq!(output(client).await, "A0001 OK LOGIN completed\r\n");
    }

    #[tokio::test]
    async fn login_checks_password_when_configured() {
        let (client, mut stream) = pipe();
        handle_login("A1", "A1 LOGIN \"u\" \"right\"", Some("right"), &mut stream).await;
        handle_login("A2", "A2 LOGIN \"u\" \"wrong\"", Some("right"), &mut stream).await;
        drop(stream);

        let out = output(client).await;
        assert!(out.contains("A1 OK LOGIN completed"));
        assert!(out.contains("A2 NO [AUTHENTICATIONFAILED]"));
    }

    #[tokio::test]
    async fn logout_says_bye_first() {
        let (client, mut stream) = pipe();
        handle_logout("A9", &mut stream).await;
        drop(stream);

        assert_eq!(
            output(client).await,
            "* BYE Logging out\r\nA9 OK LOGOUT completed\r\n"
        );
    }

    #[test]
    fn password_is_fourth_token() {
        assert_eq!(password_of("A1 LOGIN \"probe\" \"s3cret\""), Some("s3cret"));
        assert_eq!(password_of("A1 LOGIN probe"), None);
    }
}
