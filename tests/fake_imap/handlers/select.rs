//! SELECT command handler.
//!
//! Opens a folder and reports the metadata RFC 3501 section 6.3.1
//! requires: FLAGS, EXISTS, RECENT, UIDVALIDITY, UIDNEXT and
//! PERMANENTFLAGS. `\Deleted` must be a permanent flag, otherwise the
//! probe's cleanup would have nothing to expunge.
//!
//! Returns the selected folder name, or `None` if it doesn't exist.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub async fn handle_select<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    folder_name: &str,
    mailbox: &Mailbox,
    stream: &mut BufReader<S>,
) -> Option<String> {
    let Some(folder) = mailbox.get_folder(folder_name) else {
        let resp = format!("{tag} NO Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return None;
    };

    let uidnext = folder.emails.iter().map(|e| e.uid).max().unwrap_or(0) + 1;
    let untagged = [
        "* FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)".to_string(),
        format!("* {} EXISTS", folder.emails.len()),
        "* 0 RECENT".to_string(),
        "* OK [UIDVALIDITY 1]".to_string(),
        format!("* OK [UIDNEXT {uidnext}]"),
        "* OK [PERMANENTFLAGS (\\Seen \\Deleted)] Limited".to_string(),
    ];
    for line in untagged {
        if write_line(stream, &format!("{line}\r\n")).await.is_err() {
            return None;
        }
    }

    let resp = format!("{tag} OK [READ-WRITE] SELECT completed\r\n");
    let _ = write_line(stream, &resp).await;
    Some(folder_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::testing::{output, pipe};
    use crate::fake_imap::mailbox::MailboxBuilder;

    const RAW: &[u8] = b"Subject: Test\r\n\r\nBody";

    async fn run(folder_name: &str, mailbox: &Mailbox) -> (String, Option<String>) {
        let (client, mut stream) = pipe();
        let selected = handle_select("A1", folder_name, mailbox, &mut stream).await;
        drop(stream);
        (output(client).await, selected)
    }

    #[tokio::test]
    async fn selects_existing_folder() {
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(5, false, RAW)
            .email(10, true, RAW)
            .build();

        let (out, selected) = run("INBOX", &mailbox).await;

        assert_eq!(selected.as_deref(), Some("INBOX"));
        assert!(out.contains("* 2 EXISTS"));
        assert!(out.contains("* OK [UIDNEXT 11]"));
        assert!(out.contains("[PERMANENTFLAGS (\\Seen \\Deleted)]"));
        assert!(out.ends_with("A1 OK [READ-WRITE] SELECT completed\r\n"));
    }

    #[tokio::test]
    async fn empty_folder_starts_uids_at_one() {
        let mailbox = MailboxBuilder::new().folder("Junk").build();

        let (out, _) = run("Junk", &mailbox).await;

        assert!(out.contains("* 0 EXISTS"));
        assert!(out.contains("* OK [UIDNEXT 1]"));
    }

    #[tokio::test]
    async fn returns_none_for_missing_folder() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();

        let (out, selected) = run("NoSuchFolder", &mailbox).await;

        assert!(selected.is_none());
        assert_eq!(out, "A1 NO Folder not found\r\n");
    }
}
