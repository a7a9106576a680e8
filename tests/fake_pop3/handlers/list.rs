//! LIST command handler.
//!
//! Replies with the multi-line scan listing: one `index size` line per
//! non-deleted message, terminated by `.CRLF`. Deleted messages keep
//! their index but vanish from the listing, per RFC 1939.

use crate::fake_pop3::io::write_line;
use crate::fake_pop3::maildrop::Maildrop;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle argument-less LIST.
pub async fn handle_list<S: AsyncRead + AsyncWrite + Unpin>(
    maildrop: &Maildrop,
    stream: &mut BufReader<S>,
) {
    let (count, size) = maildrop.stat();
    let mut resp = format!("+OK {count} messages ({size} octets)\r\n");
    for (i, message) in maildrop.messages.iter().enumerate() {
        if !message.deleted {
            resp.push_str(&format!("{} {}\r\n", i + 1, message.size()));
        }
    }
    resp.push_str(".\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_pop3::maildrop::MaildropBuilder;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn lists_live_messages_with_sizes() {
        let mut maildrop = MaildropBuilder::new()
            .message("a", b"12345")
            .message("b", b"1234567")
            .message("c", b"123")
            .build();
        maildrop.messages[1].deleted = true;

        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);
        handle_list(&maildrop, &mut stream).await;
        drop(stream);

        let mut out = String::new();
        BufReader::new(client).read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("+OK 2 messages"));
        assert!(out.contains("\r\n1 5\r\n"));
        assert!(!out.contains("\r\n2 7\r\n"));
        assert!(out.contains("\r\n3 3\r\n"));
        assert!(out.ends_with(".\r\n"));
    }
}
