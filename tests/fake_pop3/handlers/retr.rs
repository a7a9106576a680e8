//! RETR command handler.
//!
//! Sends the complete message as a dot-stuffed multi-line reply. The
//! maildrop can be told to fail specific indices so tests can exercise
//! the client's per-message error handling.

use super::dot_stuffed;
use crate::fake_pop3::io::{write_bytes, write_line};
use crate::fake_pop3::maildrop::Maildrop;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle `RETR index`.
pub async fn handle_retr<S: AsyncRead + AsyncWrite + Unpin>(
    arg: &str,
    maildrop: &Maildrop,
    stream: &mut BufReader<S>,
) {
    let Ok(index) = arg.trim().parse::<u32>() else {
        let _ = write_line(stream, "-ERR bad RETR syntax\r\n").await;
        return;
    };

    if maildrop.retr_fails.contains(&index) {
        let _ = write_line(stream, "-ERR message temporarily unavailable\r\n").await;
        return;
    }

    let Some(message) = maildrop.live(index) else {
        let _ = write_line(stream, "-ERR no such message\r\n").await;
        return;
    };

    let resp = format!("+OK {} octets\r\n", message.size());
    if write_line(stream, &resp).await.is_err() {
        return;
    }
    let _ = write_bytes(stream, &dot_stuffed(&message.raw)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_pop3::maildrop::MaildropBuilder;
    use tokio::io::AsyncReadExt;

    async fn run(arg: &str, maildrop: &Maildrop) -> Vec<u8> {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);
        handle_retr(arg, maildrop, &mut stream).await;
        drop(stream);

        let mut out = Vec::new();
        BufReader::new(client).read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn sends_dot_stuffed_message() {
        let maildrop = MaildropBuilder::new()
            .message("u1", b"Subject: x\n\n.leading dot\n")
            .build();

        let out = run("1", &maildrop).await;
        assert!(out.starts_with(b"+OK"));
        assert!(out.ends_with(b"..leading dot\r\n.\r\n"));
    }

    #[tokio::test]
    async fn unknown_index_is_an_error() {
        let maildrop = MaildropBuilder::new().build();
        let out = run("7", &maildrop).await;
        assert!(out.starts_with(b"-ERR"));
    }

    #[tokio::test]
    async fn configured_failure_is_an_error() {
        let maildrop = MaildropBuilder::new()
            .message("u1", b"hello\n")
            .failing_retr(1)
            .build();
        let out = run("1", &maildrop).await;
        assert!(out.starts_with(b"-ERR"));
    }
}
