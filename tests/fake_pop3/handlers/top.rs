//! TOP command handler.
//!
//! Returns the headers, the separating blank line, and the first `n`
//! body lines of a message, dot-stuffed like every multi-line reply.

use super::dot_stuffed;
use crate::fake_pop3::io::{write_bytes, write_line};
use crate::fake_pop3::maildrop::Maildrop;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle `TOP index lines`.
pub async fn handle_top<S: AsyncRead + AsyncWrite + Unpin>(
    arg: &str,
    maildrop: &Maildrop,
    stream: &mut BufReader<S>,
) {
    let mut fields = arg.split_whitespace();
    let (Some(Ok(index)), Some(Ok(lines))) = (
        fields.next().map(str::parse::<u32>),
        fields.next().map(str::parse::<usize>),
    ) else {
        let _ = write_line(stream, "-ERR bad TOP syntax\r\n").await;
        return;
    };

    let Some(message) = maildrop.live(index) else {
        let _ = write_line(stream, "-ERR no such message\r\n").await;
        return;
    };

    let preview = top_slice(&message.raw, lines);
    if write_line(stream, "+OK top of message follows\r\n").await.is_err() {
        return;
    }
    let _ = write_bytes(stream, &dot_stuffed(&preview)).await;
}

/// Headers, blank line, and the first `lines` body lines.
fn top_slice(raw: &[u8], lines: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut in_body = false;
    let mut body_lines = 0;
    for line in raw.split_inclusive(|&b| b == b'\n') {
        if in_body {
            if body_lines == lines {
                break;
            }
            body_lines += 1;
        } else if line == b"\n" || line == b"\r\n" {
            in_body = true;
        }
        out.extend_from_slice(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::top_slice;

    #[test]
    fn preview_cuts_the_body() {
        let raw = b"Subject: x\n\none\ntwo\nthree\n";
        assert_eq!(top_slice(raw, 1), b"Subject: x\n\none\n");
        assert_eq!(top_slice(raw, 0), b"Subject: x\n\n");
        assert_eq!(top_slice(raw, 9), raw);
    }
}
