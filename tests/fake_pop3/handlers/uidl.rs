//! UIDL command handler.
//!
//! UIDL is optional in RFC 1939; a maildrop built `.without_uidl()`
//! answers `-ERR` so clients exercise their fallback path.

use crate::fake_pop3::io::write_line;
use crate::fake_pop3::maildrop::Maildrop;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle argument-less UIDL: the multi-line unique-id listing.
pub async fn handle_uidl<S: AsyncRead + AsyncWrite + Unpin>(
    maildrop: &Maildrop,
    stream: &mut BufReader<S>,
) {
    if !maildrop.supports_uidl {
        let _ = write_line(stream, "-ERR UIDL not implemented\r\n").await;
        return;
    }

    let mut resp = String::from("+OK unique-id listing follows\r\n");
    for (i, message) in maildrop.messages.iter().enumerate() {
        if !message.deleted {
            resp.push_str(&format!("{} {}\r\n", i + 1, message.uidl));
        }
    }
    resp.push_str(".\r\n");
    let _ = write_line(stream, &resp).await;
}
