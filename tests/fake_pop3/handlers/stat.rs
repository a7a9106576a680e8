//! STAT command handler.

use crate::fake_pop3::io::write_line;
use crate::fake_pop3::maildrop::Maildrop;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle STAT: `+OK <count> <size>` over the non-deleted messages.
pub async fn handle_stat<S: AsyncRead + AsyncWrite + Unpin>(
    maildrop: &Maildrop,
    stream: &mut BufReader<S>,
) {
    let (count, size) = maildrop.stat();
    let resp = format!("+OK {count} {size}\r\n");
    let _ = write_line(stream, &resp).await;
}
