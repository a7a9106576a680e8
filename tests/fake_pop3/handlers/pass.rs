//! PASS command handler.

use crate::fake_pop3::io::write_line;
use crate::fake_pop3::maildrop::Maildrop;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle `PASS secret`. Only valid right after a successful USER.
/// Returns whether the session is now authenticated.
pub async fn handle_pass<S: AsyncRead + AsyncWrite + Unpin>(
    arg: &str,
    pending_user: Option<&str>,
    maildrop: &Maildrop,
    stream: &mut BufReader<S>,
) -> bool {
    if pending_user == Some(maildrop.user.as_str()) && arg == maildrop.password {
        let (count, size) = maildrop.stat();
        let resp = format!("+OK maildrop has {count} messages ({size} octets)\r\n");
        let _ = write_line(stream, &resp).await;
        true
    } else {
        let _ = write_line(stream, "-ERR invalid password\r\n").await;
        false
    }
}
