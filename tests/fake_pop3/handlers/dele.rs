//! DELE command handler.
//!
//! The only write handler: it marks the message deleted in the shared
//! maildrop under the lock, so tests can observe the effect after the
//! session ends. (A real server would defer the deletion to the UPDATE
//! state; for the flows under test the distinction does not matter, as
//! the client never RSETs.)

use crate::fake_pop3::io::write_line;
use crate::fake_pop3::maildrop::Maildrop;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle `DELE index`.
pub async fn handle_dele<S: AsyncRead + AsyncWrite + Unpin>(
    arg: &str,
    maildrop: &Mutex<Maildrop>,
    stream: &mut BufReader<S>,
) {
    let Ok(index) = arg.trim().parse::<usize>() else {
        let _ = write_line(stream, "-ERR bad DELE syntax\r\n").await;
        return;
    };

    let deleted = {
        let mut maildrop = maildrop.lock().unwrap();
        match maildrop.messages.get_mut(index.wrapping_sub(1)) {
            Some(message) if !message.deleted => {
                message.deleted = true;
                true
            }
            _ => false,
        }
    };

    if deleted {
        let resp = format!("+OK message {index} deleted\r\n");
        let _ = write_line(stream, &resp).await;
    } else {
        let _ = write_line(stream, "-ERR no such message\r\n").await;
    }
}
