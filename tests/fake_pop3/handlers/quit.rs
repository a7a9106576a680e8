//! QUIT command handler.

use crate::fake_pop3::io::write_line;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle QUIT. The server closes the connection after this.
pub async fn handle_quit<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut BufReader<S>) {
    let _ = write_line(stream, "+OK signing off\r\n").await;
}
