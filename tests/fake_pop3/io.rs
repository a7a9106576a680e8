//! Shared I/O helpers for the fake POP3 server.
//!
//! Thin wrappers around `AsyncWriteExt` that flush after every write.
//! A real server would batch; flushing eagerly keeps the test server
//! simple and deterministic.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Write raw bytes to the stream and flush.
pub async fn write_bytes<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    data: &[u8],
) -> std::io::Result<()> {
    stream.get_mut().write_all(data).await?;
    stream.get_mut().flush().await
}

/// Write a reply line (the caller includes the CRLF) and flush.
pub async fn write_line<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    line: &str,
) -> std::io::Result<()> {
    write_bytes(stream, line.as_bytes()).await
}
