//! Byte-stream facade over TCP and TLS
//!
//! Owns the socket for one POP3 session and exposes the four operations
//! the protocol layers need: send a CRLF line, receive a CRLF line,
//! receive a raw block, and upgrade the stream to TLS (used both for
//! implicit TLS before the banner and for STLS after it).
//!
//! Every syscall is bounded by the account's timeout and preceded by a
//! check of the shared abort flag, so a stuck server or an impatient
//! user never wedges the session.

use crate::error::ConnectError;
use rustls::pki_types::ServerName;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Cooperative cancellation flag, shared between the session and its
/// owner. Checked between syscalls, never mid-transfer.
pub type AbortFlag = Arc<AtomicBool>;

/// Create a fresh, unset abort flag.
#[must_use]
pub fn new_abort_flag() -> AbortFlag {
    Arc::new(AtomicBool::new(false))
}

/// Longest status/listing line we accept before declaring the peer
/// broken. RFC 1939 caps response lines at 512 octets; real servers
/// occasionally exceed that, so leave generous headroom.
const MAX_LINE: usize = 4096;

/// Read chunk size for buffered line reads.
const READ_CHUNK: usize = 4096;

enum Stream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Stream {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf).await,
            Self::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Plain(s) => s.write_all(data).await,
            Self::Tls(s) => s.write_all(data).await,
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(s) => s.shutdown().await,
            Self::Tls(s) => s.shutdown().await,
        }
    }
}

/// A connected byte stream plus a small read buffer.
pub struct Transport {
    stream: Option<Stream>,
    buf: Vec<u8>,
    pos: usize,
    timeout: Duration,
    abort: AbortFlag,
    faulted: bool,
}

impl Transport {
    /// Resolve `host` and open a TCP connection to `host:port`.
    pub async fn connect(
        host: &str,
        port: u16,
        io_timeout: Duration,
        abort: AbortFlag,
    ) -> Result<Self, ConnectError> {
        if abort.load(Ordering::Relaxed) {
            return Err(ConnectError::Aborted);
        }

        debug!("Connecting to POP3 server at {}:{}", host, port);

        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| ConnectError::UnknownHost)?;
        let Some(addr) = addrs.next() else {
            return Err(ConnectError::UnknownHost);
        };

        let stream = match timeout(io_timeout, TcpStream::connect(addr)).await {
            Err(_) => return Err(ConnectError::TimedOut),
            Ok(Err(e)) => return Err(map_io(&e)),
            Ok(Ok(stream)) => stream,
        };
        stream.set_nodelay(true).ok();

        Ok(Self {
            stream: Some(Stream::Plain(stream)),
            buf: Vec::new(),
            pos: 0,
            timeout: io_timeout,
            abort,
            faulted: false,
        })
    }

    /// Wrap the current plaintext stream in TLS.
    ///
    /// Must be called before any TLS traffic is expected: immediately
    /// after `connect` for implicit TLS, or right after the `STLS`
    /// acknowledgement. Any buffered plaintext is discarded.
    pub async fn upgrade_tls(
        &mut self,
        server_name: &str,
        accept_invalid_certs: bool,
    ) -> Result<(), ConnectError> {
        self.check_abort()?;

        let Some(Stream::Plain(tcp)) = self.stream.take() else {
            self.faulted = true;
            return Err(ConnectError::SslFailed("stream is not plaintext".into()));
        };

        if self.pos < self.buf.len() {
            warn!(
                "discarding {} plaintext bytes buffered before TLS upgrade",
                self.buf.len() - self.pos
            );
        }
        self.buf.clear();
        self.pos = 0;

        let connector = tls_connector(accept_invalid_certs);
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| ConnectError::SslFailed(format!("invalid server name: {e}")))?;

        match timeout(self.timeout, connector.connect(name, tcp)).await {
            Err(_) => {
                self.faulted = true;
                Err(ConnectError::TimedOut)
            }
            Ok(Err(e)) => {
                self.faulted = true;
                Err(ConnectError::SslFailed(e.to_string()))
            }
            Ok(Ok(tls)) => {
                debug!("TLS channel established with {}", server_name);
                self.stream = Some(Stream::Tls(Box::new(tls)));
                Ok(())
            }
        }
    }

    /// Send one command line, appending CRLF unless the caller already
    /// terminated it.
    pub async fn send_line(&mut self, line: &str) -> Result<(), ConnectError> {
        self.check_abort()?;
        self.send_line_raw(line).await
    }

    /// Receive one line, stripped of its CRLF terminator.
    ///
    /// Returns [`ConnectError::ShortRead`] when the peer closes before a
    /// full line arrived.
    pub async fn recv_line(&mut self) -> Result<String, ConnectError> {
        loop {
            if let Some(off) = self.buf[self.pos..].iter().position(|&b| b == b'\n') {
                let end = self.pos + off;
                let mut line = &self.buf[self.pos..end];
                if line.ends_with(b"\r") {
                    line = &line[..line.len() - 1];
                }
                let text = String::from_utf8_lossy(line).into_owned();
                self.pos = end + 1;
                return Ok(text);
            }

            if self.buf.len() - self.pos > MAX_LINE {
                self.faulted = true;
                return Err(ConnectError::Unknown("response line too long".into()));
            }

            if self.fill().await? == 0 {
                self.faulted = true;
                return Err(ConnectError::ShortRead);
            }
        }
    }

    /// Receive a block of raw bytes, draining buffered data first.
    ///
    /// Returns `Ok(0)` only when the peer closed the connection.
    pub async fn recv_block(&mut self, out: &mut [u8]) -> Result<usize, ConnectError> {
        if self.pos < self.buf.len() {
            let n = out.len().min(self.buf.len() - self.pos);
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }

        self.check_abort()?;
        let stream = self.stream.as_mut().ok_or(ConnectError::NotConnected)?;
        match timeout(self.timeout, stream.read(out)).await {
            Err(_) => {
                self.faulted = true;
                Err(ConnectError::TimedOut)
            }
            Ok(Err(e)) => {
                self.faulted = true;
                Err(map_io(&e))
            }
            Ok(Ok(n)) => Ok(n),
        }
    }

    /// Send a line without consulting the abort flag. Exists for the
    /// farewell QUIT of an aborted-but-healthy session, which must not
    /// be vetoed by the very flag that triggered it.
    pub async fn send_line_raw(&mut self, line: &str) -> Result<(), ConnectError> {
        let stream = self.stream.as_mut().ok_or(ConnectError::NotConnected)?;

        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        if !line.ends_with("\r\n") {
            data.extend_from_slice(b"\r\n");
        }

        match timeout(self.timeout, stream.write_all(&data)).await {
            Err(_) => {
                self.faulted = true;
                Err(ConnectError::TimedOut)
            }
            Ok(Err(e)) => {
                self.faulted = true;
                Err(map_io(&e))
            }
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Push bytes back so the next `recv_line`/`recv_block` sees them
    /// first. Used when a block read overshoots a payload terminator.
    pub fn unread(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.buf.splice(self.pos..self.pos, data.iter().copied());
        }
    }

    /// Shut the stream down. Safe to call on an already-closed transport.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
        self.buf.clear();
        self.pos = 0;
    }

    /// Whether an I/O or TLS fault has been observed on this transport.
    #[must_use]
    pub const fn is_faulted(&self) -> bool {
        self.faulted
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Whether the owner has requested cancellation.
    #[must_use]
    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    fn check_abort(&self) -> Result<(), ConnectError> {
        if self.abort_requested() {
            Err(ConnectError::Aborted)
        } else {
            Ok(())
        }
    }

    async fn fill(&mut self) -> Result<usize, ConnectError> {
        self.check_abort()?;
        let stream = self.stream.as_mut().ok_or(ConnectError::NotConnected)?;

        let mut chunk = [0u8; READ_CHUNK];
        let n = match timeout(self.timeout, stream.read(&mut chunk)).await {
            Err(_) => {
                self.faulted = true;
                return Err(ConnectError::TimedOut);
            }
            Ok(Err(e)) => {
                self.faulted = true;
                return Err(map_io(&e));
            }
            Ok(Ok(n)) => n,
        };

        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }
}

fn map_io(e: &io::Error) -> ConnectError {
    match e.kind() {
        io::ErrorKind::AddrInUse => ConnectError::SocketInUse,
        io::ErrorKind::PermissionDenied => ConnectError::NoSocket,
        io::ErrorKind::WouldBlock => ConnectError::NoNonblockIo,
        io::ErrorKind::TimedOut => ConnectError::TimedOut,
        io::ErrorKind::NotConnected => ConnectError::NotConnected,
        _ => ConnectError::Unknown(e.to_string()),
    }
}

/// Build a TLS connector, either verifying against the platform trust
/// store or accepting everything for self-signed endpoints.
fn tls_connector(accept_invalid_certs: bool) -> TlsConnector {
    let config = if accept_invalid_certs {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            roots.add(cert).ok();
        }
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    TlsConnector::from(Arc::new(config))
}

/// Certificate verifier that accepts all certificates
/// (for servers with self-signed certs).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
