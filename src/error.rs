//! Error types for popfetch

use thiserror::Error;

/// Transport-level failure, fatal to the account being processed.
///
/// The variants mirror the distinct diagnostics a session reports for a
/// connection that never reached (or fell out of) a usable state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("socket already in use")]
    SocketInUse,

    #[error("could not create socket")]
    NoSocket,

    #[error("could not establish non-blocking I/O")]
    NoNonblockIo,

    #[error("connection timed out")]
    TimedOut,

    #[error("unknown host")]
    UnknownHost,

    #[error("TLS negotiation failed: {0}")]
    SslFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("peer closed the connection mid-line")]
    ShortRead,

    #[error("transfer aborted")]
    Aborted,

    #[error("connection error: {0}")]
    Unknown(String),
}

/// A POP3 command that did not get a `+OK` back.
///
/// `command` holds the command line with any password argument already
/// crossed out, so the value is safe to log or display as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopError {
    pub command: String,
    pub response: String,
}

impl std::fmt::Display for PopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' answered '{}'", self.command, self.response)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("connection error: {0}")]
    Connect(#[from] ConnectError),

    #[error("protocol error: {0}")]
    Protocol(PopError),

    #[error("data error: {0}")]
    Data(String),

    #[error("operation aborted")]
    Aborted,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error came from a user abort rather than a fault.
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted | Self::Connect(ConnectError::Aborted))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
