//! POP3 command engine
//!
//! Formats RFC 1939 commands, sends them CRLF-terminated, and splits
//! server replies into `+OK` payloads and typed failures. The engine
//! interprets nothing beyond the status word; multi-line payloads are
//! the decoder's business.
//!
//! Password redaction happens here and nowhere else: the only way to
//! turn a [`Command`] into loggable text is [`Command::redacted`], so
//! no log sink or error value can ever carry a cleartext password.

use crate::error::{Error, PopError, Result};
use crate::transport::Transport;
use tracing::debug;

/// One POP3 command, including the `Connect` pseudo-command that sends
/// nothing and just reads the greeting banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    User(String),
    Pass(String),
    Quit,
    Stat,
    List,
    Retr(u32),
    Dele(u32),
    Noop,
    Rset,
    Apop { user: String, digest: String },
    Top { index: u32, lines: u32 },
    Uidl,
    Stls,
}

impl Command {
    /// The protocol keyword, upper case per RFC 1939.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::User(_) => "USER",
            Self::Pass(_) => "PASS",
            Self::Quit => "QUIT",
            Self::Stat => "STAT",
            Self::List => "LIST",
            Self::Retr(_) => "RETR",
            Self::Dele(_) => "DELE",
            Self::Noop => "NOOP",
            Self::Rset => "RSET",
            Self::Apop { .. } => "APOP",
            Self::Top { .. } => "TOP",
            Self::Uidl => "UIDL",
            Self::Stls => "STLS",
        }
    }

    /// The line put on the wire, without CRLF. `None` for `Connect`,
    /// which only reads the banner.
    #[must_use]
    pub fn wire_line(&self) -> Option<String> {
        match self {
            Self::Connect => None,
            Self::User(user) => Some(format!("USER {user}")),
            Self::Pass(password) => Some(format!("PASS {password}")),
            Self::Retr(index) => Some(format!("RETR {index}")),
            Self::Dele(index) => Some(format!("DELE {index}")),
            Self::Apop { user, digest } => Some(format!("APOP {user} {digest}")),
            Self::Top { index, lines } => Some(format!("TOP {index} {lines}")),
            Self::Quit | Self::Stat | Self::List | Self::Noop | Self::Rset | Self::Uidl
            | Self::Stls => Some(self.name().to_string()),
        }
    }

    /// The command as safe-to-log text: like [`Self::wire_line`], but
    /// every password byte is crossed out.
    #[must_use]
    pub fn redacted(&self) -> String {
        match self {
            Self::Pass(password) => format!("PASS {}", "X".repeat(password.chars().count())),
            other => other.wire_line().unwrap_or_else(|| other.name().to_string()),
        }
    }
}

/// Send one command and read its status line.
///
/// Returns the text after `+OK` (leading space stripped) or
/// [`Error::Protocol`] carrying the redacted command and the raw
/// response line.
pub async fn send(transport: &mut Transport, command: &Command) -> Result<String> {
    debug!("POP3 cmd '{}'", command.redacted());

    if let Some(line) = command.wire_line() {
        transport.send_line(&line).await?;
    }

    let line = transport.recv_line().await?;
    line.strip_prefix("+OK").map_or_else(
        || {
            Err(Error::Protocol(PopError {
                command: command.redacted(),
                response: line.clone(),
            }))
        },
        |rest| Ok(rest.strip_prefix(' ').unwrap_or(rest).to_string()),
    )
}

/// The APOP digest: 32 lowercase hex characters of
/// `MD5(challenge ‖ password)`, with the challenge including its angle
/// brackets.
#[must_use]
pub fn apop_digest(challenge: &str, password: &str) -> String {
    let digest = md5::compute(format!("{challenge}{password}"));
    format!("{digest:x}")
}
