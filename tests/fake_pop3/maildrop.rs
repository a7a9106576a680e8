//! Test data model for the fake POP3 server
//!
//! Provides a builder-style API for constructing maildrop state:
//!
//! ```ignore
//! let maildrop = MaildropBuilder::new()
//!     .credentials("testuser", "testpass")
//!     .message("uidl-1", raw_rfc5322_bytes)
//!     .message("uidl-2", raw_rfc5322_bytes)
//!     .build();
//! ```
//!
//! The `Maildrop` is shared with the server via `Arc<Mutex<_>>` so
//! tests can inspect what a session did to it (deletions, remaining
//! messages) after the client disconnects.

/// A single message waiting in the maildrop.
///
/// - `uidl`: the server-assigned unique id returned by the UIDL
///   command (when the server supports it).
/// - `raw`: the message with `\n` line endings; the server dot-stuffs
///   and CRLF-converts it on the way out.
/// - `deleted`: set by DELE; deleted messages vanish from STAT/LIST
///   and answer `-ERR` to RETR/TOP.
#[derive(Debug, Clone)]
pub struct TestMessage {
    pub uidl: String,
    pub raw: Vec<u8>,
    pub deleted: bool,
}

impl TestMessage {
    pub fn size(&self) -> usize {
        self.raw.len()
    }
}

/// Complete fake-server state: credentials, capabilities, messages.
#[derive(Debug, Clone)]
pub struct Maildrop {
    pub user: String,
    pub password: String,
    /// When set, the banner carries this `<...>` token and APOP logins
    /// are accepted.
    pub apop_challenge: Option<String>,
    /// Answer `-ERR` to UIDL when false (forces the TOP fallback).
    pub supports_uidl: bool,
    /// 1-based message numbers that answer `-ERR` to RETR.
    pub retr_fails: Vec<u32>,
    pub messages: Vec<TestMessage>,
}

impl Maildrop {
    /// The message at a 1-based index, if it exists and is not deleted.
    pub fn live(&self, index: u32) -> Option<&TestMessage> {
        self.messages
            .get(index as usize - 1)
            .filter(|m| !m.deleted)
    }

    /// Count and total size of the non-deleted messages.
    pub fn stat(&self) -> (usize, usize) {
        let live: Vec<_> = self.messages.iter().filter(|m| !m.deleted).collect();
        (live.len(), live.iter().map(|m| m.size()).sum())
    }
}

/// Builder for constructing a `Maildrop` step by step.
pub struct MaildropBuilder {
    maildrop: Maildrop,
}

impl MaildropBuilder {
    pub fn new() -> Self {
        Self {
            maildrop: Maildrop {
                user: "testuser".to_string(),
                password: "testpass".to_string(),
                apop_challenge: None,
                supports_uidl: true,
                retr_fails: Vec::new(),
                messages: Vec::new(),
            },
        }
    }

    pub fn credentials(mut self, user: &str, password: &str) -> Self {
        self.maildrop.user = user.to_string();
        self.maildrop.password = password.to_string();
        self
    }

    /// Advertise an APOP challenge in the banner.
    pub fn apop_challenge(mut self, challenge: &str) -> Self {
        self.maildrop.apop_challenge = Some(challenge.to_string());
        self
    }

    /// Make the server answer `-ERR` to UIDL.
    pub fn without_uidl(mut self) -> Self {
        self.maildrop.supports_uidl = false;
        self
    }

    /// Make the server answer `-ERR` to `RETR index`.
    pub fn failing_retr(mut self, index: u32) -> Self {
        self.maildrop.retr_fails.push(index);
        self
    }

    /// Append a message to the maildrop.
    pub fn message(mut self, uidl: &str, raw: &[u8]) -> Self {
        self.maildrop.messages.push(TestMessage {
            uidl: uidl.to_string(),
            raw: raw.to_vec(),
            deleted: false,
        });
        self
    }

    /// Consume the builder and return the finished `Maildrop`.
    pub fn build(self) -> Maildrop {
        self.maildrop
    }
}
