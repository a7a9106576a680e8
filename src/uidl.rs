//! Persistent UIDL set for duplicate suppression
//!
//! Every message a session downloads (or sees) leaves its UIDL behind,
//! keyed as `uidl@hostname` so one store serves all accounts. The next
//! session skips entries whose UIDL is already present.
//!
//! Tokens age in units of completed sessions: each finished session
//! for an account resets the age of the tokens it saw and bumps the
//! rest, and a token not seen for `max_age` consecutive sessions is
//! dropped at save time. That keeps the store bounded without ever
//! forgetting a message the server still has.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug)]
struct Token {
    /// Completed sessions of the owning account since last seen.
    age: u32,
    /// Seen during the currently running session.
    checked: bool,
}

/// The persistent UIDL set. One session per account may use it at a
/// time; keys embed the hostname so accounts never collide.
#[derive(Debug)]
pub struct UidlStore {
    path: PathBuf,
    tokens: HashMap<String, Token>,
    max_age: u32,
}

impl UidlStore {
    /// Sessions a token may go unseen before it is evicted.
    pub const DEFAULT_MAX_AGE: u32 = 3;

    /// Load the store from `path`; a missing file yields an empty
    /// store. A present-but-corrupt file is an error, not data loss.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        Self::load_with_max_age(path, Self::DEFAULT_MAX_AGE)
    }

    pub fn load_with_max_age(path: impl Into<PathBuf>, max_age: u32) -> Result<Self> {
        let path = path.into();
        let tokens = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<HashMap<String, u32>>(&bytes)
                .map_err(|e| {
                    Error::Data(format!("corrupt UIDL store {}: {e}", path.display()))
                })?
                .into_iter()
                .map(|(uidl, age)| {
                    (
                        uidl,
                        Token {
                            age,
                            checked: false,
                        },
                    )
                })
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!("loaded {} UIDL tokens from {}", tokens.len(), path.display());
        Ok(Self {
            path,
            tokens,
            max_age,
        })
    }

    /// Membership test. A hit marks the token as seen this session;
    /// repeated checks of the same token are idempotent.
    pub fn check(&mut self, uidl: &str) -> bool {
        self.tokens.get_mut(uidl).is_some_and(|token| {
            token.checked = true;
            true
        })
    }

    /// Record a freshly downloaded message's UIDL.
    pub fn insert(&mut self, uidl: impl Into<String>) {
        self.tokens.insert(
            uidl.into(),
            Token {
                age: 0,
                checked: true,
            },
        );
    }

    /// Close out a successfully completed session for `hostname`:
    /// tokens seen this session reset to age zero, unseen ones age by
    /// one and fall out once past `max_age`.
    pub fn end_session(&mut self, hostname: &str) {
        let suffix = format!("@{hostname}");
        let max_age = self.max_age;
        let before = self.tokens.len();

        self.tokens.retain(|uidl, token| {
            if !uidl.ends_with(&suffix) {
                return true;
            }
            if token.checked {
                token.checked = false;
                token.age = 0;
                true
            } else {
                token.age += 1;
                token.age <= max_age
            }
        });

        let evicted = before - self.tokens.len();
        if evicted > 0 {
            info!("evicted {evicted} stale UIDL tokens for {hostname}");
        }
    }

    /// Persist the store atomically (write-then-rename).
    pub fn save(&self) -> Result<()> {
        let plain: HashMap<&str, u32> = self
            .tokens
            .iter()
            .map(|(uidl, token)| (uidl.as_str(), token.age))
            .collect();

        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut file = match dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new()?,
        };
        serde_json::to_writer_pretty(&mut file, &plain)
            .map_err(|e| Error::Data(format!("could not serialise UIDL store: {e}")))?;
        file.flush()?;
        file.persist(&self.path)
            .map_err(|e| Error::Io(e.error))?;

        debug!("saved {} UIDL tokens to {}", plain.len(), self.path.display());
        Ok(())
    }

    /// Iterate over all stored UIDL keys.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
