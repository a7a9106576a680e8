//! Collaborator interfaces the retrieval core consumes
//!
//! The core deliberately owns no folder database, MIME parser, filter
//! engine, or UI. Everything it needs from those subsystems passes
//! through the two traits here, which keeps a session runnable (and
//! testable) completely headless.

use crate::config::Account;
use crate::error::Result;
use crate::transfer::{TransferEntry, TransferList};
use chrono::{DateTime, FixedOffset};
use std::path::{Path, PathBuf};

/// Header metadata extracted from a stored message file.
#[derive(Debug, Clone, Default)]
pub struct MailHeaders {
    pub from: String,
    pub to: String,
    pub reply_to: String,
    pub subject: String,
    pub date: Option<DateTime<FixedOffset>>,
    /// The `Message-Id` value including its angle brackets, or empty.
    pub message_id: String,
    /// File the headers were read from.
    pub mail_file: PathBuf,
}

/// Handle to a message the folder layer has taken ownership of.
#[derive(Debug, Clone)]
pub struct MailRef {
    pub file: PathBuf,
}

/// The folder layer: allocates message files, parses headers, and
/// registers finished downloads with the folder index.
pub trait MailStore {
    /// Allocate a fresh destination path for an incoming message.
    fn new_mail_file(&mut self) -> Result<PathBuf>;

    /// Parse the RFC 5322 headers of a stored message file.
    fn examine(&mut self, path: &Path) -> Result<MailHeaders>;

    /// Hand a fully downloaded message over to the folder index.
    fn ingest(&mut self, headers: MailHeaders, path: &Path) -> Result<MailRef>;
}

/// A progress snapshot, emitted at phase changes and while streaming.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    /// Current message number within the session (1-based), or 0
    /// outside the per-message phases.
    pub current: usize,
    pub total: usize,
    pub bytes: u64,
    pub total_bytes: u64,
    pub label: &'a str,
}

/// UI-facing callbacks. All methods have do-nothing defaults so
/// non-interactive callers implement only what they care about.
pub trait SessionHooks {
    fn progress(&mut self, _progress: &Progress<'_>) {}

    /// Ask the user for the account's password. `None` cancels the
    /// account.
    fn prompt_password(&mut self, _account: &Account) -> Option<String> {
        None
    }

    /// Show the preselection list and let the user rewrite each
    /// entry's flags. Returning `false` cancels the account.
    fn preselect(&mut self, _entries: &mut TransferList) -> bool {
        true
    }

    /// Whether any user rules apply to messages still on the server.
    fn remote_filters_active(&self) -> bool {
        false
    }

    /// Apply the user's remote rules to one entry (headers are filled
    /// in before this is called).
    fn apply_remote_filters(&mut self, _entry: &mut TransferEntry) {}
}

/// The do-nothing hook set for non-interactive use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl SessionHooks for NoHooks {}
