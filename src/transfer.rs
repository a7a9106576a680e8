//! Per-session transfer bookkeeping
//!
//! A [`TransferEntry`] exists for every message the server enumerated
//! during LIST; the session decides what happens to each one by setting
//! transfer flags, either from the fixed policy table below or from the
//! user's preselection answer.

use crate::hooks::MailHeaders;
use bitflags::bitflags;
use chrono::{DateTime, Utc};

bitflags! {
    /// What a session should do with one server-side message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TransferFlags: u8 {
        /// Download the message.
        const LOAD = 1;
        /// Delete the message on the server during the purge phase.
        /// Meaningful without `LOAD`: server-side cleanup of messages
        /// fetched in an earlier session.
        const DELETE = 1 << 1;
        /// Surface the message to the user before downloading.
        const PRESELECT = 1 << 2;
        /// Marked for an export transfer rather than retrieval.
        const TRANSFER = 1 << 3;
    }
}

const L: TransferFlags = TransferFlags::LOAD;
const LD: TransferFlags = TransferFlags::LOAD.union(TransferFlags::DELETE);
const LP: TransferFlags = TransferFlags::LOAD.union(TransferFlags::PRESELECT);
const LDP: TransferFlags = LD.union(TransferFlags::PRESELECT);
const P: TransferFlags = TransferFlags::PRESELECT;
const N: TransferFlags = TransferFlags::empty();

/// Initial flags for each transfer mode.
///
/// Indexed by [`transfer_mode`]: bit 0 = download-large allowed,
/// bit 1 = purge after fetch, bit 2 = user-initiated session,
/// bit 3 = message exceeds the warn size.
pub const MODE_FLAGS: [TransferFlags; 16] = [
    L, L, LD, LD, L, L, LD, LD, N, LP, N, LDP, P, LP, P, LDP,
];

/// Compute the policy-table index for one message.
#[must_use]
#[allow(clippy::fn_params_excessive_bools)]
pub const fn transfer_mode(
    download_large: bool,
    purge: bool,
    user_initiated: bool,
    oversize: bool,
) -> usize {
    download_large as usize
        + (purge as usize) * 2
        + (user_initiated as usize) * 4
        + (oversize as usize) * 8
}

/// One message known to be on the server during this session.
#[derive(Debug, Clone)]
pub struct TransferEntry {
    /// 1-based server-side message number, as used by LIST/TOP/RETR.
    pub index: u32,
    /// Size in octets from the scan listing.
    pub size: u64,
    pub flags: TransferFlags,
    /// Native or synthesised unique id, once known.
    pub uidl: Option<String>,
    /// Row number in the preselection list, once displayed.
    pub position: Option<usize>,
    /// Header metadata filled lazily via TOP.
    pub headers: Option<MailHeaders>,
}

impl TransferEntry {
    #[must_use]
    pub const fn new(index: u32, size: u64, flags: TransferFlags) -> Self {
        Self {
            index,
            size,
            flags,
            uidl: None,
            position: None,
            headers: None,
        }
    }
}

/// The ordered transfer list, insertion order matching the server's
/// LIST enumeration.
#[derive(Debug, Default)]
pub struct TransferList {
    entries: Vec<TransferEntry>,
}

impl TransferList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: TransferEntry) {
        self.entries.push(entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by its server-side message number.
    pub fn by_index(&mut self, index: u32) -> Option<&mut TransferEntry> {
        self.entries.iter_mut().find(|e| e.index == index)
    }

    #[must_use]
    pub fn any(&self, flags: TransferFlags) -> bool {
        self.entries.iter().any(|e| e.flags.intersects(flags))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TransferEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, TransferEntry> {
        self.entries.iter_mut()
    }

    /// Total size of all messages flagged for download.
    #[must_use]
    pub fn load_bytes(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.flags.contains(TransferFlags::LOAD))
            .map(|e| e.size)
            .sum()
    }
}

impl<'a> IntoIterator for &'a TransferList {
    type Item = &'a TransferEntry;
    type IntoIter = std::slice::Iter<'a, TransferEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &'a mut TransferList {
    type Item = &'a mut TransferEntry;
    type IntoIter = std::slice::IterMut<'a, TransferEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// Counters for one retrieval session (or one whole run when summed).
#[derive(Debug, Clone, Copy)]
pub struct SessionStats {
    /// Messages the server reported during STAT/LIST.
    pub on_server: usize,
    pub downloaded: usize,
    pub deleted: usize,
    /// Messages skipped because their UIDL was already known.
    pub dup_skipped: usize,
    pub error: bool,
    pub started_at: DateTime<Utc>,
}

impl SessionStats {
    #[must_use]
    pub fn start() -> Self {
        Self {
            on_server: 0,
            downloaded: 0,
            deleted: 0,
            dup_skipped: 0,
            error: false,
            started_at: Utc::now(),
        }
    }

    /// Fold another session's counters into this one.
    pub fn absorb(&mut self, other: &Self) {
        self.on_server += other.on_server;
        self.downloaded += other.downloaded;
        self.deleted += other.deleted;
        self.dup_skipped += other.dup_skipped;
        self.error |= other.error;
    }
}
