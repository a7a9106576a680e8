#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! POP3 mail retrieval and mbox export core
//!
//! An RFC 1939 client session (plain TCP, implicit TLS, or STLS
//! upgrade) that downloads messages into a caller-supplied mail store,
//! skipping messages seen in earlier sessions via a persistent UIDL
//! set, plus an mboxrd exporter for stored messages.
//!
//! The surrounding application provides the folder layer and UI
//! through the traits in [`hooks`]; everything else — transport,
//! dot-stuff decoding, the command engine, session orchestration,
//! duplicate suppression, and export — lives here.

mod command;
mod config;
mod decoder;
mod error;
mod hooks;
mod mbox;
mod session;
mod transfer;
mod transport;
mod uidl;

pub use command::{Command, apop_digest};
pub use config::{Account, AuthMethod, FetchOptions, Preselection, TlsMode};
pub use error::{ConnectError, Error, PopError, Result};
pub use hooks::{MailHeaders, MailRef, MailStore, NoHooks, Progress, SessionHooks};
pub use mbox::{ExportMail, ExportStats, ExportTask, MessageStatus, export_mbox};
pub use session::{Session, fetch_accounts};
pub use transfer::{SessionStats, TransferEntry, TransferFlags, TransferList};
pub use transport::{AbortFlag, new_abort_flag};
pub use uidl::UidlStore;
