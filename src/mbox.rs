//! Mbox export
//!
//! Writes a list of stored message files into a single mailbox file in
//! the mboxrd dialect: every message starts with an envelope `From `
//! line, any body or header line matching `>*From ` gains one more `>`,
//! and `Status:` / `X-Status:` headers are replaced with ones
//! synthesised from the message's local status flags.

use crate::error::{Error, Result};
use crate::hooks::Progress;
use crate::transport::AbortFlag;
use chrono::NaiveDateTime;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

/// Local status flags of a stored message, as kept by the folder index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct MessageStatus {
    /// The message has been read.
    pub read: bool,
    /// The message is not new (seen in an earlier run).
    pub old: bool,
    pub replied: bool,
    pub marked: bool,
    pub deleted: bool,
}

impl MessageStatus {
    /// Value of the synthesised `Status:` header.
    #[must_use]
    pub fn status_header(&self) -> String {
        let mut value = String::new();
        if self.read {
            value.push('R');
        }
        if self.old {
            value.push('O');
        }
        value
    }

    /// Value of the synthesised `X-Status:` header.
    #[must_use]
    pub fn xstatus_header(&self) -> String {
        let mut value = String::new();
        if self.replied {
            value.push('A');
        }
        if self.marked {
            value.push('F');
        }
        if self.deleted {
            value.push('D');
        }
        value
    }
}

/// One message to export.
#[derive(Debug, Clone)]
pub struct ExportMail {
    /// On-disk message file (RFC 5322 headers + body, LF or CRLF).
    pub mail_file: PathBuf,
    /// Envelope sender for the `From ` line.
    pub from_address: String,
    /// The message's `Date` header, timezone already stripped; written
    /// ctime-style into the envelope line.
    pub date: NaiveDateTime,
    pub status: MessageStatus,
}

/// A complete export job.
#[derive(Debug, Clone)]
pub struct ExportTask {
    pub mails: Vec<ExportMail>,
    pub output: PathBuf,
    /// Append to an existing mailbox instead of overwriting it.
    pub append: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportStats {
    pub exported: usize,
    pub bytes: u64,
}

/// Export all messages in `task`, in input order.
///
/// A write error or a raised abort flag stops the whole export and the
/// partially written file is left in place for the caller to deal
/// with. A read error on any source message likewise stops the export.
pub async fn export_mbox(
    task: &ExportTask,
    abort: &AbortFlag,
    mut progress: impl FnMut(&Progress<'_>),
) -> Result<ExportStats> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(task.append)
        .truncate(!task.append)
        .open(&task.output)
        .await?;
    let mut out = BufWriter::new(file);
    let mut stats = ExportStats::default();
    let total = task.mails.len();

    for (i, mail) in task.mails.iter().enumerate() {
        if abort.load(Ordering::Relaxed) {
            return Err(Error::Aborted);
        }

        progress(&Progress {
            current: i + 1,
            total,
            bytes: stats.bytes,
            total_bytes: 0,
            label: "Exporting",
        });

        debug!("exporting {} to mbox", mail.mail_file.display());
        stats.bytes += write_message(&mut out, mail, abort).await?;
        stats.exported += 1;
    }

    out.flush().await?;
    info!(
        "exported {} messages ({} bytes) to {}",
        stats.exported,
        stats.bytes,
        task.output.display()
    );
    Ok(stats)
}

/// Write one message block: envelope line, synthesised status headers,
/// then the transformed message body.
async fn write_message<W>(out: &mut W, mail: &ExportMail, abort: &AbortFlag) -> Result<u64>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let contents = tokio::fs::read(&mail.mail_file).await?;

    let mut block = Vec::with_capacity(contents.len() + 128);
    block.extend_from_slice(
        format!(
            "From {} {}\n",
            mail.from_address,
            mail.date.format("%a %b %e %H:%M:%S %Y")
        )
        .as_bytes(),
    );
    block.extend_from_slice(format!("Status: {}\n", mail.status.status_header()).as_bytes());
    block.extend_from_slice(format!("X-Status: {}\n", mail.status.xstatus_header()).as_bytes());

    let mut in_header = true;
    for line in contents.split_inclusive(|&b| b == b'\n') {
        if abort.load(Ordering::Relaxed) {
            return Err(Error::Aborted);
        }

        // a bare newline ends the header region
        if line == b"\n" || line == b"\r\n" {
            in_header = false;
            block.extend_from_slice(line);
            continue;
        }

        let unquoted = strip_quotes(line);
        if unquoted.starts_with(b"From ") {
            // mboxrd: quote From, >From, >>From, ...
            block.push(b'>');
        } else if in_header
            && (line.starts_with(b"Status: ") || line.starts_with(b"X-Status: "))
        {
            // replaced by the synthesised headers above
            continue;
        }

        block.extend_from_slice(line);
        if !line.ends_with(b"\n") {
            block.push(b'\n');
        }
    }

    out.write_all(&block).await?;
    Ok(block.len() as u64)
}

/// The line content after any leading run of `>` quoting characters.
fn strip_quotes(line: &[u8]) -> &[u8] {
    let start = line.iter().take_while(|&&b| b == b'>').count();
    &line[start..]
}
