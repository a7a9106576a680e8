#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for fetching POP3 mail into a directory and exporting it to mbox

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use popfetch::{
    Account, ExportMail, ExportTask, FetchOptions, MailHeaders, MailRef, MailStore,
    MessageStatus, NoHooks, UidlStore, export_mbox, fetch_accounts, new_abort_flag,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "popfetch-cli")]
#[command(about = "Fetch POP3 mail into a directory, export it as mbox")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch mail from the account configured via POP3_* variables
    Fetch {
        /// Directory to store downloaded messages in
        #[arg(long, default_value = "./mail")]
        dest: PathBuf,

        /// Path of the persistent UIDL store (duplicate suppression)
        #[arg(long)]
        uidl_store: Option<PathBuf>,

        /// Delete messages from the server after fetching
        #[arg(long)]
        purge: bool,
    },

    /// Export the message files of a directory into one mbox file
    Export {
        /// Directory holding the message files
        dir: PathBuf,

        /// Mbox file to write
        #[arg(long, short)]
        output: PathBuf,

        /// Append to the mbox instead of overwriting it
        #[arg(long)]
        append: bool,
    },
}

/// Message store that drops every download into one flat directory.
struct DirStore {
    dir: PathBuf,
    counter: u32,
}

impl MailStore for DirStore {
    fn new_mail_file(&mut self) -> popfetch::Result<PathBuf> {
        loop {
            self.counter += 1;
            let path = self.dir.join(format!("{:05}.msg", self.counter));
            if !path.exists() {
                return Ok(path);
            }
        }
    }

    fn examine(&mut self, path: &Path) -> popfetch::Result<MailHeaders> {
        let bytes = std::fs::read(path)?;
        let mut headers = parse_headers(&bytes);
        headers.mail_file = path.to_path_buf();
        Ok(headers)
    }

    fn ingest(&mut self, _headers: MailHeaders, path: &Path) -> popfetch::Result<MailRef> {
        Ok(MailRef {
            file: path.to_path_buf(),
        })
    }
}

/// Minimal RFC 5322 header scan: enough for display, message ids, and
/// envelope synthesis. Not a MIME parser.
fn parse_headers(bytes: &[u8]) -> MailHeaders {
    let mut headers = MailHeaders::default();
    for line in bytes.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            break;
        }
        let line_str = String::from_utf8_lossy(line);
        let Some((name, value)) = line_str.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.to_ascii_lowercase().as_str() {
            "from" => headers.from = value,
            "to" => headers.to = value,
            "reply-to" => headers.reply_to = value,
            "subject" => headers.subject = value,
            "message-id" => headers.message_id = value,
            "date" => {
                headers.date = chrono::DateTime::parse_from_rfc2822(&value).ok();
            }
            _ => {}
        }
    }
    headers
}

/// Pull the bare address out of a `Display Name <addr>` header value.
fn bare_address(from: &str) -> String {
    from.rfind('<')
        .and_then(|start| from[start..].find('>').map(|end| &from[start + 1..start + end]))
        .unwrap_or(from)
        .to_string()
}

fn envelope_date(headers: &MailHeaders) -> NaiveDateTime {
    headers
        .date
        .map_or_else(|| chrono::Utc::now().naive_utc(), |d| d.naive_local())
}

async fn run_fetch(dest: PathBuf, uidl_path: Option<PathBuf>, purge: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(&dest)?;

    let mut account = Account::from_env()?;
    account.purge_after_fetch = purge;
    let mut accounts = vec![account];

    let mut uidl = uidl_path.map(UidlStore::load).transpose()?;
    let options = FetchOptions {
        avoid_duplicates: uidl.is_some(),
        ..FetchOptions::default()
    };

    let mut store = DirStore {
        dir: dest,
        counter: 0,
    };
    let stats = fetch_accounts(
        &mut accounts,
        &options,
        uidl.as_mut(),
        &mut store,
        &mut NoHooks,
        &new_abort_flag(),
    )
    .await?;

    println!(
        "{} on server, {} downloaded, {} duplicates skipped, {} deleted",
        stats.on_server, stats.downloaded, stats.dup_skipped, stats.deleted
    );
    if stats.error {
        anyhow::bail!("transfer finished with errors");
    }
    Ok(())
}

async fn run_export(dir: PathBuf, output: PathBuf, append: bool) -> anyhow::Result<()> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("msg" | "eml")
            )
        })
        .collect();
    files.sort();
    anyhow::ensure!(!files.is_empty(), "no message files in {}", dir.display());

    let mut mails = Vec::with_capacity(files.len());
    for file in files {
        let headers = parse_headers(&std::fs::read(&file)?);
        mails.push(ExportMail {
            from_address: bare_address(&headers.from),
            date: envelope_date(&headers),
            status: MessageStatus {
                old: true,
                ..MessageStatus::default()
            },
            mail_file: file,
        });
    }

    let task = ExportTask {
        mails,
        output,
        append,
    };
    let stats = export_mbox(&task, &new_abort_flag(), |_| {}).await?;
    println!(
        "exported {} messages ({} bytes) to {}",
        stats.exported,
        stats.bytes,
        task.output.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Fetch {
            dest,
            uidl_store,
            purge,
        } => run_fetch(dest, uidl_store, purge).await,
        Command::Export {
            dir,
            output,
            append,
        } => run_export(dir, output, append).await,
    }
}
