//! POP3 session orchestration
//!
//! A [`Session`] value owns everything one account's retrieval needs:
//! the transport, the transfer list, and the statistics. It drives the
//! protocol from banner to QUIT:
//!
//! ```text
//! connect -> [TLS] -> banner -> [STLS -> TLS] -> auth -> STAT
//!   -> LIST -> [remote filters] -> [UIDL dedupe] -> [preselect]
//!   -> RETR* -> DELE* -> QUIT
//! ```
//!
//! [`fetch_accounts`] is the outer loop over configured accounts; each
//! iteration constructs a fresh session and tears it down again, and a
//! failed account never stops the run (an abort does).

use crate::command::{self, Command, apop_digest};
use crate::config::{Account, AuthMethod, FetchOptions, Preselection, TlsMode};
use crate::decoder;
use crate::error::{ConnectError, Error, PopError, Result};
use crate::hooks::{MailStore, Progress, SessionHooks};
use crate::transfer::{
    MODE_FLAGS, SessionStats, TransferEntry, TransferFlags, TransferList, transfer_mode,
};
use crate::transport::{AbortFlag, Transport};
use crate::uidl::UidlStore;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Preselection pauses longer than this earn a STAT keep-alive before
/// retrieval continues.
const KEEPALIVE_AFTER: Duration = Duration::from_secs(30);

/// Body lines requested with TOP when probing headers.
const TOP_PREVIEW_LINES: u32 = 1;

/// One account's POP3 session, from connect to quit.
pub struct Session<'a, S: MailStore, H: SessionHooks> {
    account: &'a mut Account,
    options: &'a FetchOptions,
    uidl: Option<&'a mut UidlStore>,
    store: &'a mut S,
    hooks: &'a mut H,
    transport: Transport,
    list: TransferList,
    stats: SessionStats,
    /// APOP challenge extracted from the banner, brackets included.
    challenge: Option<String>,
    /// Hostname without any embedded port, used to key UIDLs.
    hostname: String,
    /// Latched on the first session-fatal failure; later command
    /// attempts short-circuit so the peer is not driven further.
    failed: bool,
}

impl<'a, S: MailStore, H: SessionHooks> Session<'a, S, H> {
    /// Run a complete retrieval session for one account.
    ///
    /// Account-fatal protocol failures are logged, recorded in the
    /// returned stats, and do not produce an `Err`; connection
    /// failures and aborts do.
    pub async fn run(
        account: &'a mut Account,
        options: &'a FetchOptions,
        uidl: Option<&'a mut UidlStore>,
        store: &'a mut S,
        hooks: &'a mut H,
        abort: AbortFlag,
    ) -> Result<SessionStats> {
        let mut session = Self::connect(account, options, uidl, store, hooks, abort).await?;
        let outcome = session.drive().await;
        session.finish(outcome).await
    }

    /// Send a STAT keep-alive so an idle server does not drop us.
    /// STAT rather than NOOP: several servers ignore NOOP when
    /// deciding to time an idle client out.
    pub async fn keep_alive(&mut self) -> Result<()> {
        self.exec(&Command::Stat).await.map(|_| ())
    }

    async fn connect(
        account: &'a mut Account,
        options: &'a FetchOptions,
        uidl: Option<&'a mut UidlStore>,
        store: &'a mut S,
        hooks: &'a mut H,
        abort: AbortFlag,
    ) -> Result<Self> {
        account.validate()?;
        let (host, port) = account.endpoint();

        hooks.progress(&Progress {
            current: 0,
            total: 0,
            bytes: 0,
            total_bytes: 0,
            label: "Connecting",
        });

        let mut transport = Transport::connect(&host, port, account.timeout, abort).await?;

        // implicit TLS negotiates before anything is read
        if account.tls == TlsMode::Implicit {
            transport
                .upgrade_tls(&host, account.accept_invalid_certs)
                .await?;
        }

        let banner = command::send(&mut transport, &Command::Connect).await?;
        debug!("POP3 banner: {banner}");

        // STLS reads the banner first, upgrades, and keeps it: the
        // server stays in the authorization state (RFC 2595)
        if account.tls == TlsMode::StartTls {
            command::send(&mut transport, &Command::Stls).await?;
            transport
                .upgrade_tls(&host, account.accept_invalid_certs)
                .await?;
        }

        Ok(Self {
            account,
            options,
            uidl,
            store,
            hooks,
            transport,
            list: TransferList::new(),
            stats: SessionStats::start(),
            challenge: extract_challenge(&banner),
            hostname: host,
            failed: false,
        })
    }

    /// The login-through-delete protocol body.
    async fn drive(&mut self) -> Result<()> {
        self.authenticate().await?;

        let count = self.stat().await?;
        if count == 0 {
            info!("no messages on server '{}'", self.hostname);
            self.account.uidl_checked = true;
            return Ok(());
        }
        self.stats.on_server = count;
        info!("{} messages waiting on server '{}'", count, self.hostname);

        self.list_messages().await?;

        if self.hooks.remote_filters_active() {
            self.apply_remote_filters().await?;
        }

        if self.options.avoid_duplicates && self.uidl.is_some() {
            self.filter_duplicates().await?;
            self.account.uidl_checked = true;
        }

        self.preselect().await?;
        self.retrieve_flagged().await?;
        self.delete_flagged().await?;
        Ok(())
    }

    /// Convert the drive outcome into the session result, closing the
    /// transport on every path.
    async fn finish(mut self, outcome: Result<()>) -> Result<SessionStats> {
        match outcome {
            Ok(()) => {
                if let Err(e) = self.exec(&Command::Quit).await {
                    warn!("QUIT rejected by '{}': {}", self.hostname, e);
                }
                self.transport.close().await;
                Ok(self.stats)
            }
            Err(e) if e.is_abort() => {
                // a cooperative abort still says goodbye when the
                // transport is intact; a faulted one gets dropped cold
                if !self.transport.is_faulted() && self.transport.is_connected() {
                    self.transport.send_line_raw("QUIT").await.ok();
                }
                self.transport.close().await;
                Err(Error::Aborted)
            }
            Err(e) => {
                error!("mail transfer from '{}' failed: {}", self.hostname, e);
                self.failed = true;
                self.stats.error = true;
                self.transport.close().await;
                Ok(self.stats)
            }
        }
    }

    /// Issue one command, honouring the session-level error latch.
    async fn exec(&mut self, cmd: &Command) -> Result<String> {
        if self.failed {
            return Err(ConnectError::NotConnected.into());
        }
        let result = command::send(&mut self.transport, cmd).await;
        if self.transport.is_faulted() {
            self.failed = true;
        }
        result
    }

    async fn authenticate(&mut self) -> Result<()> {
        if self.account.password.is_empty() {
            match self.hooks.prompt_password(self.account) {
                Some(password) => self.account.password = password,
                None => return Err(Error::Aborted),
            }
        }

        self.hooks.progress(&Progress {
            current: 0,
            total: 0,
            bytes: 0,
            total_bytes: 0,
            label: "Logging in",
        });

        match self.account.auth {
            AuthMethod::Apop => {
                let challenge = self.challenge.clone().ok_or_else(|| {
                    Error::Protocol(PopError {
                        command: "APOP".into(),
                        response: "server banner carries no APOP challenge".into(),
                    })
                })?;
                let digest = apop_digest(&challenge, &self.account.password);
                let user = self.account.username.clone();
                self.exec(&Command::Apop { user, digest }).await?;
            }
            AuthMethod::UserPass => {
                self.exec(&Command::User(self.account.username.clone()))
                    .await?;
                self.exec(&Command::Pass(self.account.password.clone()))
                    .await?;
            }
        }
        Ok(())
    }

    /// STAT; returns the number of messages in the maildrop.
    async fn stat(&mut self) -> Result<usize> {
        let reply = self.exec(&Command::Stat).await?;
        reply
            .split_whitespace()
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| malformed("STAT", &reply))
    }

    /// LIST; builds the transfer list with flags from the policy table.
    async fn list_messages(&mut self) -> Result<()> {
        self.exec(&Command::List).await?;
        let mut payload = Vec::new();
        decoder::read_multiline(&mut self.transport, &mut payload, |_| {}).await?;

        for line in payload.split(|&b| b == b'\n').filter(|l| !l.is_empty()) {
            let line = String::from_utf8_lossy(line);
            let mut fields = line.split_whitespace();
            let (Some(Ok(index)), Some(Ok(size))) = (
                fields.next().map(str::parse::<u32>),
                fields.next().map(str::parse::<u64>),
            ) else {
                debug!("ignoring malformed scan listing '{line}'");
                continue;
            };
            if index == 0 {
                continue;
            }

            let oversize = self.options.warn_size.is_some_and(|warn| size >= warn);
            let mode = transfer_mode(
                self.options.download_large,
                self.account.purge_after_fetch,
                self.options.user_initiated,
                oversize,
            );
            let mut flags = MODE_FLAGS[mode];
            if self.options.preselection == Preselection::Always {
                flags |= TransferFlags::PRESELECT;
            }
            debug!("message {index} ({size} bytes): mode {mode}, flags {flags:?}");

            self.list.push(TransferEntry::new(index, size, flags));
        }
        Ok(())
    }

    /// Complete an entry's cached header metadata via `TOP n 1`.
    ///
    /// TOP is optional in RFC 1939, so a `-ERR` leaves the entry
    /// untouched instead of failing the session.
    async fn fetch_details(&mut self, index: u32) -> Result<()> {
        if self.list.by_index(index).is_none_or(|e| e.headers.is_some()) {
            return Ok(());
        }

        match self
            .exec(&Command::Top {
                index,
                lines: TOP_PREVIEW_LINES,
            })
            .await
        {
            Ok(_) => {}
            Err(Error::Protocol(e)) => {
                debug!("TOP not available for message {index}: {e}");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let mut payload = Vec::new();
        decoder::read_multiline(&mut self.transport, &mut payload, |_| {}).await?;

        let scratch = tempfile::NamedTempFile::new()?;
        tokio::fs::write(scratch.path(), &payload).await?;
        match self.store.examine(scratch.path()) {
            Ok(headers) => {
                if let Some(entry) = self.list.by_index(index) {
                    entry.headers = Some(headers);
                }
            }
            Err(e) => warn!("could not examine headers of message {index}: {e}"),
        }
        Ok(())
    }

    /// Run the user's server-side rules over every listed message.
    async fn apply_remote_filters(&mut self) -> Result<()> {
        debug!("applying remote filters on '{}'", self.hostname);
        let indices: Vec<u32> = self.list.iter().map(|e| e.index).collect();
        for index in indices {
            self.fetch_details(index).await?;
            if let Some(entry) = self.list.by_index(index) {
                self.hooks.apply_remote_filters(entry);
            }
        }
        Ok(())
    }

    /// Clear the LOAD flag of every message whose UIDL is already in
    /// the persistent store.
    async fn filter_duplicates(&mut self) -> Result<()> {
        if self.list.is_empty() {
            return Ok(());
        }

        match self.exec(&Command::Uidl).await {
            Ok(_) => self.filter_duplicates_native().await,
            Err(Error::Protocol(_)) => {
                info!(
                    "server '{}' does not support UIDL, deriving ids from message headers",
                    self.hostname
                );
                self.filter_duplicates_fallback().await
            }
            Err(e) => Err(e),
        }
    }

    /// Consume the UIDL listing and match it against the store.
    async fn filter_duplicates_native(&mut self) -> Result<()> {
        let mut payload = Vec::new();
        decoder::read_multiline(&mut self.transport, &mut payload, |_| {}).await?;

        for line in payload.split(|&b| b == b'\n').filter(|l| !l.is_empty()) {
            let line = String::from_utf8_lossy(line);
            let mut fields = line.split_whitespace();
            let (Some(Ok(index)), Some(uidl)) =
                (fields.next().map(str::parse::<u32>), fields.next())
            else {
                debug!("ignoring malformed unique-id listing '{line}'");
                continue;
            };

            let key = format!("{}@{}", uidl, self.hostname);
            if let Some(entry) = self.list.by_index(index) {
                entry.uidl = Some(key);
            }
        }

        self.mark_known_duplicates();
        Ok(())
    }

    /// UIDL fallback: synthesise `<message-id>@<hostname>` via TOP.
    async fn filter_duplicates_fallback(&mut self) -> Result<()> {
        let indices: Vec<u32> = self.list.iter().map(|e| e.index).collect();
        for index in indices {
            if self.transport.abort_requested() {
                return Err(Error::Aborted);
            }
            self.fetch_details(index).await?;
            if let Some(entry) = self.list.by_index(index)
                && entry.uidl.is_none()
                && let Some(headers) = &entry.headers
                && !headers.message_id.is_empty()
            {
                entry.uidl = Some(format!("{}@{}", headers.message_id, self.hostname));
            }
        }

        self.mark_known_duplicates();
        Ok(())
    }

    /// Drop the LOAD flag of entries whose UIDL the store already has.
    /// Counting is keyed to the flag transition, so re-running this is
    /// idempotent.
    fn mark_known_duplicates(&mut self) {
        let Some(store) = self.uidl.as_deref_mut() else {
            return;
        };
        for entry in self.list.iter_mut() {
            let Some(uidl) = &entry.uidl else { continue };
            if store.check(uidl) && entry.flags.contains(TransferFlags::LOAD) {
                debug!("message {} already seen ({})", entry.index, uidl);
                entry.flags.remove(TransferFlags::LOAD);
                self.stats.dup_skipped += 1;
            }
        }
    }

    /// Surface the pending list to the user and adopt their decision.
    async fn preselect(&mut self) -> Result<()> {
        if !self.options.user_initiated {
            return Ok(());
        }
        let show = match self.options.preselection {
            Preselection::Always => true,
            Preselection::Large => self.list.any(TransferFlags::PRESELECT),
            Preselection::Never => false,
        };
        if !show {
            return Ok(());
        }

        // the list is only useful with sender/subject filled in
        let display = TransferFlags::LOAD | TransferFlags::PRESELECT;
        let indices: Vec<u32> = self
            .list
            .iter()
            .filter(|e| e.flags.intersects(display))
            .map(|e| e.index)
            .collect();
        for index in indices {
            self.fetch_details(index).await?;
        }

        let mut position = 0;
        for entry in self.list.iter_mut() {
            if entry.flags.intersects(display) {
                entry.position = Some(position);
                position += 1;
            }
        }

        let waited = Instant::now();
        if !self.hooks.preselect(&mut self.list) {
            return Err(Error::Aborted);
        }
        if waited.elapsed() >= KEEPALIVE_AFTER
            && let Err(e) = self.keep_alive().await
        {
            warn!("keep-alive after preselection failed: {e}");
        }
        Ok(())
    }

    /// RETR every LOAD-flagged entry into the mail store.
    async fn retrieve_flagged(&mut self) -> Result<()> {
        let work: Vec<(u32, u64)> = self
            .list
            .iter()
            .filter(|e| e.flags.contains(TransferFlags::LOAD))
            .map(|e| (e.index, e.size))
            .collect();
        let total = work.len();
        let total_bytes: u64 = work.iter().map(|(_, size)| size).sum();
        let mut bytes_done: u64 = 0;

        for (current, (index, size)) in work.into_iter().enumerate() {
            if self.transport.abort_requested() {
                return Err(Error::Aborted);
            }

            match self
                .retrieve_one(index, current + 1, total, bytes_done, total_bytes)
                .await
            {
                Ok(()) => self.stats.downloaded += 1,
                Err(e) if e.is_abort() => return Err(Error::Aborted),
                Err(Error::Connect(e)) => return Err(e.into()),
                Err(e) => {
                    // this message failed, the session goes on
                    warn!("message {} from '{}' lost: {}", index, self.hostname, e);
                    self.stats.error = true;
                }
            }
            bytes_done += size;
        }
        Ok(())
    }

    async fn retrieve_one(
        &mut self,
        index: u32,
        current: usize,
        total: usize,
        bytes_done: u64,
        total_bytes: u64,
    ) -> Result<()> {
        let path = self.store.new_mail_file()?;
        let result = self
            .retrieve_into(index, &path, current, total, bytes_done, total_bytes)
            .await;

        match result {
            Ok(()) => {
                debug!("message {} stored as {}", index, path.display());
                if let Some(uidl) = self.list.by_index(index).and_then(|e| e.uidl.clone())
                    && let Some(store) = self.uidl.as_deref_mut()
                {
                    store.insert(uidl);
                }
                Ok(())
            }
            Err(e) => {
                tokio::fs::remove_file(&path).await.ok();
                Err(e)
            }
        }
    }

    async fn retrieve_into(
        &mut self,
        index: u32,
        path: &std::path::Path,
        current: usize,
        total: usize,
        bytes_done: u64,
        total_bytes: u64,
    ) -> Result<()> {
        self.exec(&Command::Retr(index)).await?;

        let file = tokio::fs::File::create(path).await?;
        let mut sink = tokio::io::BufWriter::new(file);

        let transport = &mut self.transport;
        let hooks = &mut *self.hooks;
        let received = decoder::read_multiline(transport, &mut sink, |bytes| {
            hooks.progress(&Progress {
                current,
                total,
                bytes: bytes_done + bytes,
                total_bytes,
                label: "Downloading",
            });
        })
        .await?;
        debug!("message {index}: {received} bytes received");

        // the folder layer takes ownership of the finished download
        let headers = self.store.examine(path)?;
        self.store.ingest(headers, path)?;
        Ok(())
    }

    /// DELE every DELETE-flagged entry. Failures are logged, never
    /// fatal: the message simply stays on the server.
    async fn delete_flagged(&mut self) -> Result<()> {
        let work: Vec<u32> = self
            .list
            .iter()
            .filter(|e| e.flags.contains(TransferFlags::DELETE))
            .map(|e| e.index)
            .collect();
        let total = work.len();

        for (current, index) in work.into_iter().enumerate() {
            if self.transport.abort_requested() {
                return Err(Error::Aborted);
            }
            self.hooks.progress(&Progress {
                current: current + 1,
                total,
                bytes: 0,
                total_bytes: 0,
                label: "Deleting",
            });

            match self.exec(&Command::Dele(index)).await {
                Ok(_) => self.stats.deleted += 1,
                Err(Error::Protocol(e)) => {
                    warn!("could not delete message {} on '{}': {}", index, self.hostname, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Fetch mail from every active account in turn.
///
/// One account failing is logged and recorded, and the loop moves on;
/// an abort ends the whole run. The UIDL store is aged per completed
/// account and persisted once at the end.
pub async fn fetch_accounts<S: MailStore, H: SessionHooks>(
    accounts: &mut [Account],
    options: &FetchOptions,
    mut uidl: Option<&mut UidlStore>,
    store: &mut S,
    hooks: &mut H,
    abort: &AbortFlag,
) -> Result<SessionStats> {
    let mut total = SessionStats::start();

    for account in accounts.iter_mut() {
        account.uidl_checked = false;
    }

    for account in accounts.iter_mut().filter(|a| a.active) {
        let host = account.bare_hostname();
        let result = Session::run(
            account,
            options,
            uidl.as_deref_mut(),
            store,
            hooks,
            abort.clone(),
        )
        .await;

        match result {
            Ok(stats) => {
                info!(
                    "downloaded {} mails from server '{}' ({} skipped as duplicates)",
                    stats.downloaded, host, stats.dup_skipped
                );
                total.absorb(&stats);
                if account.uidl_checked
                    && let Some(uidl_store) = uidl.as_deref_mut()
                {
                    uidl_store.end_session(&host);
                }
            }
            Err(e) if e.is_abort() => {
                info!("mail transfer aborted by user");
                return Err(Error::Aborted);
            }
            Err(e) => {
                error!("could not fetch mail from '{}': {}", host, e);
                total.error = true;
            }
        }
    }

    if let Some(uidl_store) = uidl {
        uidl_store.save()?;
    }
    Ok(total)
}

/// The APOP challenge is the first `<...>` token of the banner,
/// brackets included.
fn extract_challenge(banner: &str) -> Option<String> {
    let start = banner.find('<')?;
    let end = banner[start..].find('>')? + start;
    Some(banner[start..=end].to_string())
}

fn malformed(command: &str, response: &str) -> Error {
    Error::Protocol(PopError {
        command: command.to_string(),
        response: format!("malformed reply '{response}'"),
    })
}
