//! POP3 account and fetch configuration

use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

/// How the TCP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Plain TCP, no TLS at any point.
    #[default]
    None,
    /// TLS is negotiated immediately after connect, before the banner.
    Implicit,
    /// The banner is read in plaintext, then `STLS` upgrades the stream.
    StartTls,
}

/// How the session authenticates after the banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMethod {
    /// Cleartext `USER` / `PASS` exchange.
    #[default]
    UserPass,
    /// `APOP` digest authentication over the banner challenge.
    Apop,
}

/// When the pending-message list is shown to the user before download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preselection {
    /// Never show the list; flags from the policy table stand.
    #[default]
    Never,
    /// Show the list when at least one message exceeds the warn size.
    Large,
    /// Always show the list, every entry forced into it.
    Always,
}

/// One configured POP3 endpoint.
///
/// `uidl_checked` is maintained by the session: it is set once the
/// account's maildrop has been reconciled against the persistent UIDL
/// store in the current run.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct Account {
    /// Server hostname. A `host:port` suffix overrides `port`.
    pub hostname: String,
    pub port: u16,
    pub username: String,
    /// Empty password means "prompt the user before authenticating".
    pub password: String,
    pub tls: TlsMode,
    pub auth: AuthMethod,
    /// Inactive accounts are skipped by the multi-account driver.
    pub active: bool,
    /// Delete messages on the server once fetched (or previously seen).
    pub purge_after_fetch: bool,
    /// Set once this account's UIDLs were reconciled this run.
    pub uidl_checked: bool,
    /// Accept any server certificate (self-signed endpoints).
    pub accept_invalid_certs: bool,
    /// Per-syscall transport timeout.
    pub timeout: Duration,
}

impl Account {
    /// Create an account with the common defaults: active, USER/PASS,
    /// no TLS, no purge, 60 s timeout.
    #[must_use]
    pub fn new(
        hostname: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            username: username.into(),
            password: password.into(),
            tls: TlsMode::default(),
            auth: AuthMethod::default(),
            active: true,
            purge_after_fetch: false,
            uidl_checked: false,
            accept_invalid_certs: false,
            timeout: Duration::from_secs(60),
        }
    }

    /// Load a single account from environment variables.
    ///
    /// Reads from `.env` if present. Required variables:
    /// - `POP3_USERNAME`
    /// - `POP3_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `POP3_HOST` (default: `127.0.0.1`)
    /// - `POP3_PORT` (default: `110`)
    /// - `POP3_TLS` (`none` | `implicit` | `stls`, default: `none`)
    /// - `POP3_AUTH` (`userpass` | `apop`, default: `userpass`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let tls = match env::var("POP3_TLS").as_deref() {
            Err(_) | Ok("none") => TlsMode::None,
            Ok("implicit") => TlsMode::Implicit,
            Ok("stls") => TlsMode::StartTls,
            Ok(other) => {
                return Err(Error::Config(format!("Invalid POP3_TLS: {other}")));
            }
        };
        let auth = match env::var("POP3_AUTH").as_deref() {
            Err(_) | Ok("userpass") => AuthMethod::UserPass,
            Ok("apop") => AuthMethod::Apop,
            Ok(other) => {
                return Err(Error::Config(format!("Invalid POP3_AUTH: {other}")));
            }
        };

        let mut account = Self::new(
            env::var("POP3_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            env::var("POP3_PORT")
                .unwrap_or_else(|_| "110".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid POP3_PORT: {e}")))?,
            env::var("POP3_USERNAME")
                .map_err(|_| Error::Config("POP3_USERNAME not set".into()))?,
            env::var("POP3_PASSWORD")
                .map_err(|_| Error::Config("POP3_PASSWORD not set".into()))?,
        );
        account.tls = tls;
        account.auth = auth;
        Ok(account)
    }

    /// The effective endpoint, honouring a `host:port` suffix embedded in
    /// the hostname over the configured port.
    #[must_use]
    pub fn endpoint(&self) -> (String, u16) {
        if let Some((host, port)) = self.hostname.rsplit_once(':')
            && let Ok(port) = port.parse::<u16>()
        {
            return (host.to_string(), port);
        }
        (self.hostname.clone(), self.port)
    }

    /// The bare hostname without any embedded port, used to key UIDLs.
    #[must_use]
    pub fn bare_hostname(&self) -> String {
        self.endpoint().0
    }

    /// Validate the parts a session cannot work without.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() {
            return Err(Error::Config("account has no hostname".into()));
        }
        if self.username.is_empty() {
            return Err(Error::Config("account has no username".into()));
        }
        let (_, port) = self.endpoint();
        if port == 0 {
            return Err(Error::Config("account has port 0".into()));
        }
        Ok(())
    }
}

/// Knobs shared by every account in one retrieval run.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct FetchOptions {
    /// Download messages even when they exceed `warn_size`.
    pub download_large: bool,
    /// Size in bytes above which a message counts as oversize; `None`
    /// disables the check.
    pub warn_size: Option<u64>,
    pub preselection: Preselection,
    /// Consult the persistent UIDL store to skip already-seen messages.
    pub avoid_duplicates: bool,
    /// Whether the user started this run by hand (enables preselection).
    pub user_initiated: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            download_large: true,
            warn_size: None,
            preselection: Preselection::Never,
            avoid_duplicates: true,
            user_initiated: false,
        }
    }
}
