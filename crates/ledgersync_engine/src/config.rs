//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::fmt;
use std::time::Duration;

/// Default debounce window between a local write and the sync round.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);
/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of retained sync log entries.
pub const DEFAULT_LOG_CAPACITY: usize = 120;
/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("ledgersync/", env!("CARGO_PKG_VERSION"));

/// Remote WebDAV endpoint settings.
///
/// Fields hold raw user input; every accessor returns the normalized form.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EndpointConfig {
    /// `http` or `https`.
    pub scheme: String,
    /// Server host name.
    pub host: String,
    /// Port as typed by the user; empty for the scheme default.
    pub port: String,
    /// Sync root directory on the server.
    pub path: String,
    /// Basic auth user.
    pub username: String,
    /// Basic auth password. Used verbatim.
    pub password: String,
    /// Passphrase the AEAD key is derived from.
    pub encryption_key: String,
}

impl EndpointConfig {
    /// Creates a configuration for `host` with default scheme and path.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            scheme: "https".into(),
            host: host.into(),
            path: "/ledgersync".into(),
            ..Self::default()
        }
    }

    /// Sets the scheme.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Sets the port.
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    /// Sets the sync root path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the Basic auth credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Sets the encryption passphrase.
    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = key.into();
        self
    }

    /// `http` only when explicitly requested, otherwise `https`.
    pub fn normalized_scheme(&self) -> &'static str {
        if self.scheme.trim().eq_ignore_ascii_case("http") {
            "http"
        } else {
            "https"
        }
    }

    /// Trimmed host.
    pub fn normalized_host(&self) -> &str {
        self.host.trim()
    }

    /// Port in `1..=65535`, or `None`.
    pub fn normalized_port(&self) -> Option<u16> {
        match self.port.trim().parse::<u32>() {
            Ok(p) if (1..=65535).contains(&p) => u16::try_from(p).ok(),
            _ => None,
        }
    }

    /// Path with a leading `/` and no trailing `/`; `/` when empty.
    pub fn normalized_path(&self) -> String {
        let trimmed = self.path.trim();
        if trimmed.is_empty() {
            return "/".into();
        }
        let mut path = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        while path.len() > 1 && path.ends_with('/') {
            path.pop();
        }
        path
    }

    /// Trimmed user name.
    pub fn normalized_username(&self) -> &str {
        self.username.trim()
    }

    /// Trimmed passphrase.
    pub fn normalized_encryption_key(&self) -> &str {
        self.encryption_key.trim()
    }

    fn authority(&self) -> Option<String> {
        let host = self.normalized_host();
        if host.is_empty() {
            return None;
        }
        Some(match self.normalized_port() {
            Some(port) => format!("{}://{host}:{port}", self.normalized_scheme()),
            None => format!("{}://{host}", self.normalized_scheme()),
        })
    }

    /// URL of the sync root, or `None` when no host is set.
    pub fn base_url(&self) -> Option<String> {
        Some(format!("{}{}", self.authority()?, self.normalized_path()))
    }

    /// URL of a file directly inside the sync root.
    pub fn file_url(&self, file_name: &str) -> Option<String> {
        let base = self.base_url()?;
        if base.ends_with('/') {
            Some(format!("{base}{file_name}"))
        } else {
            Some(format!("{base}/{file_name}"))
        }
    }

    /// Key identifying this endpoint in local watermark state.
    pub fn endpoint_key(&self) -> String {
        [
            self.normalized_scheme().to_string(),
            self.normalized_host().to_string(),
            self.normalized_port().unwrap_or(0).to_string(),
            self.normalized_path(),
            self.normalized_username().to_string(),
        ]
        .join("|")
    }

    /// Human-readable endpoint description.
    pub fn description(&self) -> String {
        self.base_url().unwrap_or_else(|| "(not configured)".into())
    }

    /// Whether the endpoint can be used for a sync round.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Fails with [`SyncError::ConfigurationInvalid`] when host or key is missing.
    pub fn validate(&self) -> SyncResult<()> {
        if self.normalized_host().is_empty() {
            return Err(SyncError::ConfigurationInvalid("server host is missing".into()));
        }
        if self.normalized_encryption_key().is_empty() {
            return Err(SyncError::ConfigurationInvalid(
                "encryption key is missing".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("base_url", &self.base_url())
            .field("username", &self.normalized_username())
            .field("password", &"[REDACTED]")
            .field("encryption_key", &"[REDACTED]")
            .finish()
    }
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device id written into every event and changeset.
    pub device_id: String,
    /// Quiet period before a triggered round runs.
    pub debounce: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// `User-Agent` header.
    pub user_agent: String,
    /// Number of retained log entries.
    pub log_capacity: usize,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            debounce: DEFAULT_DEBOUNCE,
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.into(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    /// Sets the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the log capacity.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }
}
