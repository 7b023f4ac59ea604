use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

const SYNC_TIMEOUT_KEY: &str = "syncTimeout";
const POOL_SIZE_KEY: &str = "poolSize";

fn default_sync_timeout_ms() -> u64 {
    5000
}

fn default_pool_size() -> usize {
    10
}

/// Connection settings shared by the stream and storage providers.
///
/// The options are reduced to a single configuration string by
/// [`to_config_string`](Self::to_config_string); that string is the key under
/// which the [`ConnectionCache`](crate::ConnectionCache) shares connections.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisOptions {
    /// Redis connection URL (e.g. `redis://127.0.0.1:6379`).
    #[serde(default)]
    pub connection_string: String,

    /// Timeout applied to synchronous round trips, in milliseconds.
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,

    /// Number of pooled command connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            sync_timeout_ms: default_sync_timeout_ms(),
            pool_size: default_pool_size(),
        }
    }
}

impl std::fmt::Debug for RedisOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisOptions")
            .field("connection_string", &redact_userinfo(&self.connection_string))
            .field("sync_timeout_ms", &self.sync_timeout_ms)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

impl RedisOptions {
    /// Create options for the given connection URL.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Self::default()
        }
    }

    /// Set the synchronous round-trip timeout.
    #[must_use]
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the command pool size.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// The synchronous round-trip timeout as a [`Duration`].
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// Serialize the options into the connection cache key.
    ///
    /// The format is `{connection_string},syncTimeout={ms},poolSize={n}`.
    pub fn to_config_string(&self) -> String {
        format!(
            "{},{SYNC_TIMEOUT_KEY}={},{POOL_SIZE_KEY}={}",
            self.connection_string, self.sync_timeout_ms, self.pool_size
        )
    }

    /// Check that the options can be used to connect.
    ///
    /// `owner` names the provider in the error message.
    pub fn validate(&self, owner: &str) -> Result<(), TransportError> {
        if self.connection_string.trim().is_empty() {
            return Err(TransportError::Configuration(format!(
                "options for provider '{owner}' are invalid: connection_string is empty"
            )));
        }
        if self.pool_size == 0 {
            return Err(TransportError::Configuration(format!(
                "options for provider '{owner}' are invalid: pool_size must be at least 1"
            )));
        }
        Ok(())
    }
}

/// A parsed configuration string, as consumed by backend factories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub url: String,
    pub sync_timeout: Duration,
    pub pool_size: usize,
}

impl ConnectionConfig {
    /// Parse a configuration string produced by
    /// [`RedisOptions::to_config_string`]. Settings other than the URL are
    /// optional; unknown settings are rejected.
    pub fn parse(configuration: &str) -> Result<Self, TransportError> {
        let mut parts = configuration.split(',');
        let url = parts.next().map(str::trim).unwrap_or_default();
        if url.is_empty() {
            return Err(TransportError::Configuration(
                "configuration string has no connection URL".into(),
            ));
        }

        let mut config = Self {
            url: url.to_owned(),
            sync_timeout: Duration::from_millis(default_sync_timeout_ms()),
            pool_size: default_pool_size(),
        };

        for part in parts.map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                TransportError::Configuration(format!("malformed setting '{part}'"))
            })?;
            match key.trim() {
                SYNC_TIMEOUT_KEY => {
                    let ms: u64 = value.trim().parse().map_err(|_| {
                        TransportError::Configuration(format!("invalid {SYNC_TIMEOUT_KEY} '{value}'"))
                    })?;
                    config.sync_timeout = Duration::from_millis(ms);
                }
                POOL_SIZE_KEY => {
                    config.pool_size = value.trim().parse().map_err(|_| {
                        TransportError::Configuration(format!("invalid {POOL_SIZE_KEY} '{value}'"))
                    })?;
                }
                other => {
                    return Err(TransportError::Configuration(format!(
                        "unknown setting '{other}'"
                    )));
                }
            }
        }

        Ok(config)
    }
}

/// Hide the `user:password@` part of a URL.
fn redact_userinfo(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}[REDACTED]{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_owned(),
    }
}
