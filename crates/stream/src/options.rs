use std::time::Duration;

use redstream_transport::RedisOptions;
use serde::{Deserialize, Serialize};

use crate::channel::NameBounds;
use crate::error::QueueError;

fn default_operation_timeout_ms() -> u64 {
    15_000
}

fn default_queue_cache_size() -> usize {
    1000
}

fn default_total_queue_count() -> u32 {
    8
}

/// Which length bounds channel names are held to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelNameProfile {
    /// 3 to 63 characters.
    #[default]
    Standard,
    /// 5 to 256 characters.
    Extended,
}

impl ChannelNameProfile {
    pub const fn bounds(self) -> NameBounds {
        match self {
            Self::Standard => NameBounds::STANDARD,
            Self::Extended => NameBounds::EXTENDED,
        }
    }
}

/// When the single overflow warning of a drain interval is emitted.
///
/// A drain interval runs from one drain of the buffer to the next. Either
/// policy logs at most one warning per interval, however many messages were
/// dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowWarning {
    /// Warn as soon as the first message of the interval is dropped.
    #[default]
    FirstDrop,
    /// Warn at the next drain, with the total dropped during the interval.
    OnDrain,
}

/// Configuration for a queue provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Connection settings.
    #[serde(flatten)]
    pub redis: RedisOptions,

    /// Operations slower than this log a warning, in milliseconds.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Maximum number of buffered messages per partition.
    #[serde(default = "default_queue_cache_size")]
    pub queue_cache_size: usize,

    #[serde(default)]
    pub channel_name_profile: ChannelNameProfile,

    #[serde(default)]
    pub overflow_warning: OverflowWarning,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            redis: RedisOptions::default(),
            operation_timeout_ms: default_operation_timeout_ms(),
            queue_cache_size: default_queue_cache_size(),
            channel_name_profile: ChannelNameProfile::default(),
            overflow_warning: OverflowWarning::default(),
        }
    }
}

impl StreamOptions {
    /// Create options for the given connection URL.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            redis: RedisOptions::new(connection_string),
            ..Self::default()
        }
    }

    /// Set the slow-operation threshold.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the per-partition buffer capacity.
    #[must_use]
    pub fn with_queue_cache_size(mut self, size: usize) -> Self {
        self.queue_cache_size = size;
        self
    }

    #[must_use]
    pub fn with_channel_name_profile(mut self, profile: ChannelNameProfile) -> Self {
        self.channel_name_profile = profile;
        self
    }

    #[must_use]
    pub fn with_overflow_warning(mut self, policy: OverflowWarning) -> Self {
        self.overflow_warning = policy;
        self
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Check the options before any connection is attempted.
    ///
    /// `provider` names the owning provider in the error message.
    pub fn validate(&self, provider: &str) -> Result<(), QueueError> {
        self.redis
            .validate(provider)
            .map_err(|e| QueueError::Configuration(e.to_string()))?;
        if self.queue_cache_size == 0 {
            return Err(QueueError::Configuration(format!(
                "options for provider '{provider}' are invalid: queue_cache_size must be at least 1"
            )));
        }
        if self.operation_timeout_ms == 0 {
            return Err(QueueError::Configuration(format!(
                "options for provider '{provider}' are invalid: operation_timeout_ms must be positive"
            )));
        }
        Ok(())
    }
}

/// Configuration for [`HashRingQueueMapper`](crate::HashRingQueueMapper).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRingMapperOptions {
    /// Number of partitions. Fixed for the lifetime of a deployment.
    #[serde(default = "default_total_queue_count")]
    pub total_queue_count: u32,
}

impl Default for HashRingMapperOptions {
    fn default() -> Self {
        Self {
            total_queue_count: default_total_queue_count(),
        }
    }
}

impl HashRingMapperOptions {
    pub fn new(total_queue_count: u32) -> Self {
        Self { total_queue_count }
    }

    pub fn validate(&self, provider: &str) -> Result<(), QueueError> {
        if self.total_queue_count == 0 {
            return Err(QueueError::Configuration(format!(
                "options for provider '{provider}' are invalid: total_queue_count must be at least 1"
            )));
        }
        Ok(())
    }
}
