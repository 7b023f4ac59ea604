use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one partition of a queue provider.
///
/// A queue id carries the provider-derived prefix, its index on the ring and
/// the ring position it owns. Its [`Display`](fmt::Display) form,
/// `{prefix}-{number}`, is the partition-derived half of a channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId {
    prefix: String,
    number: u32,
    uniform_hash: u32,
}

impl QueueId {
    /// Create a queue id. The prefix is lower-cased.
    #[must_use]
    pub fn new(prefix: &str, number: u32, uniform_hash: u32) -> Self {
        Self {
            prefix: prefix.to_lowercase(),
            number,
            uniform_hash,
        }
    }

    /// The provider-derived prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The partition index in `[0, N)`.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// The ring position owned by this partition.
    #[must_use]
    pub const fn uniform_hash(&self) -> u32 {
        self.uniform_hash
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix, self.number)
    }
}
