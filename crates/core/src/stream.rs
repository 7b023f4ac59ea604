use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::uniform_hash;

/// The identity half of a stream; paired with a namespace it names a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl StreamId {
    /// Wrap an existing UUID.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a random stream identity.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Stable 32-bit hash of `(self, namespace)`, used to place the stream on
    /// the partition ring.
    #[must_use]
    pub fn uniform_hash(&self, namespace: &str) -> u32 {
        uniform_hash([namespace.as_bytes(), self.0.as_bytes().as_slice()])
    }
}

impl From<Uuid> for StreamId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
