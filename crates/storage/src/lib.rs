//! Grain state persistence over a shared connection.
//!
//! State is stored as JSON under `urn:{type}:{provider}:{scope}:{grain}`.
//! Writes are guarded by an ETag: an MD5 fingerprint of a canonical JSON
//! rendering, so two writers holding logically identical state compute the
//! same tag.

pub mod error;
pub mod etag;
pub mod key;
pub mod options;
pub mod redis;
pub mod storage;

pub use error::StorageError;
pub use etag::compute_etag;
pub use key::{StorageKey, urn};
pub use options::{PersistenceLifetime, StorageOptions};
pub use redis::RedisGrainStorage;
pub use storage::{GrainState, GrainStorage};
