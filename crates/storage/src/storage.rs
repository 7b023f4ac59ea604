use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StorageError;

/// The in-memory state of one grain together with its concurrency tag.
#[derive(Debug, Clone, PartialEq)]
pub struct GrainState {
    /// Name of the state type; part of the storage key.
    pub type_name: String,
    pub state: Value,
    /// Tag of the last state read or written, `None` if never persisted.
    pub etag: Option<String>,
}

impl GrainState {
    /// A fresh, never-persisted state.
    pub fn new(type_name: impl Into<String>, state: Value) -> Self {
        Self {
            type_name: type_name.into(),
            state,
            etag: None,
        }
    }

    /// A fresh state built from a typed value.
    pub fn from_typed<T: Serialize>(
        type_name: impl Into<String>,
        state: &T,
    ) -> Result<Self, StorageError> {
        let state =
            serde_json::to_value(state).map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(Self::new(type_name, state))
    }

    /// Decode the current state into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StorageError> {
        serde_json::from_value(self.state.clone())
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Replace the current state with a typed value, keeping the ETag.
    pub fn set<T: Serialize>(&mut self, state: &T) -> Result<(), StorageError> {
        self.state =
            serde_json::to_value(state).map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(())
    }
}

/// Persistence for grain state.
///
/// Implementations are shared between grains; `grain_key` identifies the
/// grain and [`GrainState::type_name`] the kind of state.
#[async_trait]
pub trait GrainStorage: Send + Sync {
    /// Prepare the provider. Must be called before any state operation.
    async fn init(&self) -> Result<(), StorageError>;

    /// Release the provider. Shared connections stay open.
    async fn close(&self) -> Result<(), StorageError>;

    /// Load the stored state into `state`. A missing record leaves `state`
    /// untouched.
    async fn read_state(&self, grain_key: &str, state: &mut GrainState)
    -> Result<(), StorageError>;

    /// Persist `state`, refreshing its ETag.
    async fn write_state(
        &self,
        grain_key: &str,
        state: &mut GrainState,
    ) -> Result<(), StorageError>;

    /// Delete the stored state and reset the ETag.
    async fn clear_state(
        &self,
        grain_key: &str,
        state: &mut GrainState,
    ) -> Result<(), StorageError>;
}
