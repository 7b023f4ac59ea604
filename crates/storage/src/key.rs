use redstream_core::{ClusterId, ProviderName, ServiceId};

use crate::options::PersistenceLifetime;

/// Storage key of one grain: `{provider}:{scope}:{grain_key}`, where the
/// scope is the service id or the cluster id depending on the
/// [`PersistenceLifetime`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(
        provider: &ProviderName,
        lifetime: PersistenceLifetime,
        service_id: &ServiceId,
        cluster_id: &ClusterId,
        grain_key: &str,
    ) -> Self {
        let scope = match lifetime {
            PersistenceLifetime::Service => service_id.as_str(),
            PersistenceLifetime::Cluster => cluster_id.as_str(),
        };
        Self(format!("{provider}:{scope}:{grain_key}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The server-side key under which a state of `type_name` is stored.
pub fn urn(type_name: &str, key: &StorageKey) -> String {
    format!("urn:{}:{key}", type_name.to_lowercase())
}
