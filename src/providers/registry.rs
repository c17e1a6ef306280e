use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::ProviderAdapter;
use crate::errors::ServiceError;

/// Adapters keyed by provider id. Unknown ids fail closed.
#[derive(Default, Clone)]
pub struct ProviderRegistry(HashMap<String, Arc<dyn ProviderAdapter>>);

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.0.keys().collect();
        ids.sort();
        f.debug_tuple("ProviderRegistry").field(&ids).finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` under `provider_id`, replacing any previous entry.
    pub fn register(&mut self, provider_id: impl Into<String>, adapter: Arc<dyn ProviderAdapter>) {
        self.0.insert(provider_id.into(), adapter);
    }

    /// Builder form keyed by the adapter's own id.
    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        let id = adapter.provider_id().to_string();
        self.register(id, adapter);
        self
    }

    pub fn dispatch(&self, provider_id: &str) -> Result<Arc<dyn ProviderAdapter>, ServiceError> {
        self.0
            .get(provider_id)
            .cloned()
            .ok_or_else(|| ServiceError::UnsupportedProvider(provider_id.to_string()))
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.0.contains_key(provider_id)
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.0.keys().cloned().collect();
        ids.sort();
        ids
    }
}
