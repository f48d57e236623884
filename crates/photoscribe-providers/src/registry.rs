//! Provider registry — an explicit value handed to the engine.

use std::sync::Arc;

use crate::types::VisionProvider;

/// Collection of configured vision providers, keyed by id.
///
/// Constructed once from configuration and passed into the engine, so
/// concurrent jobs with different provider sets can coexist.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn VisionProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. A later registration with the same id replaces
    /// the earlier one.
    pub fn register(&mut self, provider: Arc<dyn VisionProvider>) {
        self.providers.retain(|p| p.id() != provider.id());
        self.providers.push(provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn VisionProvider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    /// Providers passing their cheap availability check.
    pub fn available(&self) -> Vec<Arc<dyn VisionProvider>> {
        self.providers
            .iter()
            .filter(|p| p.is_available())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn VisionProvider>> {
        self.providers.iter()
    }
}
