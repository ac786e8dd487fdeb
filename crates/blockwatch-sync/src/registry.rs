//! Provider registry.
//!
//! Built once at startup, then shared read-only with the orchestrator. The
//! registry never removes providers; a provider that should stop receiving
//! blocks reports itself as disabled instead.

use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{BlockId, Provider, SyncError, SyncResult};

#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
    by_name: HashMap<String, usize>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider. Names must be unique.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> SyncResult<()> {
        let name = provider.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(SyncError::Config(format!(
                "Provider {} is already registered",
                name
            )));
        }
        debug!("Registered provider {}", name);
        self.by_name.insert(name, self.providers.len());
        self.providers.push(provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.by_name.get(name).map(|&idx| &self.providers[idx])
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// All providers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter()
    }

    /// Enabled providers in registration order.
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter().filter(|p| p.enabled())
    }

    /// Lowest cursor among enabled providers; the first one wins a tie.
    ///
    /// This is where a watcher has to resume so that no provider misses a
    /// block. `None` when no provider is enabled.
    pub fn min_status(&self) -> Option<BlockId> {
        let mut min: Option<BlockId> = None;
        for provider in self.enabled() {
            let status = provider.status();
            match &min {
                Some(current) if current.height <= status.height => {}
                _ => min = Some(status),
            }
        }
        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingProvider;

    fn build(cursors: &[(&str, i64, bool)]) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for &(name, height, enabled) in cursors {
            let provider = RecordingProvider::new(name, BlockId::at_height(height));
            provider.set_enabled(enabled);
            registry.register(Arc::new(provider)).unwrap();
        }
        registry
    }

    #[test]
    fn test_min_status_over_enabled_providers() {
        let registry = build(&[("a", 10, true), ("b", 15, true), ("c", 7, true)]);
        assert_eq!(registry.min_status().unwrap().height, 7);

        let registry = build(&[("a", 10, true), ("b", 15, true), ("c", 7, false)]);
        assert_eq!(registry.min_status().unwrap().height, 10);
    }

    #[test]
    fn test_min_status_tie_prefers_first_registered() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(Arc::new(RecordingProvider::new(
                "first",
                BlockId::new(5, "A5", Default::default()),
            )))
            .unwrap();
        registry
            .register(Arc::new(RecordingProvider::new(
                "second",
                BlockId::new(5, "B5", Default::default()),
            )))
            .unwrap();
        assert_eq!(registry.min_status().unwrap().hash.as_str(), "A5");
    }

    #[test]
    fn test_min_status_without_enabled_providers() {
        assert!(ProviderRegistry::new().min_status().is_none());
        assert!(build(&[("a", 3, false)]).min_status().is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = build(&[("a", 1, true)]);
        let result = registry.register(Arc::new(RecordingProvider::new("a", BlockId::default())));
        assert!(matches!(result, Err(SyncError::Config(_))));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("a").is_some());
        assert!(registry.get("missing").is_none());
    }
}
