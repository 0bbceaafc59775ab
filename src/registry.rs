//! Definition registry
//!
//! Maps a [`DefinitionKey`] to the [`BeanDefinition`] that builds it. Filled
//! while the container is being configured and read concurrently afterwards.

use crate::definition::{BeanDefinition, DefinitionKey};
use crate::error::DefinitionError;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct Registry {
    definitions: RwLock<HashMap<DefinitionKey, Arc<BeanDefinition>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a batch of definitions, honouring each
    /// definition's own override flag
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = BeanDefinition>,
    ) -> Result<Self, DefinitionError> {
        let registry = Self::new();
        for definition in definitions {
            let allow_override = definition.overrides();
            registry.register(definition, allow_override)?;
        }
        Ok(registry)
    }

    /// Register a definition
    ///
    /// Fails with [`DefinitionError::DuplicateDefinition`] when the key is
    /// taken and `allow_override` is false; replaces it otherwise.
    pub fn register(
        &self,
        definition: BeanDefinition,
        allow_override: bool,
    ) -> Result<Arc<BeanDefinition>, DefinitionError> {
        let key = definition.key().clone();
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if definitions.contains_key(&key) {
            if !allow_override {
                return Err(DefinitionError::DuplicateDefinition { key });
            }
            warn!(key = %key, "Overriding existing definition");
        }

        debug!(key = %key, kind = %definition.kind(), "Registered definition");
        let definition = Arc::new(definition);
        definitions.insert(key, Arc::clone(&definition));
        Ok(definition)
    }

    /// The definition registered under `key`
    pub fn find(&self, key: &DefinitionKey) -> Option<Arc<BeanDefinition>> {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &DefinitionKey) -> bool {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Unregister `key`, returning the removed definition
    pub fn remove(&self, key: &DefinitionKey) -> Option<Arc<BeanDefinition>> {
        let removed = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if removed.is_some() {
            debug!(key = %key, "Removed definition");
        }
        removed
    }

    /// Snapshot of every registered definition
    pub fn all(&self) -> Vec<Arc<BeanDefinition>> {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of registered definitions
    pub fn len(&self) -> usize {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
