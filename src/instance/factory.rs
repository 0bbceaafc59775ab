use super::{create_instance, CreationMarker, InstanceHolder, Resolved};
use crate::definition::{BeanDefinition, Parameters};
use crate::error::CreationError;
use crate::scope::Scope;
use std::sync::Arc;

/// Builds a new instance on every resolution and never caches
pub struct FactoryInstanceHolder {
    definition: Arc<BeanDefinition>,
    marker: CreationMarker,
}

impl FactoryInstanceHolder {
    pub fn new(definition: Arc<BeanDefinition>) -> Self {
        Self {
            definition,
            marker: CreationMarker::default(),
        }
    }
}

impl InstanceHolder for FactoryInstanceHolder {
    fn definition(&self) -> &Arc<BeanDefinition> {
        &self.definition
    }

    fn resolve(
        &self,
        scope: &Scope,
        parameters: &dyn Fn() -> Parameters,
    ) -> Result<Resolved, CreationError> {
        let _guard = self.marker.enter(self.definition.key())?;
        let instance = create_instance(&self.definition, scope, parameters)?;
        Ok(Resolved {
            instance,
            created: true,
        })
    }

    fn is_created(&self) -> bool {
        false
    }

    fn release(&self) {}
}
