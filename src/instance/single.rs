use super::{InstanceCell, InstanceHolder, Resolved};
use crate::definition::{BeanDefinition, Parameters};
use crate::error::CreationError;
use crate::scope::Scope;
use std::sync::Arc;
use tracing::debug;

/// Builds the instance once and shares it until released
pub struct SingleInstanceHolder {
    definition: Arc<BeanDefinition>,
    cell: InstanceCell,
}

impl SingleInstanceHolder {
    /// Holder with nothing cached yet
    pub fn new(definition: Arc<BeanDefinition>) -> Self {
        Self {
            definition,
            cell: InstanceCell::default(),
        }
    }
}

impl InstanceHolder for SingleInstanceHolder {
    fn definition(&self) -> &Arc<BeanDefinition> {
        &self.definition
    }

    fn resolve(
        &self,
        scope: &Scope,
        parameters: &dyn Fn() -> Parameters,
    ) -> Result<Resolved, CreationError> {
        self.cell.get_or_create(&self.definition, scope, parameters)
    }

    fn is_created(&self) -> bool {
        self.cell.is_created()
    }

    fn release(&self) {
        if self.cell.release() {
            debug!(definition = %self.definition, "Released singleton instance");
        }
    }
}
