use super::{InstanceCell, InstanceHolder, Resolved};
use crate::definition::{BeanDefinition, Parameters};
use crate::error::CreationError;
use crate::scope::Scope;
use std::sync::Arc;
use tracing::debug;

/// Caches one instance per owning scope
///
/// The holder itself lives in the scope's holder map, so closing the scope
/// releases it. The root scope never owns scoped instances.
pub struct ScopedInstanceHolder {
    definition: Arc<BeanDefinition>,
    cell: InstanceCell,
}

impl ScopedInstanceHolder {
    pub fn new(definition: Arc<BeanDefinition>) -> Self {
        Self {
            definition,
            cell: InstanceCell::default(),
        }
    }
}

impl InstanceHolder for ScopedInstanceHolder {
    fn definition(&self) -> &Arc<BeanDefinition> {
        &self.definition
    }

    fn resolve(
        &self,
        scope: &Scope,
        parameters: &dyn Fn() -> Parameters,
    ) -> Result<Resolved, CreationError> {
        if scope.is_root() {
            return Err(CreationError::NoActiveScope {
                definition: self.definition.key().clone(),
            });
        }
        self.cell.get_or_create(&self.definition, scope, parameters)
    }

    fn is_created(&self) -> bool {
        self.cell.is_created()
    }

    fn release(&self) {
        if self.cell.release() {
            debug!(definition = %self.definition, "Released scoped instance");
        }
    }
}
