//! Binding scopes to the lifetime of external components
//!
//! The glue between a host framework and the container is small: derive a
//! stable identifier for a component, create a scope for it when it starts,
//! close the scope when it goes away. [`ScopeGuard`] covers the last step
//! with `Drop`.

use crate::container::Container;
use crate::definition::DefinitionSet;
use crate::error::ScopeError;
use crate::scope::{Scope, ScopeId};
use std::any::type_name;
use std::mem::size_of_val;
use std::ops::Deref;

/// `"<type name>@<address>"` for a live component
///
/// Stable for as long as the component stays where it is, unique among
/// components alive at the same time.
///
/// Zero-sized components have no address of their own, so distinct values
/// of a zero-sized type may map to the same id. [`Container::bind_scope`]
/// rejects them; name their scopes explicitly with
/// [`Container::create_scope`] instead.
pub fn scope_id_of<T: ?Sized>(component: &T) -> ScopeId {
    ScopeId::new(format!("{}@{:p}", type_name::<T>(), component))
}

/// Closes its scope when dropped
#[must_use = "the scope is closed as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ScopeGuard {
    scope: Scope,
}

impl ScopeGuard {
    /// Take ownership of closing `scope`
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Close now instead of waiting for the drop
    pub fn close(self) {
        drop(self);
    }
}

impl Deref for ScopeGuard {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        &self.scope
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.scope.close();
    }
}

impl Container {
    /// Create a scope named after `component`, closed when the guard drops
    ///
    /// Fails with [`ScopeError::DuplicateScopeIdentifier`] while another
    /// scope is bound to the same component, and with
    /// [`ScopeError::UnaddressableComponent`] for zero-sized components.
    pub fn bind_scope<T: ?Sized>(
        &self,
        component: &T,
        definitions: DefinitionSet,
    ) -> Result<ScopeGuard, ScopeError> {
        if size_of_val(component) == 0 {
            return Err(ScopeError::UnaddressableComponent(type_name::<T>()));
        }
        let scope = self.create_scope(scope_id_of(component), definitions, None)?;
        Ok(ScopeGuard::new(scope))
    }

    /// The active scope bound to `component`, if any
    pub fn component_scope<T: ?Sized>(&self, component: &T) -> Option<Scope> {
        self.get_scope_or_none(&scope_id_of(component))
    }
}
