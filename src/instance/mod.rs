//! Instance holders
//!
//! Every definition resolved in a scope gets one [`InstanceHolder`]. The
//! holder owns the lifetime policy of its definition:
//!
//! - [`FactoryInstanceHolder`]: builds a fresh instance on every call
//! - [`SingleInstanceHolder`]: builds once, then serves the cached instance
//! - [`ScopedInstanceHolder`]: like a singleton, but owned by a non-root scope
//!
//! Cached holders serialize creation behind a per-holder lock so concurrent
//! first access runs the factory exactly once. Re-entering a holder from the
//! thread that is already running its factory is reported as a cycle.

mod factory;
mod scoped;
mod single;

pub use factory::FactoryInstanceHolder;
pub use scoped::ScopedInstanceHolder;
pub use single::SingleInstanceHolder;

use crate::definition::{BeanDefinition, DefinitionKey, Instance, Kind, Parameters};
use crate::error::{CreationError, ResolutionError};
use crate::scope::Scope;
use std::cell::RefCell;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use tracing::{debug, error};

thread_local! {
    // Definitions currently being created on this thread, outermost first
    static RESOLUTION_PATH: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Outcome of a holder resolution
#[derive(Clone)]
pub struct Resolved {
    pub instance: Instance,
    /// Whether the factory ran for this call
    pub created: bool,
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

/// Per-definition cache and creation strategy
pub trait InstanceHolder: Send + Sync {
    fn definition(&self) -> &Arc<BeanDefinition>;

    /// Return the cached instance or build one
    ///
    /// `scope` is handed to the factory for nested resolution. `parameters`
    /// is only invoked when the factory actually runs.
    fn resolve(
        &self,
        scope: &Scope,
        parameters: &dyn Fn() -> Parameters,
    ) -> Result<Resolved, CreationError>;

    fn is_created(&self) -> bool;

    /// Drop the cached instance, if any. Idempotent.
    fn release(&self);
}

/// Pick the holder strategy matching the definition's lifetime kind
pub fn holder_for(definition: Arc<BeanDefinition>) -> Arc<dyn InstanceHolder> {
    match definition.kind() {
        Kind::Singleton => Arc::new(SingleInstanceHolder::new(definition)),
        Kind::Factory => Arc::new(FactoryInstanceHolder::new(definition)),
        Kind::Scoped => Arc::new(ScopedInstanceHolder::new(definition)),
    }
}

/// Creation-in-progress marker: the threads currently inside a holder's factory
#[derive(Debug, Default)]
pub(crate) struct CreationMarker {
    threads: Mutex<Vec<ThreadId>>,
}

impl CreationMarker {
    pub(crate) fn enter(&self, key: &DefinitionKey) -> Result<MarkerGuard<'_>, CreationError> {
        let current = thread::current().id();
        let label = key.to_string();
        {
            let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
            if threads.contains(&current) {
                return Err(CreationError::CyclicDependency {
                    chain: cycle_chain(&label),
                });
            }
            threads.push(current);
        }
        RESOLUTION_PATH.with(|path| path.borrow_mut().push(label));
        Ok(MarkerGuard {
            marker: self,
            thread: current,
        })
    }
}

pub(crate) struct MarkerGuard<'a> {
    marker: &'a CreationMarker,
    thread: ThreadId,
}

impl Drop for MarkerGuard<'_> {
    fn drop(&mut self) {
        let mut threads = self
            .marker
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = threads.iter().position(|t| *t == self.thread) {
            threads.swap_remove(pos);
        }
        drop(threads);
        RESOLUTION_PATH.with(|path| {
            path.borrow_mut().pop();
        });
    }
}

fn cycle_chain(label: &str) -> Vec<String> {
    RESOLUTION_PATH.with(|path| {
        let path = path.borrow();
        let start = path.iter().position(|entry| entry == label).unwrap_or(0);
        let mut chain: Vec<String> = path[start..].to_vec();
        chain.push(label.to_string());
        chain
    })
}

/// Run the definition's factory, annotating any failure
///
/// A cycle reported by a nested resolution and propagated through the
/// factory is surfaced as such rather than wrapped as a factory failure.
pub(crate) fn create_instance(
    definition: &BeanDefinition,
    scope: &Scope,
    parameters: &dyn Fn() -> Parameters,
) -> Result<Instance, CreationError> {
    debug!(definition = %definition, scope = %scope.id(), "Creating instance");

    definition
        .create(scope, parameters())
        .map_err(|source| {
            let cycle = source
                .chain()
                .find_map(|cause| cause.downcast_ref::<ResolutionError>())
                .and_then(ResolutionError::cycle);
            if let Some(chain) = cycle {
                return CreationError::CyclicDependency {
                    chain: chain.to_vec(),
                };
            }

            error!(
                definition = %definition,
                scope = %scope.id(),
                error = %format!("{source:#}"),
                "Instance creation failed"
            );
            CreationError::FactoryFailed {
                definition: definition.key().clone(),
                source,
            }
        })
}

/// Single-flight instance cache shared by the caching strategies
#[derive(Default)]
pub(crate) struct InstanceCell {
    value: Mutex<Option<Instance>>,
    marker: CreationMarker,
}

impl InstanceCell {
    pub(crate) fn get_or_create(
        &self,
        definition: &BeanDefinition,
        scope: &Scope,
        parameters: &dyn Fn() -> Parameters,
    ) -> Result<Resolved, CreationError> {
        // The marker is checked before the lock: a re-entrant call from the
        // creating thread would otherwise deadlock on it.
        let _guard = self.marker.enter(definition.key())?;

        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(instance) = value.as_ref() {
            return Ok(Resolved {
                instance: Arc::clone(instance),
                created: false,
            });
        }

        let instance = create_instance(definition, scope, parameters)?;
        *value = Some(Arc::clone(&instance));
        Ok(Resolved {
            instance,
            created: true,
        })
    }

    pub(crate) fn is_created(&self) -> bool {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Returns whether an instance was dropped
    pub(crate) fn release(&self) -> bool {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }
}
