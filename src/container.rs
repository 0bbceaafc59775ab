//! The container
//!
//! A [`Container`] owns the global registry, the root scope and the map of
//! active scopes. It is an ordinary value: construct as many as you need,
//! pass the handle to whoever resolves through it, and [`close`](Container::close)
//! it (or drop it) to tear everything down.
//!
//! # Example
//!
//! ```rust
//! use scopewire::{BeanDefinition, Container, DefinitionSet, ScopeId};
//!
//! struct Cart {
//!     items: Vec<String>,
//! }
//!
//! let container = Container::default();
//! let scope = container
//!     .create_scope(
//!         "checkout",
//!         DefinitionSet::new().with(BeanDefinition::scoped(None, |_, _| {
//!             Ok(Cart { items: Vec::new() })
//!         })),
//!         None,
//!     )
//!     .unwrap();
//!
//! let cart = scope.get::<Cart>().unwrap();
//! assert!(cart.items.is_empty());
//!
//! container.close_scope(&ScopeId::new("checkout")).unwrap();
//! assert!(scope.get::<Cart>().is_err());
//! ```

use crate::config::ContainerConfig;
use crate::definition::{
    BeanDefinition, DefinitionKey, DefinitionSet, Instance, Kind, Parameters, Qualifier, TypeKey,
};
use crate::error::{DefinitionError, ResolutionError, Result, ScopeError};
use crate::registry::Registry;
use crate::scope::{Scope, ScopeId, ScopeSource};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, instrument, warn};

pub(crate) struct ContainerInner {
    config: ContainerConfig,
    registry: Arc<Registry>,
    root: Scope,
    scopes: RwLock<HashMap<ScopeId, Scope>>,
    closed: AtomicBool,
}

impl ContainerInner {
    #[instrument(skip_all, fields(id = %id, parent = %parent.id()))]
    pub(crate) fn create_scope(
        self: &Arc<Self>,
        parent: &Scope,
        id: ScopeId,
        definitions: DefinitionSet,
        source: Option<ScopeSource>,
    ) -> std::result::Result<Scope, ScopeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScopeError::ContainerClosed);
        }
        if id.is_root() {
            return Err(ScopeError::DuplicateScopeIdentifier(id));
        }
        let registry = Registry::from_definitions(definitions)?;

        // Closing the container or the parent is ordered against this lock
        let mut scopes = self.scopes.write().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScopeError::ContainerClosed);
        }
        if parent.is_closed() {
            return Err(ScopeError::ParentClosed(parent.id().clone()));
        }
        if scopes.contains_key(&id) {
            return Err(ScopeError::DuplicateScopeIdentifier(id));
        }
        let scope = Scope::new(
            id.clone(),
            Arc::new(registry),
            Some(parent),
            source,
            Arc::downgrade(self),
        );
        scopes.insert(id, scope.clone());
        info!(scope = %scope.id(), "Created scope");
        Ok(scope)
    }

    /// Close every active scope, then the root scope. Idempotent.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let scopes: Vec<Scope> = self
            .scopes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, scope)| scope)
            .collect();
        if !scopes.is_empty() {
            warn!(count = scopes.len(), "Closing container with active scopes");
        }
        for scope in &scopes {
            scope.close();
        }
        self.root.shutdown();
        info!("Container closed");
    }

    /// Drop `scope` from the active map, unless the id now names another scope
    pub(crate) fn deregister(&self, scope: &Scope) {
        let mut scopes = self.scopes.write().unwrap_or_else(PoisonError::into_inner);
        if scopes
            .get(scope.id())
            .is_some_and(|active| Scope::ptr_eq(active, scope))
        {
            scopes.remove(scope.id());
            debug!(scope = %scope.id(), "Deregistered scope");
        }
    }
}

/// Dependency injection container
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Create an empty container with its root scope
    pub fn new(config: ContainerConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let inner = Arc::new_cyclic(|weak| ContainerInner {
            config,
            registry: Arc::clone(&registry),
            root: Scope::new(ScopeId::root(), Arc::clone(&registry), None, None, weak.clone()),
            scopes: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        debug!("Container created");
        Self { inner }
    }

    /// The configuration this container was created with
    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    /// The root scope, alive as long as the container
    pub fn root_scope(&self) -> &Scope {
        &self.inner.root
    }

    /// Register one definition in the root registry
    ///
    /// Replaces an existing definition only when the definition or the
    /// container configuration allows overrides.
    pub fn register(&self, definition: BeanDefinition) -> std::result::Result<(), DefinitionError> {
        let allow_override = definition.overrides() || self.inner.config.allow_override;
        self.inner.registry.register(definition, allow_override)?;
        Ok(())
    }

    /// Register a batch of definitions
    ///
    /// Eager singletons of the batch are created right away when
    /// `create_eager_instances` is enabled.
    #[instrument(skip_all, fields(definitions = definitions.len()))]
    pub fn load(&self, definitions: DefinitionSet) -> Result<()> {
        let mut eager = Vec::new();
        for definition in definitions {
            if definition.is_created_at_start() && definition.kind() == Kind::Singleton {
                eager.push(definition.key().clone());
            }
            self.register(definition)?;
        }

        if self.inner.config.create_eager_instances {
            for key in &eager {
                self.inner.root.resolve_key(key, &Parameters::new)?;
            }
        }
        info!(eager = eager.len(), total = self.inner.registry.len(), "Loaded definitions");
        Ok(())
    }

    /// Create every root singleton flagged `created_at_start`
    pub fn create_eager_instances(&self) -> std::result::Result<usize, ResolutionError> {
        let eager: Vec<_> = self
            .inner
            .registry
            .all()
            .into_iter()
            .filter(|d| d.is_created_at_start() && d.kind() == Kind::Singleton)
            .collect();
        for definition in &eager {
            self.inner
                .root
                .resolve_key(definition.key(), &Parameters::new)?;
        }
        debug!(count = eager.len(), "Created eager instances");
        Ok(eager.len())
    }

    /// Every definition of the root registry
    pub fn all(&self) -> Vec<Arc<BeanDefinition>> {
        self.inner.registry.all()
    }

    /// Remove definitions from the root registry and release their instances
    pub fn unload(&self, keys: &[DefinitionKey]) -> usize {
        let scopes: Vec<Scope> = self
            .inner
            .scopes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut removed = 0;
        for key in keys {
            let Some(definition) = self.inner.registry.remove(key) else {
                continue;
            };
            self.inner.root.release_definition(&definition);
            for scope in &scopes {
                scope.release_definition(&definition);
            }
            removed += 1;
        }
        info!(removed, "Unloaded definitions");
        removed
    }

    /// Create a child of the root scope
    pub fn create_scope(
        &self,
        id: impl Into<ScopeId>,
        definitions: DefinitionSet,
        source: Option<ScopeSource>,
    ) -> std::result::Result<Scope, ScopeError> {
        self.inner
            .create_scope(&self.inner.root, id.into(), definitions, source)
    }

    /// The active scope named `id`, or create it under the root scope
    pub fn get_or_create_scope(
        &self,
        id: impl Into<ScopeId>,
        definitions: DefinitionSet,
        source: Option<ScopeSource>,
    ) -> std::result::Result<Scope, ScopeError> {
        let id = id.into();
        if let Some(scope) = self.get_scope_or_none(&id) {
            return Ok(scope);
        }
        match self.create_scope(id.clone(), definitions, source) {
            Err(ScopeError::DuplicateScopeIdentifier(_)) => self
                .get_scope_or_none(&id)
                .ok_or(ScopeError::ScopeNotFound(id)),
            other => other,
        }
    }

    /// Look up an active scope by id
    ///
    /// The root id always resolves to the root scope.
    pub fn get_scope_or_none(&self, id: &ScopeId) -> Option<Scope> {
        if id.is_root() {
            return Some(self.inner.root.clone());
        }
        self.inner
            .scopes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Identifiers of every active scope except the root
    pub fn active_scopes(&self) -> Vec<ScopeId> {
        let mut ids: Vec<_> = self
            .inner
            .scopes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Close an active scope and remove it from the container
    pub fn close_scope(&self, id: &ScopeId) -> std::result::Result<(), ScopeError> {
        if id.is_root() {
            return Err(ScopeError::RootScope);
        }
        let scope = self
            .get_scope_or_none(id)
            .ok_or_else(|| ScopeError::ScopeNotFound(id.clone()))?;
        scope.close();
        Ok(())
    }

    /// Resolve through the root scope
    pub fn resolve_root(
        &self,
        type_key: TypeKey,
        qualifier: Option<&Qualifier>,
    ) -> std::result::Result<Instance, ResolutionError> {
        self.inner.root.resolve(type_key, qualifier, &Parameters::new)
    }

    /// Resolve an unqualified `T` through the root scope
    ///
    /// # Type Parameters
    /// * `T` - The requested type, as declared by its definition
    ///
    /// # Example
    /// ```rust
    /// use scopewire::{BeanDefinition, Container};
    ///
    /// struct Clock;
    ///
    /// let container = Container::default();
    /// container
    ///     .register(BeanDefinition::singleton(None, |_, _| Ok(Clock)))
    ///     .unwrap();
    /// let clock = container.get::<Clock>().unwrap();
    /// assert!(std::sync::Arc::ptr_eq(&clock, &container.get::<Clock>().unwrap()));
    /// ```
    pub fn get<T: Any + Send + Sync>(&self) -> std::result::Result<Arc<T>, ResolutionError> {
        self.inner.root.get::<T>()
    }

    /// Resolve the `T` registered under `qualifier` through the root scope
    pub fn get_qualified<T: Any + Send + Sync>(
        &self,
        qualifier: &Qualifier,
    ) -> std::result::Result<Arc<T>, ResolutionError> {
        self.inner.root.get_qualified::<T>(qualifier)
    }

    /// Resolve through the root scope with factory parameters
    ///
    /// # Arguments
    /// * `qualifier` - Optional qualifier of the definition
    /// * `parameters` - Called only if the factory has to run
    pub fn get_with<T, P>(
        &self,
        qualifier: Option<&Qualifier>,
        parameters: P,
    ) -> std::result::Result<Arc<T>, ResolutionError>
    where
        T: Any + Send + Sync,
        P: Fn() -> Parameters,
    {
        self.inner.root.get_with::<T, P>(qualifier, parameters)
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close every active scope, then the root scope. Idempotent.
    ///
    /// Closing the root scope directly ends up here as well.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new(ContainerConfig::default())
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("definitions", &self.inner.registry.len())
            .field("scopes", &self.active_scopes())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CreationError, Error};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    struct Database {
        id: usize,
    }

    fn counting_singleton(counter: &Arc<AtomicUsize>) -> BeanDefinition {
        let calls = Arc::clone(counter);
        BeanDefinition::singleton(None, move |_, _| {
            Ok(Database {
                id: calls.fetch_add(1, Ordering::SeqCst),
            })
        })
    }

    #[test]
    fn test_register_duplicate_and_override() {
        let container = Container::default();
        let counter = Arc::new(AtomicUsize::new(0));
        container.register(counting_singleton(&counter)).unwrap();

        let err = container.register(counting_singleton(&counter)).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateDefinition { .. }));

        container
            .register(counting_singleton(&counter).allow_override(true))
            .unwrap();
        assert_eq!(container.all().len(), 1);
    }

    #[test]
    fn test_config_allows_override() {
        let config = ContainerConfig {
            allow_override: true,
            ..ContainerConfig::default()
        };
        let container = Container::new(config);
        let counter = Arc::new(AtomicUsize::new(0));
        container.register(counting_singleton(&counter)).unwrap();
        container.register(counting_singleton(&counter)).unwrap();
    }

    #[test]
    fn test_override_replaces_cached_instance() {
        let container = Container::default();
        container
            .register(BeanDefinition::singleton(None, |_, _| Ok(Database { id: 1 })))
            .unwrap();
        assert_eq!(container.get::<Database>().unwrap().id, 1);

        container
            .register(
                BeanDefinition::singleton(None, |_, _| Ok(Database { id: 2 })).allow_override(true),
            )
            .unwrap();
        assert_eq!(container.get::<Database>().unwrap().id, 2);
    }

    #[test]
    fn test_eager_instances_created_on_load() {
        let container = Container::default();
        let counter = Arc::new(AtomicUsize::new(0));
        container
            .load(DefinitionSet::new().with(counting_singleton(&counter).created_at_start(true)))
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        container.get::<Database>().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_eager_creation_can_be_deferred() {
        let config = ContainerConfig {
            create_eager_instances: false,
            ..ContainerConfig::default()
        };
        let container = Container::new(config);
        let counter = Arc::new(AtomicUsize::new(0));
        container
            .load(DefinitionSet::new().with(counting_singleton(&counter).created_at_start(true)))
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert_eq!(container.create_eager_instances().unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_eager_failure_fails_load() {
        let container = Container::default();
        let err = container
            .load(DefinitionSet::new().with(
                BeanDefinition::singleton(None, |_, _| -> anyhow::Result<Database> {
                    anyhow::bail!("no connection")
                })
                .created_at_start(true),
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution(ResolutionError::CreationFailed(CreationError::FactoryFailed { .. }))
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unload_releases_instances() {
        let container = Container::default();
        let counter = Arc::new(AtomicUsize::new(0));
        container.register(counting_singleton(&counter)).unwrap();
        let db = container.get::<Database>().unwrap();
        assert_eq!(Arc::strong_count(&db), 2);

        let removed = container.unload(&[DefinitionKey::of::<Database>(None)]);
        assert_eq!(removed, 1);
        assert_eq!(Arc::strong_count(&db), 1);
        assert!(matches!(
            container.get::<Database>(),
            Err(ResolutionError::NoDefinitionFound { .. })
        ));
        assert_eq!(container.unload(&[DefinitionKey::of::<Database>(None)]), 0);
    }

    #[test]
    fn test_duplicate_scope_identifier() {
        let container = Container::default();
        container
            .create_scope("main", DefinitionSet::new(), None)
            .unwrap();

        let err = container
            .create_scope("main", DefinitionSet::new(), None)
            .unwrap_err();
        assert_eq!(err, ScopeError::DuplicateScopeIdentifier(ScopeId::new("main")));

        let err = container
            .create_scope(ScopeId::root(), DefinitionSet::new(), None)
            .unwrap_err();
        assert_eq!(err, ScopeError::DuplicateScopeIdentifier(ScopeId::root()));
    }

    #[test]
    fn test_concurrent_same_identifier_one_wins() {
        let container = Container::default();
        let barrier = Barrier::new(2);

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        container.create_scope("shared", DefinitionSet::new(), None)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(ScopeError::DuplicateScopeIdentifier(id)) if id.as_str() == "shared"
        )));
    }

    #[test]
    fn test_close_scope_and_not_found() {
        let container = Container::default();
        let scope = container
            .create_scope("screen", DefinitionSet::new(), None)
            .unwrap();
        assert_eq!(container.active_scopes(), vec![ScopeId::new("screen")]);

        container.close_scope(&ScopeId::new("screen")).unwrap();
        assert!(scope.is_closed());
        assert!(container.active_scopes().is_empty());
        assert_eq!(
            container.close_scope(&ScopeId::new("screen")),
            Err(ScopeError::ScopeNotFound(ScopeId::new("screen")))
        );
        assert_eq!(container.close_scope(&ScopeId::root()), Err(ScopeError::RootScope));

        // identifier is free again once closed
        container
            .create_scope("screen", DefinitionSet::new(), None)
            .unwrap();
    }

    #[test]
    fn test_get_or_create_scope_reuses_active_scope() {
        let container = Container::default();
        let first = container
            .get_or_create_scope("activity", DefinitionSet::new(), None)
            .unwrap();
        let second = container
            .get_or_create_scope("activity", DefinitionSet::new(), None)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            container.get_scope_or_none(&ScopeId::root()).unwrap(),
            *container.root_scope()
        );
    }

    #[test]
    fn test_resolve_root_untyped() {
        let container = Container::default();
        let counter = Arc::new(AtomicUsize::new(0));
        container.register(counting_singleton(&counter)).unwrap();

        let instance = container
            .resolve_root(TypeKey::of::<Database>(), None)
            .unwrap();
        assert_eq!(instance.downcast_ref::<Database>().unwrap().id, 0);
    }

    #[test]
    fn test_close_container() {
        let container = Container::default();
        let counter = Arc::new(AtomicUsize::new(0));
        container.register(counting_singleton(&counter)).unwrap();
        container.get::<Database>().unwrap();
        let scope = container
            .create_scope("left-open", DefinitionSet::new(), None)
            .unwrap();

        container.close();
        container.close();

        assert!(container.is_closed());
        assert!(scope.is_closed());
        assert!(container.root_scope().is_closed());
        assert!(matches!(
            container.get::<Database>(),
            Err(ResolutionError::ScopeClosed { .. })
        ));
        assert_eq!(
            container.create_scope("late", DefinitionSet::new(), None),
            Err(ScopeError::ContainerClosed)
        );
    }

    #[test]
    fn test_closing_root_scope_closes_container() {
        let container = Container::default();
        let scope = container
            .create_scope("screen", DefinitionSet::new(), None)
            .unwrap();

        container.root_scope().close();

        assert!(container.is_closed());
        assert!(container.root_scope().is_closed());
        assert!(scope.is_closed());
        assert!(container.active_scopes().is_empty());
        assert_eq!(
            container.create_scope("late", DefinitionSet::new(), None),
            Err(ScopeError::ContainerClosed)
        );
    }

    #[test]
    fn test_closed_parent_checked_at_registration() {
        let container = Container::default();
        let parent = container
            .create_scope("parent", DefinitionSet::new(), None)
            .unwrap();
        parent.close();

        let err = container
            .inner
            .create_scope(&parent, ScopeId::new("child"), DefinitionSet::new(), None)
            .unwrap_err();
        assert_eq!(err, ScopeError::ParentClosed(ScopeId::new("parent")));
        assert!(container.active_scopes().is_empty());
    }

    #[test]
    fn test_scopes_created_while_closing_are_closed() {
        for _ in 0..20 {
            let container = Container::default();
            let barrier = Barrier::new(5);

            let created: Vec<Scope> = thread::scope(|s| {
                let creators: Vec<_> = (0..4)
                    .map(|i| {
                        let container = &container;
                        let barrier = &barrier;
                        s.spawn(move || {
                            barrier.wait();
                            (0..10)
                                .filter_map(|n| {
                                    container
                                        .create_scope(format!("t{i}-{n}"), DefinitionSet::new(), None)
                                        .ok()
                                })
                                .collect::<Vec<_>>()
                        })
                    })
                    .collect();
                barrier.wait();
                container.close();
                creators
                    .into_iter()
                    .flat_map(|h| h.join().unwrap())
                    .collect()
            });

            assert!(created.iter().all(Scope::is_closed));
            assert!(container.active_scopes().is_empty());
        }
    }
}
