//! Scopes
//!
//! A [`Scope`] is a bounded resolution context. It owns the instance holders
//! of the definitions resolved through it, looks definitions up in its own
//! registry first and then along its parent chain up to the root scope, and
//! moves one way from open to closed. Closing releases every holder the scope
//! owns; ancestors and children are left alone.
//!
//! Definitions are resolved with the scope that should see their
//! dependencies:
//!
//! - singletons: the scope whose registry declares them
//! - scoped: the scope caching the instance (the requesting scope when the
//!   definition lives in the root registry)
//! - factories: the scope the request started from

use crate::container::ContainerInner;
use crate::definition::{
    BeanDefinition, DefinitionKey, DefinitionSet, Instance, Kind, Parameters, Qualifier, TypeKey,
};
use crate::error::{ResolutionError, ScopeError};
use crate::instance::{holder_for, InstanceHolder};
use crate::registry::Registry;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, info, instrument};

/// Identifier of the scope created with every container
pub const ROOT_SCOPE_ID: &str = "_root_";

/// Opaque token tying a scope to the external object it was created for
pub type ScopeSource = Arc<dyn Any + Send + Sync>;

/// Unique (while active) name of a scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved id of the root scope
    pub fn root() -> Self {
        Self(ROOT_SCOPE_ID.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_SCOPE_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ScopeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

struct Parent {
    id: ScopeId,
    scope: Weak<ScopeInner>,
}

pub(crate) struct ScopeInner {
    id: ScopeId,
    root: bool,
    registry: Arc<Registry>,
    parent: Option<Parent>,
    holders: RwLock<HashMap<DefinitionKey, Arc<dyn InstanceHolder>>>,
    closed: AtomicBool,
    source: Option<ScopeSource>,
    container: Weak<ContainerInner>,
}

/// Handle to a resolution scope; clones share the same scope
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub(crate) fn new(
        id: ScopeId,
        registry: Arc<Registry>,
        parent: Option<&Self>,
        source: Option<ScopeSource>,
        container: Weak<ContainerInner>,
    ) -> Self {
        let root = parent.is_none();
        Self {
            inner: Arc::new(ScopeInner {
                id,
                root,
                registry,
                parent: parent.map(|p| Parent {
                    id: p.inner.id.clone(),
                    scope: Arc::downgrade(&p.inner),
                }),
                holders: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
                source,
                container,
            }),
        }
    }

    pub fn id(&self) -> &ScopeId {
        &self.inner.id
    }

    pub fn is_root(&self) -> bool {
        self.inner.root
    }

    /// Whether [`close`](Self::close) has run; a closed scope resolves nothing
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// The definitions declared by this scope itself
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// The bound source token, if it is a `T`
    pub fn source<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner
            .source
            .as_ref()
            .and_then(|source| Arc::clone(source).downcast::<T>().ok())
    }

    /// The parent scope, `Ok(None)` for the root
    ///
    /// A parent that has already been dropped reports [`ResolutionError::ScopeClosed`].
    pub fn parent(&self) -> Result<Option<Self>, ResolutionError> {
        match &self.inner.parent {
            None => Ok(None),
            Some(parent) => parent
                .scope
                .upgrade()
                .map(|inner| Some(Self { inner }))
                .ok_or_else(|| ResolutionError::ScopeClosed {
                    scope: parent.id.clone(),
                }),
        }
    }

    /// Number of holders of this scope currently caching an instance
    pub fn created_instances(&self) -> usize {
        self.inner
            .holders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|holder| holder.is_created())
            .count()
    }

    /// Resolve a type through this scope and its parent chain
    pub fn resolve(
        &self,
        type_key: TypeKey,
        qualifier: Option<&Qualifier>,
        parameters: &dyn Fn() -> Parameters,
    ) -> Result<Instance, ResolutionError> {
        let key = DefinitionKey::new(type_key, qualifier.cloned());
        self.resolve_key(&key, parameters)
    }

    /// Resolve an unqualified `T` through this scope and its parents
    ///
    /// # Returns
    /// The shared or freshly built instance, depending on the definition's [`Kind`]
    pub fn get<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ResolutionError> {
        self.get_with::<T, _>(None, Parameters::new)
    }

    /// Resolve the `T` registered under `qualifier`
    pub fn get_qualified<T: Any + Send + Sync>(
        &self,
        qualifier: &Qualifier,
    ) -> Result<Arc<T>, ResolutionError> {
        self.get_with::<T, _>(Some(qualifier), Parameters::new)
    }

    /// Resolve a `T`, handing `parameters` to its factory if one has to run
    pub fn get_with<T, P>(
        &self,
        qualifier: Option<&Qualifier>,
        parameters: P,
    ) -> Result<Arc<T>, ResolutionError>
    where
        T: Any + Send + Sync,
        P: Fn() -> Parameters,
    {
        let key = DefinitionKey::of::<T>(qualifier.cloned());
        let instance = self.resolve_key(&key, &parameters)?;
        downcast(instance, key)
    }

    #[instrument(level = "debug", skip_all, fields(scope = %self.inner.id, key = %key))]
    pub(crate) fn resolve_key(
        &self,
        key: &DefinitionKey,
        parameters: &dyn Fn() -> Parameters,
    ) -> Result<Instance, ResolutionError> {
        let mut current = self.clone();
        loop {
            if current.is_closed() {
                return Err(ResolutionError::ScopeClosed {
                    scope: current.inner.id.clone(),
                });
            }

            if let Some(definition) = current.inner.registry.find(key) {
                let kind = definition.kind();
                let owner = match kind {
                    Kind::Scoped if current.is_root() => self,
                    _ => &current,
                };
                let holder = owner.holder_for(definition)?;
                let factory_scope = match kind {
                    Kind::Factory => self,
                    Kind::Singleton | Kind::Scoped => owner,
                };
                let resolved = holder.resolve(factory_scope, parameters)?;
                debug!(
                    owner = %owner.inner.id,
                    created = resolved.created,
                    "Resolved {}",
                    key
                );
                return Ok(resolved.instance);
            }

            match current.parent()? {
                Some(parent) => current = parent,
                None => {
                    return Err(ResolutionError::NoDefinitionFound { key: key.clone() });
                }
            }
        }
    }

    /// The holder this scope owns for `definition`
    ///
    /// A holder built for a definition that has since been overridden is
    /// released and replaced.
    fn holder_for(
        &self,
        definition: Arc<BeanDefinition>,
    ) -> Result<Arc<dyn InstanceHolder>, ResolutionError> {
        let key = definition.key();
        {
            let holders = self
                .inner
                .holders
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(holder) = holders.get(key) {
                if Arc::ptr_eq(holder.definition(), &definition) {
                    return Ok(Arc::clone(holder));
                }
            }
        }

        let mut holders = self
            .inner
            .holders
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return Err(ResolutionError::ScopeClosed {
                scope: self.inner.id.clone(),
            });
        }
        if let Some(existing) = holders.get(key) {
            if Arc::ptr_eq(existing.definition(), &definition) {
                return Ok(Arc::clone(existing));
            }
            debug!(scope = %self.inner.id, key = %key, "Replacing holder of overridden definition");
            existing.release();
        }
        let holder = holder_for(Arc::clone(&definition));
        holders.insert(key.clone(), Arc::clone(&holder));
        Ok(holder)
    }

    /// Release the holder built for exactly this definition, if any
    pub(crate) fn release_definition(&self, definition: &Arc<BeanDefinition>) -> bool {
        let mut holders = self
            .inner
            .holders
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let owned = holders
            .get(definition.key())
            .is_some_and(|holder| Arc::ptr_eq(holder.definition(), definition));
        if owned {
            if let Some(holder) = holders.remove(definition.key()) {
                holder.release();
            }
        }
        owned
    }

    /// Create a child scope with no definitions of its own
    pub fn create_child_scope(
        &self,
        id: impl Into<ScopeId>,
        source: Option<ScopeSource>,
    ) -> Result<Self, ScopeError> {
        self.create_child_scope_with(id, DefinitionSet::new(), source)
    }

    /// Create a child scope declaring `definitions`
    pub fn create_child_scope_with(
        &self,
        id: impl Into<ScopeId>,
        definitions: DefinitionSet,
        source: Option<ScopeSource>,
    ) -> Result<Self, ScopeError> {
        if self.is_closed() {
            return Err(ScopeError::ParentClosed(self.inner.id.clone()));
        }
        let container = self
            .inner
            .container
            .upgrade()
            .ok_or(ScopeError::ContainerClosed)?;
        container.create_scope(self, id.into(), definitions, source)
    }

    /// Close the scope and release every instance it holds. Idempotent.
    ///
    /// The root scope only closes together with its container: closing it
    /// closes the whole container.
    pub fn close(&self) {
        if self.is_root() {
            if let Some(container) = self.inner.container.upgrade() {
                container.close();
                return;
            }
        }
        self.shutdown();
    }

    pub(crate) fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let holders: Vec<_> = self
            .inner
            .holders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, holder)| holder)
            .collect();
        for holder in &holders {
            holder.release();
        }
        info!(scope = %self.inner.id, released = holders.len(), "Closed scope");

        if !self.is_root() {
            if let Some(container) = self.inner.container.upgrade() {
                container.deregister(self);
            }
        }
    }

    /// Whether both handles point to the same scope
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

pub(crate) fn downcast<T: Any + Send + Sync>(
    instance: Instance,
    key: DefinitionKey,
) -> Result<Arc<T>, ResolutionError> {
    instance
        .downcast::<T>()
        .map_err(|_| ResolutionError::TypeMismatch {
            key,
            expected: type_name::<T>(),
        })
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl Eq for Scope {}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("root", &self.inner.root)
            .field("closed", &self.is_closed())
            .field("parent", &self.inner.parent.as_ref().map(|p| &p.id))
            .field("definitions", &self.inner.registry.len())
            .finish()
    }
}
