//! Bean definitions
//!
//! A [`BeanDefinition`] is the immutable recipe for one type: its identity,
//! optional [`Qualifier`], lifetime [`Kind`] and the factory closure that
//! builds it. The container never constructs anything by itself, it only
//! stores and invokes these closures.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use scopewire::{BeanDefinition, Container, DefinitionSet, Qualifier};
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct Repository {
//!     db: Arc<Database>,
//! }
//!
//! let container = Container::default();
//! container
//!     .load(
//!         DefinitionSet::new()
//!             .with(BeanDefinition::singleton(None, |_, _| {
//!                 Ok(Database { url: "sqlite::memory:".into() })
//!             }))
//!             .with(BeanDefinition::factory(Some(Qualifier::named("users")), |scope, _| {
//!                 Ok(Repository { db: scope.get::<Database>()? })
//!             })),
//!     )
//!     .unwrap();
//!
//! let repo = container
//!     .get_qualified::<Repository>(&Qualifier::named("users"))
//!     .unwrap();
//! assert_eq!(repo.db.url, "sqlite::memory:");
//! ```

use crate::error::ParameterError;
use crate::scope::Scope;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A type-erased instance as stored by holders
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Type-erased factory closure
pub type FactoryFn = Arc<dyn Fn(&Scope, Parameters) -> anyhow::Result<Instance> + Send + Sync>;

/// Identity of a requested type
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key of the type `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub const fn id(&self) -> TypeId {
        self.id
    }

    /// Type name, for logs and error messages
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Secondary key separating several definitions of the same type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Qualifier {
    Named(String),
    Type(TypeKey),
}

impl Qualifier {
    /// Qualify by name
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Qualify by a marker type
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Type(TypeKey::of::<T>())
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::Type(key) => write!(f, "{key}"),
        }
    }
}

/// Registry key: type identity plus optional qualifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DefinitionKey {
    pub type_key: TypeKey,
    pub qualifier: Option<Qualifier>,
}

impl DefinitionKey {
    pub const fn new(type_key: TypeKey, qualifier: Option<Qualifier>) -> Self {
        Self {
            type_key,
            qualifier,
        }
    }

    /// Key of `T` with an optional qualifier
    pub fn of<T: ?Sized + 'static>(qualifier: Option<Qualifier>) -> Self {
        Self::new(TypeKey::of::<T>(), qualifier)
    }
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(qualifier) => write!(f, "{}[{}]", self.type_key, qualifier),
            None => write!(f, "{}", self.type_key),
        }
    }
}

/// Lifetime policy of a definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// One instance for the lifetime of the owning registry
    Singleton,
    /// A new instance on every resolution
    Factory,
    /// One instance per scope, released when the scope closes
    Scoped,
}

impl Kind {
    /// Whether holders of this kind keep the instance after creating it
    pub const fn is_cached(self) -> bool {
        matches!(self, Self::Singleton | Self::Scoped)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Singleton => write!(f, "Singleton"),
            Self::Factory => write!(f, "Factory"),
            Self::Scoped => write!(f, "Scoped"),
        }
    }
}

/// Constructor-time parameters handed to a factory
#[derive(Clone, Default)]
pub struct Parameters {
    values: Vec<Instance>,
}

impl Parameters {
    /// Empty parameter list
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.values.push(Arc::new(value));
        self
    }

    /// Append a parameter
    pub fn push<T: Any + Send + Sync>(&mut self, value: T) {
        self.values.push(Arc::new(value));
    }

    /// Typed access to the parameter at `index`
    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> Result<&T, ParameterError> {
        let value = self.values.get(index).ok_or(ParameterError::Missing {
            index,
            len: self.values.len(),
        })?;
        value
            .downcast_ref::<T>()
            .ok_or(ParameterError::TypeMismatch {
                index,
                expected: type_name::<T>(),
            })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameters")
            .field("len", &self.values.len())
            .finish()
    }
}

/// Immutable recipe for building one type
#[derive(Clone)]
pub struct BeanDefinition {
    key: DefinitionKey,
    kind: Kind,
    factory: FactoryFn,
    allow_override: bool,
    created_at_start: bool,
}

impl BeanDefinition {
    /// Build a definition from an already type-erased factory
    pub fn new(key: DefinitionKey, kind: Kind, factory: FactoryFn) -> Self {
        Self {
            key,
            kind,
            factory,
            allow_override: false,
            created_at_start: false,
        }
    }

    /// A definition built once and shared by every resolution
    ///
    /// # Arguments
    /// * `qualifier` - Distinguishes several definitions of `T`
    /// * `factory` - Builds the instance; receives the declaring scope and the request parameters
    ///
    /// # Example
    /// ```rust
    /// use scopewire::{BeanDefinition, Kind, Qualifier};
    ///
    /// struct Pool {
    ///     size: usize,
    /// }
    ///
    /// let definition = BeanDefinition::singleton(Some(Qualifier::named("primary")), |_, _| {
    ///     Ok(Pool { size: 4 })
    /// })
    /// .created_at_start(true);
    /// assert_eq!(definition.kind(), Kind::Singleton);
    /// ```
    pub fn singleton<T, F>(qualifier: Option<Qualifier>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Scope, Parameters) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::typed(Kind::Singleton, qualifier, factory)
    }

    /// A definition built anew on every resolution
    pub fn factory<T, F>(qualifier: Option<Qualifier>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Scope, Parameters) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::typed(Kind::Factory, qualifier, factory)
    }

    /// A definition built once per scope and released when the scope closes
    pub fn scoped<T, F>(qualifier: Option<Qualifier>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Scope, Parameters) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::typed(Kind::Scoped, qualifier, factory)
    }

    fn typed<T, F>(kind: Kind, qualifier: Option<Qualifier>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Scope, Parameters) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let erased: FactoryFn = Arc::new(move |scope: &Scope, parameters: Parameters| {
            factory(scope, parameters).map(|value| Arc::new(value) as Instance)
        });
        Self::new(DefinitionKey::of::<T>(qualifier), kind, erased)
    }

    /// Replace any existing definition with the same key on registration
    #[must_use]
    pub fn allow_override(mut self, allow: bool) -> Self {
        self.allow_override = allow;
        self
    }

    /// Create the instance when the definitions are loaded (singletons only)
    #[must_use]
    pub fn created_at_start(mut self, eager: bool) -> Self {
        self.created_at_start = eager;
        self
    }

    pub const fn key(&self) -> &DefinitionKey {
        &self.key
    }

    pub const fn kind(&self) -> Kind {
        self.kind
    }

    /// Whether this definition may replace an existing one
    pub const fn overrides(&self) -> bool {
        self.allow_override
    }

    pub const fn is_created_at_start(&self) -> bool {
        self.created_at_start
    }

    pub(crate) fn create(&self, scope: &Scope, parameters: Parameters) -> anyhow::Result<Instance> {
        (self.factory)(scope, parameters)
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("allow_override", &self.allow_override)
            .field("created_at_start", &self.created_at_start)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}: {}]", self.kind, self.key)
    }
}

/// An ordered batch of definitions, loaded together
#[derive(Debug, Clone, Default)]
pub struct DefinitionSet {
    definitions: Vec<BeanDefinition>,
}

impl DefinitionSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, definition: BeanDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn push(&mut self, definition: BeanDefinition) {
        self.definitions.push(definition);
    }

    /// Keys of the definitions, in insertion order
    pub fn keys(&self) -> Vec<DefinitionKey> {
        self.definitions.iter().map(|d| d.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl IntoIterator for DefinitionSet {
    type Item = BeanDefinition;
    type IntoIter = std::vec::IntoIter<BeanDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.definitions.into_iter()
    }
}

impl FromIterator<BeanDefinition> for DefinitionSet {
    fn from_iter<I: IntoIterator<Item = BeanDefinition>>(iter: I) -> Self {
        Self {
            definitions: iter.into_iter().collect(),
        }
    }
}
