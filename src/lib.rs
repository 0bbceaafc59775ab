//! Scoped dependency injection
//!
//! Declare how each type is built once, as a [`BeanDefinition`], then let a
//! [`Container`] hand out fully wired instances. Instances live as
//! singletons, as fresh values per request, or inside a [`Scope`] bound to
//! the lifetime of some external component.

pub mod config;
pub mod container;
pub mod definition;
pub mod error;
pub mod instance;
pub mod lifecycle;
pub mod registry;
pub mod scope;

pub use crate::config::{init_tracing, ContainerConfig};
pub use container::Container;
pub use definition::{
    BeanDefinition, DefinitionKey, DefinitionSet, FactoryFn, Instance, Kind, Parameters,
    Qualifier, TypeKey,
};
pub use error::{
    CreationError, DefinitionError, Error, ErrorCategory, ParameterError, ResolutionError, Result,
    ScopeError,
};
pub use instance::{InstanceHolder, Resolved};
pub use lifecycle::{scope_id_of, ScopeGuard};
pub use registry::Registry;
pub use scope::{Scope, ScopeId, ScopeSource, ROOT_SCOPE_ID};
