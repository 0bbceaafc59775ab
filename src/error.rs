use crate::definition::DefinitionKey;
use crate::scope::ScopeId;
use thiserror::Error;

/// Registration conflicts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Definition already registered: {key} (request an override or use a distinct qualifier)")]
    DuplicateDefinition { key: DefinitionKey },
}

/// Failures raised while an instance holder builds an instance
#[derive(Error, Debug)]
pub enum CreationError {
    /// The user-supplied factory returned an error. Never cached.
    #[error("Can't create instance of {definition}: {source:#}")]
    FactoryFailed {
        definition: DefinitionKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("Cyclic dependency detected: {}", chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },

    #[error("No active scope to hold scoped definition {definition}")]
    NoActiveScope { definition: DefinitionKey },
}

/// Errors surfaced to callers of `Scope::resolve` and friends
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("No definition found for {key}")]
    NoDefinitionFound { key: DefinitionKey },

    #[error("Scope '{scope}' is closed")]
    ScopeClosed { scope: ScopeId },

    #[error("No active scope to resolve scoped definition {key}")]
    NoActiveScope { key: DefinitionKey },

    #[error("Definition {key} produced an instance that is not a {expected}")]
    TypeMismatch {
        key: DefinitionKey,
        expected: &'static str,
    },

    #[error(transparent)]
    CreationFailed(CreationError),
}

impl From<CreationError> for ResolutionError {
    fn from(err: CreationError) -> Self {
        match err {
            CreationError::NoActiveScope { definition } => {
                Self::NoActiveScope { key: definition }
            }
            other => Self::CreationFailed(other),
        }
    }
}

impl ResolutionError {
    /// The definition chain of a cyclic dependency, if that is what this is
    pub fn cycle(&self) -> Option<&[String]> {
        match self {
            Self::CreationFailed(CreationError::CyclicDependency { chain }) => Some(chain),
            _ => None,
        }
    }
}

/// Scope management failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Scope '{0}' is already active")]
    DuplicateScopeIdentifier(ScopeId),

    #[error("Scope '{0}' not found")]
    ScopeNotFound(ScopeId),

    #[error("The root scope can only be closed together with its container")]
    RootScope,

    #[error("Container has been closed or dropped")]
    ContainerClosed,

    #[error("Cannot create a child of closed scope '{0}'")]
    ParentClosed(ScopeId),

    #[error("Cannot derive a scope id for zero-sized component {0}")]
    UnaddressableComponent(&'static str),

    #[error("Invalid scope definitions: {0}")]
    Definition(#[from] DefinitionError),
}

/// Typed access to factory parameters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("No parameter at index {index} (got {len})")]
    Missing { index: usize, len: usize },

    #[error("Parameter at index {index} is not a {expected}")]
    TypeMismatch {
        index: usize,
        expected: &'static str,
    },
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// Error categorization for callers deciding whether to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or conflicting configuration - fix the definitions
    Configuration,
    /// The container was used incorrectly (closed scope, wrong scope)
    Misuse,
    /// User construction logic failed
    Creation,
}

impl Error {
    /// Classify the error for reporting and retry decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_)
            | Self::InvalidConfig { .. }
            | Self::Definition(_)
            | Self::Scope(ScopeError::Definition(_))
            | Self::Resolution(
                ResolutionError::NoDefinitionFound { .. } | ResolutionError::TypeMismatch { .. },
            ) => ErrorCategory::Configuration,

            Self::Resolution(ResolutionError::CreationFailed(
                CreationError::CyclicDependency { .. },
            )) => ErrorCategory::Configuration,

            Self::Resolution(ResolutionError::CreationFailed(_)) => ErrorCategory::Creation,

            Self::Resolution(_) | Self::Scope(_) => ErrorCategory::Misuse,
        }
    }

    /// Failed creations are never cached, so only those are worth retrying
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Creation
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DefinitionKey, Qualifier};

    #[test]
    fn test_no_active_scope_is_flattened() {
        let key = DefinitionKey::of::<u32>(None);
        let err = ResolutionError::from(CreationError::NoActiveScope {
            definition: key.clone(),
        });
        assert!(matches!(err, ResolutionError::NoActiveScope { key: k } if k == key));
    }

    #[test]
    fn test_factory_failure_is_retryable() {
        let err = Error::from(ResolutionError::from(CreationError::FactoryFailed {
            definition: DefinitionKey::of::<u32>(Some(Qualifier::named("db"))),
            source: anyhow::anyhow!("connection refused"),
        }));
        assert_eq!(err.category(), ErrorCategory::Creation);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection refused"));
        assert!(err.to_string().contains("u32[db]"));
    }

    #[test]
    fn test_cycle_is_a_configuration_error() {
        let err = Error::from(ResolutionError::from(CreationError::CyclicDependency {
            chain: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        }));
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Cyclic dependency detected: A -> B -> A");
    }

    #[test]
    fn test_scope_errors_are_misuse() {
        let err = Error::from(ScopeError::ScopeNotFound(ScopeId::new("session")));
        assert_eq!(err.category(), ErrorCategory::Misuse);
        assert_eq!(err.to_string(), "Scope 'session' not found");
    }
}
