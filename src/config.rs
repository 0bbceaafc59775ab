//! Container configuration
//!
//! Settings come from, in increasing priority: built-in defaults, an optional
//! configuration file, and `SCOPEWIRE_*` environment variables
//! (`SCOPEWIRE_ALLOW_OVERRIDE=true`, `SCOPEWIRE_LOG_LEVEL=debug`, ...).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Prefix of the environment variables read by [`ContainerConfig::load`]
pub const ENV_PREFIX: &str = "SCOPEWIRE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Let every registration replace an existing definition with the same key
    pub allow_override: bool,
    /// Create `created_at_start` singletons as soon as they are loaded
    pub create_eager_instances: bool,
    /// Default level for [`init_tracing`] when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            allow_override: false,
            create_eager_instances: true,
            log_level: "info".to_string(),
        }
    }
}

impl ContainerConfig {
    /// Defaults overridden by the environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Defaults overridden by `path`, then by the environment
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_from(Some(path.as_ref()))
    }

    fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading container configuration file");
            builder = builder.add_source(::config::File::from(path));
        }
        let settings = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check that `log_level` names a tracing level
    pub fn validate(&self) -> Result<()> {
        self.level_filter().map(|_| ())
    }

    fn level_filter(&self) -> Result<LevelFilter> {
        self.log_level
            .trim()
            .parse::<LevelFilter>()
            .map_err(|e| Error::InvalidConfig {
                field: "log_level".to_string(),
                reason: e.to_string(),
            })
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `config.log_level`
///
/// Does nothing when a global subscriber is already installed.
pub fn init_tracing(config: &ContainerConfig) -> Result<()> {
    let level = config.level_filter()?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
    Ok(())
}
