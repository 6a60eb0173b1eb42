//! # qmempool Configuration System
//!
//! Layered configuration for pool sizing, backing allocator selection and
//! the CLI workload drivers.
//!
//! ## Features
//! - **Layered Loading**: defaults, YAML files, then `QMEMPOOL_*` environment
//! - **Validation**: power-of-two and range checks before a pool is built

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

mod error;
mod pool;
mod telemetry;
mod validation;
mod workload;

pub use error::ConfigError;
pub use pool::{BackingKind, PoolConfig};
pub use telemetry::TelemetryConfig;
pub use workload::WorkloadConfig;

/// Top-level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct QmempoolConfig {
    /// Pool sizing and backing allocator.
    #[validate(nested)]
    #[serde(default)]
    pub pool: PoolConfig,

    /// Synthetic workload for `qmempool stress`.
    #[validate(nested)]
    #[serde(default)]
    pub workload: WorkloadConfig,

    /// Logging and metrics output.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl QmempoolConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/qmempool.yaml` - Base settings. If missing, defaults are used.
    /// 3. `config/<QMEMPOOL_ENV>.yaml` - Environment-specific overrides.
    /// 4. `QMEMPOOL_*` environment variables, `__` separating nested keys.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(QmempoolConfig::default()));

        if Path::new("config/qmempool.yaml").exists() {
            figment = figment.merge(Yaml::file("config/qmempool.yaml"));
        } else {
            info!("config/qmempool.yaml not found, using default configuration");
        }

        let env = std::env::var("QMEMPOOL_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract(figment.merge(Env::prefixed("QMEMPOOL_").split("__")))
    }

    /// Load configuration from a specific path, over defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        Self::extract(
            Figment::from(Serialized::defaults(QmempoolConfig::default()))
                .merge(Yaml::file(path))
                .merge(Env::prefixed("QMEMPOOL_").split("__")),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}
