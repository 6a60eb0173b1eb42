//! Observability configuration.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// Logging and metrics output.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    #[validate(length(min = 1))]
    pub log_filter: String,

    /// Print Prometheus text after a run.
    #[serde(default)]
    pub metrics: bool,
}

fn default_log_filter() -> String {
    "info".into()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            metrics: false,
        }
    }
}
