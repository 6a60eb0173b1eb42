//! # qmempool Telemetry
//!
//! Logging setup and Prometheus export of pool counters.

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::MetricsRecorder;
