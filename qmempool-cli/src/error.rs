use qmempool_config::ConfigError;
use qmempool_core::alloc::BackingError;
use qmempool_core::{CreateError, LeaseError, OutOfMemory};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Backing allocator setup failed: {0}")]
    Backing(#[from] BackingError),

    #[error("Pool creation failed: {0}")]
    Create(#[from] CreateError),

    #[error("Lease failed: {0}")]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),

    #[error("Worker thread spawn failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics export failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Config rendering failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Worker {0} panicked")]
    Worker(usize),

    #[error("Backing allocator leaked {live} elements ({allocs} allocs, {frees} frees)")]
    Leak { live: usize, allocs: usize, frees: usize },
}
