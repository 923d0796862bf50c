use thiserror::Error;

/// Errors raised while configuring or advancing a simulation.
///
/// Every variant is fatal to the run: a step is never retried.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("the body store is empty")]
    EmptySystem,
    #[error("body {index} at {position:?} lies outside the bounding box")]
    OutOfBounds { index: usize, position: [f64; 3] },
    #[error("body {index} has a non-finite position")]
    NonFinite { index: usize },
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T, E = SimError> = std::result::Result<T, E>;
