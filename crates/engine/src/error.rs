use thiserror::Error;

/// Failures surfaced by the evaluation engine.
///
/// None of these abort sibling computations: the report layer turns them
/// into `success = false` payloads.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no sensor data to analyse")]
    NoData,

    #[error("insufficient data for {what}: need at least {needed}, got {got}")]
    InsufficientSamples {
        what: &'static str,
        needed: usize,
        got: usize,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("crop name is empty")]
    EmptyName,

    #[error("crop '{0}' is already registered")]
    Duplicate(String),

    #[error("threshold registry is unavailable")]
    Unavailable,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PredictorError {
    #[error("learned predictor is not trained")]
    NotReady,

    #[error("learned predictor failed: {0}")]
    Failed(String),
}
