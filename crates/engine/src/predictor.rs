//! Optional learned-model hook. The control generator only ever sees the
//! [`LearnedPredictor`] trait; the hub swaps implementations through a
//! [`PredictorSlot`].

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};

use crate::channel::Channel;
use crate::error::PredictorError;

/// Four-channel input vector. Missing channels take neutral defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReadingVector {
    pub humidity: f64,
    pub temperature: f64,
    pub light: f64,
    pub soil_moisture: f64,
}

impl ReadingVector {
    pub fn default_for(channel: Channel) -> f64 {
        match channel {
            Channel::Temperature => 20.0,
            _ => 50.0,
        }
    }

    pub fn from_fn(mut value: impl FnMut(Channel) -> Option<f64>) -> Self {
        let mut get = |ch: Channel| value(ch).unwrap_or_else(|| Self::default_for(ch));
        Self {
            humidity: get(Channel::Humidity),
            temperature: get(Channel::Temperature),
            light: get(Channel::Light),
            soil_moisture: get(Channel::SoilMoisture),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnomalyPrediction {
    pub is_anomaly: bool,
    /// 0.0 - 1.0
    pub confidence: f64,
}

pub trait LearnedPredictor: Send + Sync {
    /// Callers must not consult the other methods unless this is true.
    fn ready(&self) -> bool;

    fn classify_anomaly(&self, input: &ReadingVector) -> Result<AnomalyPrediction, PredictorError>;

    /// Continuous 0-1 condition score.
    fn score_condition(&self, input: &ReadingVector) -> Result<f64, PredictorError>;
}

/// Never ready. Default for the hub and the rule-only path in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct Untrained;

impl LearnedPredictor for Untrained {
    fn ready(&self) -> bool {
        false
    }

    fn classify_anomaly(&self, _input: &ReadingVector) -> Result<AnomalyPrediction, PredictorError> {
        Err(PredictorError::NotReady)
    }

    fn score_condition(&self, _input: &ReadingVector) -> Result<f64, PredictorError> {
        Err(PredictorError::NotReady)
    }
}

/// Atomically replaceable predictor handle. Evaluations take a snapshot via
/// [`load`](Self::load) and keep using it even if a swap happens mid-way.
pub struct PredictorSlot {
    current: RwLock<Arc<dyn LearnedPredictor>>,
}

impl PredictorSlot {
    pub fn new(predictor: Arc<dyn LearnedPredictor>) -> Self {
        Self {
            current: RwLock::new(predictor),
        }
    }

    pub fn untrained() -> Self {
        Self::new(Arc::new(Untrained))
    }

    pub fn load(&self) -> Arc<dyn LearnedPredictor> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn replace(&self, predictor: Arc<dyn LearnedPredictor>) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = predictor;
        tracing::info!(ready = guard.ready(), "learned predictor replaced");
    }

    pub fn ready(&self) -> bool {
        self.load().ready()
    }
}

impl Default for PredictorSlot {
    fn default() -> Self {
        Self::untrained()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
