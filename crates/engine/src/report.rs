//! Top-level operations. Each resolves the crop, runs one engine component
//! and wraps the outcome in a serialisable report instead of propagating
//! errors.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::anomaly::{self, AnomalyReport};
use crate::control::{generate_commands, ControlCommand, CurrentReading};
use crate::error::EngineError;
use crate::predictor::PredictorSlot;
use crate::production::{self, ProductionEstimate};
use crate::sample::SensorSample;
use crate::stats::{self, AnalysisResult};
use crate::thresholds::{ResolvedCrop, ThresholdProvider};

#[derive(Debug, Clone, Serialize)]
pub struct Report<T> {
    pub success: bool,
    pub crop: String,
    pub crop_known: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub body: Option<T>,
}

impl<T> Report<T> {
    fn from_result(resolved: &ResolvedCrop, result: Result<T, EngineError>) -> Self {
        let (success, message, body) = match result {
            Ok(body) => (true, None, Some(body)),
            Err(e) => (false, Some(e.to_string()), None),
        };
        Self {
            success,
            crop: resolved.name().to_string(),
            crop_known: resolved.known,
            warning: resolved.warning(),
            message,
            body,
        }
    }

    fn failed(crop: &str, err: impl fmt::Display) -> Self {
        Self {
            success: false,
            crop: crop.to_string(),
            crop_known: false,
            warning: None,
            message: Some(err.to_string()),
            body: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlOutcome {
    pub success: bool,
    pub crop: String,
    pub crop_known: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub commands: Vec<ControlCommand>,
    pub learned_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learned_score: Option<f64>,
}

/// Entry point shared by the hub's HTTP handlers and control loop.
#[derive(Clone)]
pub struct Evaluator {
    provider: Arc<dyn ThresholdProvider>,
    predictor: Arc<PredictorSlot>,
}

impl Evaluator {
    pub fn new(provider: Arc<dyn ThresholdProvider>, predictor: Arc<PredictorSlot>) -> Self {
        Self { provider, predictor }
    }

    pub fn predictor(&self) -> &Arc<PredictorSlot> {
        &self.predictor
    }

    pub fn analyze(&self, samples: &[SensorSample], crop: &str) -> Report<AnalysisResult> {
        match self.provider.resolve(crop) {
            Ok(resolved) => Report::from_result(&resolved, stats::analyze(samples, &resolved.profile)),
            Err(e) => Report::failed(crop, e),
        }
    }

    pub fn detect_anomalies(
        &self,
        samples: &[SensorSample],
        crop: &str,
        threshold_std: f64,
    ) -> Report<AnomalyReport> {
        match self.provider.resolve(crop) {
            Ok(resolved) => Report::from_result(
                &resolved,
                anomaly::detect(samples, &resolved.profile, threshold_std),
            ),
            Err(e) => Report::failed(crop, e),
        }
    }

    pub fn predict_production(
        &self,
        samples: &[SensorSample],
        crop: &str,
        horizon_days: u32,
    ) -> Report<ProductionEstimate> {
        match self.provider.resolve(crop) {
            Ok(resolved) => Report::from_result(
                &resolved,
                production::estimate(samples, &resolved.profile, horizon_days),
            ),
            Err(e) => Report::failed(crop, e),
        }
    }

    /// A crop lookup failure yields an unsuccessful outcome with no commands.
    pub fn control(&self, reading: &CurrentReading, crop: &str) -> ControlOutcome {
        let predictor = self.predictor.load();
        let learned_enabled = predictor.ready();

        let resolved = match self.provider.resolve(crop) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(crop = %crop, error = %e, "crop lookup failed, no commands");
                return ControlOutcome {
                    success: false,
                    crop: crop.to_string(),
                    crop_known: false,
                    warning: Some(e.to_string()),
                    commands: Vec::new(),
                    learned_enabled,
                    learned_score: None,
                };
            }
        };

        let commands = generate_commands(reading, &resolved.profile, Some(predictor.as_ref()));
        let learned_score = if learned_enabled {
            match predictor.score_condition(&reading.clipped().to_vector()) {
                Ok(score) => Some(score),
                Err(e) => {
                    tracing::warn!(error = %e, "learned condition score unavailable");
                    None
                }
            }
        } else {
            None
        };

        ControlOutcome {
            success: true,
            crop: resolved.name().to_string(),
            crop_known: resolved.known,
            warning: resolved.warning(),
            commands,
            learned_enabled,
            learned_score,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
