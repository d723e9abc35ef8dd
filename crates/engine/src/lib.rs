//! Greenhouse environment evaluation: condition scoring, anomaly detection,
//! production estimates and actuator command generation against crop
//! threshold bands.
//!
//! Every operation is a synchronous function of its inputs plus snapshots of
//! the crop registry and the learned-predictor slot.

pub mod anomaly;
pub mod channel;
pub mod control;
pub mod error;
pub mod predictor;
pub mod production;
pub mod report;
pub mod sample;
pub mod stats;
pub mod thresholds;

pub use channel::{match_label, Channel};
pub use control::{generate_commands, Action, ControlCommand, CurrentReading, ReadingPayload};
pub use error::{EngineError, PredictorError, RegistryError};
pub use predictor::{LearnedPredictor, PredictorSlot, ReadingVector, Untrained};
pub use report::{ControlOutcome, Evaluator, Report};
pub use sample::SensorSample;
pub use thresholds::{CropProfile, ResolvedCrop, ThresholdBand, ThresholdProvider, ThresholdRegistry};
