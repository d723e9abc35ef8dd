//! Current-reading resolution and closed-loop actuator command generation.
//!
//! The generator is stateless: each call looks at one reading and decides per
//! channel whether to nudge it back towards the middle of the optimal band.
//! A hysteresis margin around the band suppresses commands near the edges so
//! actuators do not flap.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::{match_label, Channel};
use crate::predictor::{AnomalyPrediction, LearnedPredictor, ReadingVector};
use crate::sample::SensorSample;
use crate::thresholds::{CropProfile, ThresholdBand};

/// Fraction of the optimal width tolerated on either side of the band.
pub const HYSTERESIS_FRACTION: f64 = 0.05;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// One free-text labelled entry, e.g. `{"name": "토양습도", "rawValue": 41}`.
#[derive(Debug, Clone, Deserialize)]
pub struct LabeledValue {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "rawValue")]
    pub raw_value: Option<Value>,
    #[serde(default)]
    pub value: Option<Value>,
}

impl LabeledValue {
    /// Raw value wins over the display value when both are present.
    pub fn effective_value(&self) -> Option<&Value> {
        self.raw_value
            .as_ref()
            .filter(|v| !v.is_null())
            .or_else(|| self.value.as_ref().filter(|v| !v.is_null()))
    }
}

/// A current reading as it arrives from controllers: either a labelled
/// sensor list or the four named fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReadingPayload {
    Labeled {
        sensors: Vec<LabeledValue>,
    },
    Fields {
        #[serde(default)]
        humidity: Option<Value>,
        #[serde(default)]
        temperature: Option<Value>,
        #[serde(default)]
        light: Option<Value>,
        #[serde(default)]
        soil_moisture: Option<Value>,
    },
}

/// Numeric view of a JSON reading value. Strings are stripped to digits,
/// `.` and `-` first ("23.5℃" reads as 23.5). Anything unparsable becomes
/// 0.0 with a warning; `null` is "no reading".
pub fn coerce_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Null => return None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Some(v),
        _ => {
            tracing::warn!(raw = %value, "unparsable reading value, using 0");
            Some(0.0)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentReading {
    pub humidity: Option<f64>,
    pub temperature: Option<f64>,
    pub light: Option<f64>,
    pub soil_moisture: Option<f64>,
}

impl CurrentReading {
    pub fn value(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Humidity => self.humidity,
            Channel::Temperature => self.temperature,
            Channel::Light => self.light,
            Channel::SoilMoisture => self.soil_moisture,
        }
    }

    pub fn set(&mut self, channel: Channel, value: Option<f64>) {
        let slot = match channel {
            Channel::Humidity => &mut self.humidity,
            Channel::Temperature => &mut self.temperature,
            Channel::Light => &mut self.light,
            Channel::SoilMoisture => &mut self.soil_moisture,
        };
        *slot = value;
    }

    pub fn is_empty(&self) -> bool {
        Channel::ALL.iter().all(|c| self.value(*c).is_none())
    }

    /// Copy with every present value clipped into its channel's valid range.
    pub fn clipped(&self) -> Self {
        let mut out = *self;
        for ch in Channel::ALL {
            let Some(v) = self.value(ch) else { continue };
            if !v.is_finite() {
                tracing::warn!(channel = %ch, "non-finite reading dropped");
                out.set(ch, None);
                continue;
            }
            let c = ch.clamp(v);
            if c != v {
                let (lo, hi) = ch.valid_range();
                tracing::warn!(channel = %ch, value = v, lo, hi, "reading out of range, clipped");
            }
            out.set(ch, Some(c));
        }
        out
    }

    pub fn to_vector(&self) -> ReadingVector {
        ReadingVector::from_fn(|ch| self.value(ch))
    }
}

impl From<&SensorSample> for CurrentReading {
    fn from(sample: &SensorSample) -> Self {
        Self {
            humidity: sample.humidity,
            temperature: sample.temperature,
            light: sample.light,
            soil_moisture: sample.soil_moisture,
        }
    }
}

impl From<&ReadingPayload> for CurrentReading {
    fn from(payload: &ReadingPayload) -> Self {
        resolve_payload(payload)
    }
}

/// Map a payload onto channels. For labelled lists the first entry that
/// resolves to a channel wins; unknown labels are logged and ignored.
pub fn resolve_payload(payload: &ReadingPayload) -> CurrentReading {
    let mut reading = CurrentReading::default();
    match payload {
        ReadingPayload::Labeled { sensors } => {
            for entry in sensors {
                let Some(channel) = match_label(&entry.name) else {
                    tracing::warn!(label = %entry.name, "unknown sensor label ignored");
                    continue;
                };
                if reading.value(channel).is_some() {
                    tracing::debug!(label = %entry.name, %channel, "channel already resolved, entry ignored");
                    continue;
                }
                reading.set(channel, entry.effective_value().and_then(coerce_value));
            }
        }
        ReadingPayload::Fields {
            humidity,
            temperature,
            light,
            soil_moisture,
        } => {
            let get = |v: &Option<Value>| v.as_ref().and_then(coerce_value);
            reading.humidity = get(humidity);
            reading.temperature = get(temperature);
            reading.light = get(light);
            reading.soil_moisture = get(soil_moisture);
        }
    }
    reading
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Increase,
    Decrease,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlCommand {
    pub channel: Channel,
    pub channel_index: u8,
    pub channel_label: String,
    pub current_value: f64,
    pub target_value: f64,
    pub action: Action,
    /// Absolute adjustment, one decimal.
    pub magnitude: f64,
    pub device: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learned_anomaly: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learned_confidence: Option<f64>,
}

pub fn tolerance(band: &ThresholdBand) -> f64 {
    band.optimal_width() * HYSTERESIS_FRACTION
}

/// Share of the distance to target applied in one command: 1.0 for a
/// confident learned anomaly, 0.95 for a tentative one, 0.9 otherwise.
pub fn magnitude_factor(prediction: Option<&AnomalyPrediction>) -> f64 {
    match prediction {
        Some(p) if p.is_anomaly && p.confidence > 0.7 => 1.0,
        Some(p) if p.is_anomaly && p.confidence > 0.5 => 0.95,
        _ => 0.9,
    }
}

fn learned_note(prediction: Option<&AnomalyPrediction>) -> String {
    match prediction {
        None => " (rule-based)".to_string(),
        Some(p) if p.is_anomaly && p.confidence > 0.7 => {
            format!(" (learned anomaly, confidence {:.1}%)", p.confidence * 100.0)
        }
        Some(p) if p.is_anomaly && p.confidence > 0.5 => {
            format!(" (possible learned anomaly, confidence {:.1}%)", p.confidence * 100.0)
        }
        Some(p) => format!(" (learned: normal, confidence {:.1}%)", p.confidence * 100.0),
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Decide one channel. `current` must already be clipped.
pub fn evaluate_channel(
    channel: Channel,
    current: f64,
    band: &ThresholdBand,
    prediction: Option<&AnomalyPrediction>,
) -> Option<ControlCommand> {
    let tol = tolerance(band);
    if band.optimal_min - tol <= current && current <= band.optimal_max + tol {
        return None;
    }

    let actuators = channel.actuators();
    let (action, device, side) = if current < band.optimal_min {
        (Action::Increase, actuators.raise, "below")
    } else if current > band.optimal_max {
        (Action::Decrease, actuators.lower?, "above")
    } else {
        // Only reachable with a negative tolerance from an inverted band.
        return None;
    };

    let target = band.optimal_midpoint();
    let magnitude = round1((target - current).abs() * magnitude_factor(prediction));
    let label = channel.label();

    Some(ControlCommand {
        channel,
        channel_index: channel.index(),
        channel_label: label.to_string(),
        current_value: current,
        target_value: target,
        action,
        magnitude,
        device: device.to_string(),
        reason: format!(
            "{label} is {side} the optimal range ({}-{}); {device} required.{}",
            band.optimal_min,
            band.optimal_max,
            learned_note(prediction)
        ),
        learned_anomaly: prediction.map(|p| p.is_anomaly),
        learned_confidence: prediction.map(|p| p.confidence),
    })
}

/// Commands for every channel of `reading` that sits outside its band plus
/// hysteresis. A ready predictor is consulted once and only scales
/// magnitudes.
pub fn generate_commands(
    reading: &CurrentReading,
    crop: &CropProfile,
    predictor: Option<&dyn LearnedPredictor>,
) -> Vec<ControlCommand> {
    let reading = reading.clipped();

    let prediction = predictor.filter(|p| p.ready()).and_then(|p| {
        match p.classify_anomaly(&reading.to_vector()) {
            Ok(pred) => {
                tracing::info!(
                    anomaly = pred.is_anomaly,
                    confidence = pred.confidence,
                    "learned prediction"
                );
                Some(pred)
            }
            Err(e) => {
                tracing::warn!(error = %e, "learned prediction failed, using rule-based factor");
                None
            }
        }
    });

    let commands: Vec<ControlCommand> = Channel::ALL
        .iter()
        .filter_map(|ch| {
            let current = reading.value(*ch)?;
            evaluate_channel(*ch, current, crop.band(*ch), prediction.as_ref())
        })
        .collect();

    for cmd in &commands {
        tracing::debug!(
            crop = %crop.name,
            channel = %cmd.channel,
            action = ?cmd.action,
            magnitude = cmd.magnitude,
            device = %cmd.device,
            "control command"
        );
    }
    commands
}

// ===========================================================================
// Tests
// ===========================================================================
