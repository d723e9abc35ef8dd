//! The four measured channels, their physical validity ranges and actuators,
//! and resolution of free-text sensor labels to channels.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Humidity,
    Temperature,
    Light,
    SoilMoisture,
}

/// Raise/lower actuator pair for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actuators {
    pub raise: &'static str,
    pub lower: Option<&'static str>,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Humidity,
        Channel::Temperature,
        Channel::Light,
        Channel::SoilMoisture,
    ];

    /// 1-based index used by downstream controllers.
    pub fn index(self) -> u8 {
        match self {
            Self::Humidity => 1,
            Self::Temperature => 2,
            Self::Light => 3,
            Self::SoilMoisture => 4,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Humidity => "humidity",
            Self::Temperature => "temperature",
            Self::Light => "light",
            Self::SoilMoisture => "soil_moisture",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Humidity => "Humidity",
            Self::Temperature => "Temperature",
            Self::Light => "Light",
            Self::SoilMoisture => "Soil moisture",
        }
    }

    pub fn default_unit(self) -> &'static str {
        match self {
            Self::Temperature => "℃",
            _ => "%",
        }
    }

    /// Physically plausible range; readings outside it are clipped.
    pub fn valid_range(self) -> (f64, f64) {
        match self {
            Self::Temperature => (-10.0, 50.0),
            _ => (0.0, 100.0),
        }
    }

    pub fn clamp(self, value: f64) -> f64 {
        let (lo, hi) = self.valid_range();
        value.clamp(lo, hi)
    }

    pub fn actuators(self) -> Actuators {
        match self {
            Self::Humidity => Actuators {
                raise: "humidifier",
                lower: Some("ventilation"),
            },
            Self::Temperature => Actuators {
                raise: "heater",
                lower: Some("cooler"),
            },
            Self::Light => Actuators {
                raise: "grow_light_on",
                lower: Some("grow_light_off"),
            },
            Self::SoilMoisture => Actuators {
                raise: "irrigation",
                lower: Some("drainage"),
            },
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key() == key)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// Label matching
// ---------------------------------------------------------------------------

type LabelPredicate = fn(&str) -> bool;

/// Ordered `(predicate, channel)` rules, evaluated top-down on the
/// lower-cased label. Soil moisture and light must precede humidity: "토양습도"
/// (soil moisture) contains "습도" (humidity), and pressure-labelled light
/// sensors must never be read as humidity.
pub const LABEL_RULES: &[(LabelPredicate, Channel)] = &[
    (is_soil_label, Channel::SoilMoisture),
    (is_light_label, Channel::Light),
    (is_humidity_label, Channel::Humidity),
    (is_temperature_label, Channel::Temperature),
];

fn contains_any(label: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| label.contains(n))
}

fn is_soil_label(label: &str) -> bool {
    contains_any(label, &["soil", "토양", "vibration", "진동"])
}

fn is_light_label(label: &str) -> bool {
    contains_any(label, &["light", "채광", "pressure", "압력"])
}

fn is_humidity_label(label: &str) -> bool {
    contains_any(label, &["humidity", "습도"])
}

fn is_temperature_label(label: &str) -> bool {
    contains_any(label, &["temperature", "온도"])
}

/// Resolve a free-text sensor label to a channel.
pub fn match_label(label: &str) -> Option<Channel> {
    let lower = label.trim().to_lowercase();
    LABEL_RULES
        .iter()
        .find(|(matches, _)| matches(&lower))
        .map(|(_, channel)| *channel)
}

// ===========================================================================
// Tests
// ===========================================================================
