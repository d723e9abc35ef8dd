use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::channel::Channel;

/// One timestamped multi-channel reading from a farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub farm_id: u32,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub light: Option<f64>,
    #[serde(default)]
    pub soil_moisture: Option<f64>,
}

impl SensorSample {
    pub fn new(farm_id: u32, timestamp: OffsetDateTime) -> Self {
        Self {
            timestamp,
            farm_id,
            humidity: None,
            temperature: None,
            light: None,
            soil_moisture: None,
        }
    }

    pub fn with(mut self, channel: Channel, value: f64) -> Self {
        self.set(channel, Some(value));
        self
    }

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
}

/// Non-absent, finite values for one channel, in sample order.
pub fn channel_values(samples: &[SensorSample], channel: Channel) -> Vec<f64> {
    samples
        .iter()
        .filter_map(|s| s.value(channel))
        .filter(|v| v.is_finite())
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn builder_sets_only_named_channels() {
        let s = SensorSample::new(1, datetime!(2024-05-01 12:00 UTC))
            .with(Channel::Humidity, 55.0)
            .with(Channel::SoilMoisture, 0.0);
        assert_eq!(s.value(Channel::Humidity), Some(55.0));
        assert_eq!(s.value(Channel::SoilMoisture), Some(0.0));
        assert_eq!(s.value(Channel::Temperature), None);
        assert!(!s.is_empty());
    }

    #[test]
    fn channel_values_skips_absent_and_non_finite() {
        let t = datetime!(2024-05-01 12:00 UTC);
        let samples = vec![
            SensorSample::new(1, t).with(Channel::Light, 10.0),
            SensorSample::new(1, t),
            SensorSample::new(1, t).with(Channel::Light, f64::NAN),
            SensorSample::new(1, t).with(Channel::Light, 30.0),
        ];
        assert_eq!(channel_values(&samples, Channel::Light), vec![10.0, 30.0]);
    }

    #[test]
    fn deserializes_with_missing_channels() {
        let json = r#"{"timestamp":"2024-05-01T12:00:00Z","farm_id":3,"temperature":21.5}"#;
        let s: SensorSample = serde_json::from_str(json).unwrap();
        assert_eq!(s.farm_id, 3);
        assert_eq!(s.temperature, Some(21.5));
        assert_eq!(s.humidity, None);
    }
}
