//! Band-violation plus z-score anomaly detection over a time-ordered window.

use serde::Serialize;
use time::OffsetDateTime;

use crate::channel::Channel;
use crate::error::EngineError;
use crate::sample::SensorSample;
use crate::thresholds::{CropProfile, ThresholdBand};

pub const DEFAULT_THRESHOLD_STD: f64 = 2.0;
/// Channels with fewer valid values are skipped.
pub const MIN_SAMPLES: usize = 3;
/// Length of the `anomalies` list in a report; totals still count everything.
pub const DISPLAY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Low,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub channel: Channel,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub value: f64,
    pub mean: f64,
    pub std: f64,
    pub z_score: f64,
    pub direction: Direction,
    pub severity: Severity,
    pub band_min: f64,
    pub band_max: f64,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelCounts {
    pub humidity: usize,
    pub temperature: usize,
    pub light: usize,
    pub soil_moisture: usize,
}

impl ChannelCounts {
    fn bump(&mut self, channel: Channel) {
        match channel {
            Channel::Humidity => self.humidity += 1,
            Channel::Temperature => self.temperature += 1,
            Channel::Light => self.light += 1,
            Channel::SoilMoisture => self.soil_moisture += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub threshold_std: f64,
    pub total_anomalies: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub by_channel: ChannelCounts,
    pub anomalies: Vec<Anomaly>,
}

/// Classify one value. Returns the severity before z-score escalation and
/// the reason text, or `None` when the value is unremarkable.
fn classify(
    value: f64,
    z: f64,
    band: &ThresholdBand,
    crop: &str,
    threshold_std: f64,
) -> Option<(Severity, String)> {
    let unit = &band.unit;
    if value < band.critical_min {
        Some((Severity::High, format!("below critical range (under {}{unit})", band.critical_min)))
    } else if value > band.critical_max {
        Some((Severity::High, format!("above critical range (over {}{unit})", band.critical_max)))
    } else if value < band.acceptable_min {
        Some((
            Severity::High,
            format!("below acceptable range ({crop} minimum {}{unit})", band.acceptable_min),
        ))
    } else if value > band.acceptable_max {
        Some((
            Severity::High,
            format!("above acceptable range ({crop} maximum {}{unit})", band.acceptable_max),
        ))
    } else if !band.in_optimal(value) {
        if z <= threshold_std {
            return None;
        }
        let reason = if value < band.optimal_min {
            format!("below optimal range ({crop} optimum {}{unit})", band.optimal_min)
        } else {
            format!("above optimal range ({crop} optimum {}{unit})", band.optimal_max)
        };
        Some((Severity::Medium, reason))
    } else if z > threshold_std * 1.5 {
        Some((
            Severity::Medium,
            format!("statistical outlier ({z:.2} standard deviations from mean)"),
        ))
    } else {
        None
    }
}

/// Anomalies for one channel, in sample order.
pub fn detect_channel(
    samples: &[SensorSample],
    channel: Channel,
    band: &ThresholdBand,
    crop: &str,
    threshold_std: f64,
) -> Vec<Anomaly> {
    let points: Vec<(OffsetDateTime, f64)> = samples
        .iter()
        .filter_map(|s| s.value(channel).filter(|v| v.is_finite()).map(|v| (s.timestamp, v)))
        .collect();
    if points.len() < MIN_SAMPLES {
        return Vec::new();
    }

    let n = points.len() as f64;
    let mean = points.iter().map(|(_, v)| v).sum::<f64>() / n;
    let std = (points.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std == 0.0 {
        return Vec::new();
    }

    points
        .into_iter()
        .filter_map(|(timestamp, value)| {
            let z = (value - mean).abs() / std;
            let (mut severity, reason) = classify(value, z, band, crop, threshold_std)?;
            if z > threshold_std * 2.0 {
                severity = Severity::High;
            }
            Some(Anomaly {
                channel,
                timestamp,
                value,
                mean,
                std,
                z_score: z,
                direction: if value < band.optimal_min {
                    Direction::Low
                } else {
                    Direction::High
                },
                severity,
                band_min: band.optimal_min,
                band_max: band.optimal_max,
                message: format!("{} value {value:.1}{}: {reason}", band.display_name, band.unit),
                reason,
            })
        })
        .collect()
}

pub fn detect(
    samples: &[SensorSample],
    crop: &CropProfile,
    threshold_std: f64,
) -> Result<AnomalyReport, EngineError> {
    if samples.is_empty() {
        return Err(EngineError::NoData);
    }

    let mut all: Vec<Anomaly> = Channel::ALL
        .iter()
        .flat_map(|ch| detect_channel(samples, *ch, crop.band(*ch), &crop.name, threshold_std))
        .collect();
    // Stable: same-timestamp anomalies keep channel order.
    all.sort_by_key(|a| a.timestamp);

    let mut by_channel = ChannelCounts::default();
    for a in &all {
        by_channel.bump(a.channel);
    }
    let high_count = all.iter().filter(|a| a.severity == Severity::High).count();
    let total_anomalies = all.len();

    if total_anomalies > 0 {
        tracing::info!(crop = %crop.name, total = total_anomalies, high = high_count, "anomalies detected");
    }

    all.truncate(DISPLAY_LIMIT);
    Ok(AnomalyReport {
        threshold_std,
        total_anomalies,
        high_count,
        medium_count: total_anomalies - high_count,
        by_channel,
        anomalies: all,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::ThresholdRegistry;
    use time::Duration;
    use time::macros::datetime;

    fn humidity_series(values: &[f64]) -> Vec<SensorSample> {
        let start = datetime!(2024-05-01 00:00 UTC);
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                SensorSample::new(1, start + Duration::hours(i as i64)).with(Channel::Humidity, *v)
            })
            .collect()
    }

    fn default_crop() -> CropProfile {
        ThresholdRegistry::builtin().default_profile().as_ref().clone()
    }

    #[test]
    fn humidity_spike_flagged_high() {
        let crop = default_crop();
        let report = detect(&humidity_series(&[50.0, 55.0, 95.0, 52.0, 53.0]), &crop, 2.0).unwrap();
        assert_eq!(report.total_anomalies, 1);
        let a = &report.anomalies[0];
        assert_eq!(a.value, 95.0);
        assert_eq!(a.severity, Severity::High);
        assert_eq!(a.direction, Direction::High);
        assert_eq!((a.band_min, a.band_max), (50.0, 70.0));
        assert!(a.message.starts_with("Humidity value 95.0%:"));
        assert_eq!(report.by_channel.humidity, 1);
        assert_eq!(report.high_count, 1);
    }

    #[test]
    fn constant_channel_never_flagged() {
        let crop = default_crop();
        // Every value is far outside the critical band but std is zero.
        let report = detect(&humidity_series(&[5.0, 5.0, 5.0, 5.0]), &crop, 2.0).unwrap();
        assert_eq!(report.total_anomalies, 0);
    }

    #[test]
    fn fewer_than_three_values_skipped() {
        let crop = default_crop();
        let report = detect(&humidity_series(&[5.0, 99.0]), &crop, 2.0).unwrap();
        assert_eq!(report.total_anomalies, 0);
    }

    #[test]
    fn large_z_escalates_medium_to_high() {
        let crop = default_crop();
        // Outlier 69 sits inside the optimal band: the rule is "statistical
        // outlier" (medium) but z > 2 * threshold escalates it.
        let mut values = vec![60.0; 30];
        values.push(69.0);
        let report = detect(&humidity_series(&values), &crop, 2.0).unwrap();
        assert_eq!(report.total_anomalies, 1);
        let a = &report.anomalies[0];
        assert!(a.z_score > 4.0);
        assert!(a.reason.starts_with("statistical outlier"));
        assert_eq!(a.severity, Severity::High);
    }

    #[test]
    fn optimal_violation_needs_z_over_threshold() {
        let crop = default_crop();
        // 72 is above the optimum but only mildly deviant.
        let report = detect(&humidity_series(&[60.0, 65.0, 72.0, 58.0, 62.0]), &crop, 2.0).unwrap();
        assert_eq!(report.total_anomalies, 0);
    }

    #[test]
    fn optimal_violation_with_high_z_is_medium() {
        let crop = default_crop();
        // 12 x 60 + one 72: z of 72 is sqrt(12) ~ 3.46, above 2.0 but below 4.0.
        let mut values = vec![60.0; 12];
        values.push(72.0);
        let report = detect(&humidity_series(&values), &crop, 2.0).unwrap();
        assert_eq!(report.total_anomalies, 1);
        let a = &report.anomalies[0];
        assert_eq!(a.severity, Severity::Medium);
        assert!(a.reason.contains("above optimal range (default optimum 70%)"));
    }

    #[test]
    fn report_sorted_by_timestamp_across_channels() {
        let crop = default_crop();
        let start = datetime!(2024-05-01 00:00 UTC);
        let mut samples = Vec::new();
        for i in 0..5 {
            let h = if i == 4 { 99.0 } else { 60.0 };
            let t = if i == 1 { 40.0 } else { 20.0 };
            samples.push(
                SensorSample::new(1, start + Duration::hours(i))
                    .with(Channel::Humidity, h)
                    .with(Channel::Temperature, t),
            );
        }
        let report = detect(&samples, &crop, 2.0).unwrap();
        assert_eq!(report.total_anomalies, 2);
        assert_eq!(report.anomalies[0].channel, Channel::Temperature);
        assert_eq!(report.anomalies[1].channel, Channel::Humidity);
        assert!(report.anomalies[0].timestamp < report.anomalies[1].timestamp);
    }

    #[test]
    fn display_list_truncated_but_totals_kept() {
        let crop = default_crop();
        // Alternating values well outside the critical band on both sides.
        let values: Vec<f64> = (0..240).map(|i| if i % 2 == 0 { 0.0 } else { 100.0 }).collect();
        let report = detect(&humidity_series(&values), &crop, 2.0).unwrap();
        assert_eq!(report.total_anomalies, 240);
        assert_eq!(report.anomalies.len(), DISPLAY_LIMIT);
        assert_eq!(report.by_channel.humidity, 240);
    }

    #[test]
    fn empty_samples_is_no_data() {
        assert!(matches!(detect(&[], &default_crop(), 2.0), Err(EngineError::NoData)));
    }
}
