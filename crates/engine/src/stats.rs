//! Descriptive statistics, the 0-1 optimality score and condition status for
//! each channel over a sample window.

use serde::Serialize;

use crate::channel::Channel;
use crate::error::EngineError;
use crate::sample::{channel_values, SensorSample};
use crate::thresholds::{CropProfile, ThresholdBand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Optimal,
    Acceptable,
    Warning,
    Critical,
    NoData,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Summary {
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation.
    pub std: f64,
    pub median: f64,
}

/// Zeroed summary for an empty slice.
pub fn summarize(values: &[f64]) -> Summary {
    if values.is_empty() {
        return Summary::default();
    }

    let n = values.len() as f64;
    let average = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - average).powi(2)).sum::<f64>() / n;

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    Summary {
        count: values.len(),
        average,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        std: variance.sqrt(),
        median,
    }
}

/// 1.0 inside the optimal band, decaying to a 0.6 floor across the
/// acceptable band and a 0.2 floor beyond it.
pub fn optimal_score(value: f64, band: &ThresholdBand) -> f64 {
    let width = band.optimal_width();
    if width <= 0.0 {
        return 0.5;
    }

    if band.in_optimal(value) {
        1.0
    } else if band.in_acceptable(value) {
        let distance = if value < band.optimal_min {
            band.optimal_min - value
        } else {
            value - band.optimal_max
        };
        (1.0 - distance / width * 0.4).max(0.6)
    } else {
        let distance = if value < band.acceptable_min {
            band.acceptable_min - value
        } else {
            value - band.acceptable_max
        };
        (0.6 - distance / width * 0.4).max(0.2)
    }
}

pub fn status(value: f64, band: &ThresholdBand) -> Status {
    if band.in_optimal(value) {
        Status::Optimal
    } else if band.in_acceptable(value) {
        Status::Acceptable
    } else if band.in_critical(value) {
        Status::Warning
    } else {
        Status::Critical
    }
}

// ---------------------------------------------------------------------------
// Analysis bundle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ChannelAnalysis {
    pub name: String,
    pub unit: String,
    #[serde(flatten)]
    pub summary: Summary,
    pub status: Status,
    pub optimal_score: f64,
    pub optimal_range: String,
}

impl ChannelAnalysis {
    pub fn evaluate(values: &[f64], band: &ThresholdBand) -> Self {
        let summary = summarize(values);
        let (status, optimal_score) = if summary.count == 0 {
            (Status::NoData, 0.0)
        } else {
            (status(summary.average, band), optimal_score(summary.average, band))
        };

        Self {
            name: band.display_name.clone(),
            unit: band.unit.clone(),
            summary,
            status,
            optimal_score,
            optimal_range: band.optimal_range_label(),
        }
    }

    pub fn has_data(&self) -> bool {
        self.summary.count > 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub data_count: usize,
    pub humidity: ChannelAnalysis,
    pub temperature: ChannelAnalysis,
    pub light: ChannelAnalysis,
    pub soil_moisture: ChannelAnalysis,
    /// Mean score of the channels that have samples.
    pub overall_score: f64,
    pub recommendations: Vec<String>,
}

impl AnalysisResult {
    pub fn channel(&self, channel: Channel) -> &ChannelAnalysis {
        match channel {
            Channel::Humidity => &self.humidity,
            Channel::Temperature => &self.temperature,
            Channel::Light => &self.light,
            Channel::SoilMoisture => &self.soil_moisture,
        }
    }
}

pub fn analyze(samples: &[SensorSample], crop: &CropProfile) -> Result<AnalysisResult, EngineError> {
    if samples.is_empty() {
        return Err(EngineError::NoData);
    }

    let evaluate = |ch: Channel| ChannelAnalysis::evaluate(&channel_values(samples, ch), crop.band(ch));
    let mut result = AnalysisResult {
        data_count: samples.len(),
        humidity: evaluate(Channel::Humidity),
        temperature: evaluate(Channel::Temperature),
        light: evaluate(Channel::Light),
        soil_moisture: evaluate(Channel::SoilMoisture),
        overall_score: 0.0,
        recommendations: Vec::new(),
    };

    let scores: Vec<f64> = Channel::ALL
        .iter()
        .map(|ch| result.channel(*ch))
        .filter(|a| a.has_data())
        .map(|a| a.optimal_score)
        .collect();
    if !scores.is_empty() {
        result.overall_score = scores.iter().sum::<f64>() / scores.len() as f64;
    }

    result.recommendations = recommendations(&result, crop);
    tracing::debug!(
        crop = %crop.name,
        samples = samples.len(),
        overall = result.overall_score,
        "analysis complete"
    );
    Ok(result)
}

fn recommendations(result: &AnalysisResult, crop: &CropProfile) -> Vec<String> {
    let mut lines = Vec::new();

    for ch in Channel::ALL {
        let analysis = result.channel(ch);
        if !analysis.has_data() {
            continue;
        }
        let band = crop.band(ch);
        let avg = analysis.summary.average;
        if avg < band.optimal_min {
            lines.push(format!(
                "{} averages {avg:.1}{} which is low; adjust towards the {} optimum of {}.",
                band.display_name,
                band.unit,
                crop.name,
                band.optimal_range_label()
            ));
        } else if avg > band.optimal_max {
            lines.push(format!(
                "{} averages {avg:.1}{} which is high; adjust towards the {} optimum of {}.",
                band.display_name,
                band.unit,
                crop.name,
                band.optimal_range_label()
            ));
        }
    }

    let score = result.overall_score;
    let headline = if score >= 0.9 {
        Some(format!("Conditions are excellent for {}; keep the current settings.", crop.name))
    } else if score >= 0.7 {
        Some(format!("Conditions are good for {}.", crop.name))
    } else if score < 0.5 {
        Some(format!(
            "Conditions are unsuitable for {}; address the items below.",
            crop.name
        ))
    } else {
        None
    };
    if let Some(headline) = headline {
        lines.insert(0, headline);
    }

    if lines.is_empty() {
        lines.push("Analysis in progress.".to_string());
    }
    lines
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::{ThresholdProvider, ThresholdRegistry};
    use time::macros::datetime;

    fn band(omin: f64, omax: f64, amin: f64, amax: f64, cmin: f64, cmax: f64) -> ThresholdBand {
        ThresholdBand {
            optimal_min: omin,
            optimal_max: omax,
            acceptable_min: amin,
            acceptable_max: amax,
            critical_min: cmin,
            critical_max: cmax,
            unit: "%".into(),
            display_name: "Humidity".into(),
        }
    }

    fn humidity_band() -> ThresholdBand {
        band(50.0, 70.0, 30.0, 80.0, 20.0, 90.0)
    }

    fn default_crop() -> CropProfile {
        ThresholdRegistry::builtin().default_profile().as_ref().clone()
    }

    // -- summarize ----------------------------------------------------------

    #[test]
    fn summarize_empty_is_zeroed() {
        assert_eq!(summarize(&[]), Summary::default());
    }

    #[test]
    fn summarize_uses_population_std_and_median() {
        let s = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(s.count, 8);
        assert_eq!(s.average, 5.0);
        assert_eq!(s.std, 2.0);
        assert_eq!(s.median, 4.5);
        assert_eq!((s.min, s.max), (2.0, 9.0));
    }

    #[test]
    fn summarize_odd_median() {
        assert_eq!(summarize(&[3.0, 1.0, 2.0]).median, 2.0);
    }

    // -- optimal_score / status --------------------------------------------

    #[test]
    fn inside_optimal_scores_one() {
        let b = humidity_band();
        for v in [50.0, 55.5, 60.0, 70.0] {
            assert_eq!(optimal_score(v, &b), 1.0);
            assert_eq!(status(v, &b), Status::Optimal);
        }
    }

    #[test]
    fn score_bounds_per_tier() {
        let b = humidity_band();
        for v in [30.0, 40.0, 49.9, 70.1, 75.0, 80.0] {
            let s = optimal_score(v, &b);
            assert!((0.6..1.0).contains(&s), "{v} scored {s}");
        }
        for v in [-10.0, 0.0, 29.9, 80.1, 95.0, 200.0] {
            let s = optimal_score(v, &b);
            assert!((0.2..0.6).contains(&s), "{v} scored {s}");
        }
    }

    #[test]
    fn score_non_increasing_with_distance() {
        let b = humidity_band();
        let mut prev = 1.0;
        for i in 0..200 {
            let s = optimal_score(70.0 + i as f64 * 0.5, &b);
            assert!(s <= prev);
            prev = s;
        }
        let mut prev = 1.0;
        for i in 0..200 {
            let s = optimal_score(50.0 - i as f64 * 0.5, &b);
            assert!(s <= prev);
            prev = s;
        }
    }

    #[test]
    fn degenerate_band_scores_half() {
        let b = band(60.0, 60.0, 30.0, 80.0, 20.0, 90.0);
        assert_eq!(optimal_score(60.0, &b), 0.5);
    }

    #[test]
    fn acceptable_score_formula() {
        // 5 below optimum over a 20-wide band: 1 - 0.25 * 0.4
        assert!((optimal_score(45.0, &humidity_band()) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn status_tiers() {
        let b = humidity_band();
        assert_eq!(status(75.0, &b), Status::Acceptable);
        assert_eq!(status(85.0, &b), Status::Warning);
        assert_eq!(status(25.0, &b), Status::Warning);
        assert_eq!(status(95.0, &b), Status::Critical);
        assert_eq!(status(10.0, &b), Status::Critical);
    }

    #[test]
    fn average_round_trips_through_single_sample() {
        let b = humidity_band();
        let values = [33.0, 41.0, 47.5, 88.0, 12.0];
        let direct = ChannelAnalysis::evaluate(&values, &b);
        let again = ChannelAnalysis::evaluate(&[direct.summary.average], &b);
        assert_eq!(direct.status, again.status);
        assert_eq!(direct.optimal_score, again.optimal_score);
    }

    // -- analyze ------------------------------------------------------------

    #[test]
    fn analyze_empty_is_no_data() {
        assert!(matches!(analyze(&[], &default_crop()), Err(EngineError::NoData)));
    }

    #[test]
    fn overall_score_ignores_channels_without_samples() {
        let crop = default_crop();
        let t = datetime!(2024-05-01 12:00 UTC);
        let samples = vec![
            SensorSample::new(1, t).with(Channel::Humidity, 60.0),
            SensorSample::new(1, t).with(Channel::Humidity, 62.0),
        ];
        let r = analyze(&samples, &crop).unwrap();
        assert_eq!(r.overall_score, 1.0);
        assert_eq!(r.temperature.status, Status::NoData);
        assert_eq!(r.temperature.optimal_score, 0.0);
        assert_eq!(r.temperature.optimal_range, "18-25℃");
        assert!(r.recommendations[0].contains("excellent"));
    }

    #[test]
    fn low_channel_gets_advice_line() {
        let crop = default_crop();
        let t = datetime!(2024-05-01 12:00 UTC);
        let samples = vec![SensorSample::new(1, t)
            .with(Channel::Humidity, 10.0)
            .with(Channel::Temperature, 2.0)];
        let r = analyze(&samples, &crop).unwrap();
        assert!(r.overall_score < 0.5);
        assert!(r.recommendations[0].contains("unsuitable"));
        assert!(r.recommendations.iter().any(|l| l.starts_with("Humidity averages 10.0%")));
        assert!(r.recommendations.iter().any(|l| l.starts_with("Temperature averages 2.0℃")));
    }

    #[test]
    fn middling_score_without_deviations_gets_placeholder() {
        let reg = ThresholdRegistry::builtin();
        let crop = reg.resolve("tomato").unwrap().profile;
        let mut result = analyze(
            &[SensorSample::new(1, datetime!(2024-05-01 12:00 UTC)).with(Channel::Light, 80.0)],
            &crop,
        )
        .unwrap();
        result.overall_score = 0.6;
        assert_eq!(recommendations(&result, &crop), vec!["Analysis in progress.".to_string()]);
    }
}
