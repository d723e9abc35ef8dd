//! Daily aggregation, environment scoring and the fixed yield model.

use serde::Serialize;
use std::collections::BTreeMap;
use time::Date;

use crate::channel::Channel;
use crate::error::EngineError;
use crate::sample::SensorSample;
use crate::thresholds::{CropProfile, ThresholdBand};

/// Plants assumed per farm.
pub const UNIT_COUNT: f64 = 100.0;
/// Number of trailing days in the rolling environment score.
pub const ROLLING_WINDOW: usize = 7;
pub const MIN_DAYS: usize = 2;
pub const YIELD_UNIT: &str = "kg";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAggregate {
    pub date: Date,
    pub humidity: Option<f64>,
    pub temperature: Option<f64>,
    pub light: Option<f64>,
    pub soil_moisture: Option<f64>,
}

impl DailyAggregate {
    pub fn value(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Humidity => self.humidity,
            Channel::Temperature => self.temperature,
            Channel::Light => self.light,
            Channel::SoilMoisture => self.soil_moisture,
        }
    }
}

/// Per-day channel means, ascending by date. Channels absent on a day stay
/// `None` for that day.
pub fn aggregate_daily(samples: &[SensorSample]) -> Vec<DailyAggregate> {
    let mut days: BTreeMap<Date, [(f64, usize); 4]> = BTreeMap::new();
    for sample in samples {
        let sums = days.entry(sample.timestamp.date()).or_insert([(0.0, 0); 4]);
        for (slot, ch) in sums.iter_mut().zip(Channel::ALL) {
            if let Some(v) = sample.value(ch).filter(|v| v.is_finite()) {
                slot.0 += v;
                slot.1 += 1;
            }
        }
    }

    days.into_iter()
        .map(|(date, sums)| {
            let mean = |(sum, n): (f64, usize)| (n > 0).then(|| sum / n as f64);
            DailyAggregate {
                date,
                humidity: mean(sums[0]),
                temperature: mean(sums[1]),
                light: mean(sums[2]),
                soil_moisture: mean(sums[3]),
            }
        })
        .collect()
}

/// 1.0 inside the optimal band, else linear decay to a 0.3 floor.
pub fn channel_day_score(value: f64, band: &ThresholdBand) -> f64 {
    if band.in_optimal(value) {
        return 1.0;
    }
    let width = band.optimal_width();
    if width <= 0.0 {
        return 0.5;
    }
    let distance = if value < band.optimal_min {
        band.optimal_min - value
    } else {
        value - band.optimal_max
    };
    (1.0 - distance / width * 0.7).max(0.3)
}

pub fn day_score(day: &DailyAggregate, crop: &CropProfile) -> f64 {
    let scores: Vec<f64> = Channel::ALL
        .iter()
        .filter_map(|ch| day.value(*ch).map(|v| channel_day_score(v, crop.band(*ch))))
        .collect();
    if scores.is_empty() {
        0.5
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

/// Mean of the last `ROLLING_WINDOW` day scores.
pub fn rolling_score(days: &[DailyAggregate], crop: &CropProfile) -> f64 {
    let recent = &days[days.len().saturating_sub(ROLLING_WINDOW)..];
    if recent.is_empty() {
        return 0.5;
    }
    recent.iter().map(|d| day_score(d, crop)).sum::<f64>() / recent.len() as f64
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub predicted_production: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub unit: &'static str,
    pub confidence: f64,
    pub environment_score: f64,
    pub base_production: f64,
    pub production_multiplier: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductionEstimate {
    pub horizon_days: u32,
    pub days_observed: usize,
    pub prediction: Prediction,
    pub recommendations: Vec<String>,
}

pub fn yield_model(score: f64, base_yield_per_unit: f64, horizon_days: u32) -> Prediction {
    let multiplier = 0.6 + score * 0.6;
    let base = base_yield_per_unit * UNIT_COUNT;
    let predicted = base * multiplier / 365.0 * f64::from(horizon_days);
    let confidence = 0.7 + score * 0.2;
    let half = predicted * (1.0 - confidence);

    Prediction {
        predicted_production: predicted,
        lower_bound: (predicted - half).max(0.0),
        upper_bound: predicted + half,
        unit: YIELD_UNIT,
        confidence,
        environment_score: score,
        base_production: base,
        production_multiplier: multiplier,
    }
}

pub fn estimate(
    samples: &[SensorSample],
    crop: &CropProfile,
    horizon_days: u32,
) -> Result<ProductionEstimate, EngineError> {
    if samples.is_empty() {
        return Err(EngineError::NoData);
    }

    let days = aggregate_daily(samples);
    if days.len() < MIN_DAYS {
        return Err(EngineError::InsufficientSamples {
            what: "production estimate (days)",
            needed: MIN_DAYS,
            got: days.len(),
        });
    }

    let score = rolling_score(&days, crop);
    let prediction = yield_model(score, crop.base_yield_per_unit, horizon_days);
    tracing::debug!(
        crop = %crop.name,
        days = days.len(),
        score,
        predicted = prediction.predicted_production,
        "production estimated"
    );

    Ok(ProductionEstimate {
        horizon_days,
        days_observed: days.len(),
        recommendations: recommendations(score, days.last(), crop),
        prediction,
    })
}

fn recommendations(score: f64, latest: Option<&DailyAggregate>, crop: &CropProfile) -> Vec<String> {
    let name = &crop.name;
    let mut lines = vec![if score < 0.6 {
        format!("Environment score is low; {name} yield may fall short of expectations.")
    } else if score >= 0.9 {
        format!("Environment is excellent; holding it will maximise {name} quality and yield.")
    } else if score >= 0.7 {
        "Environment is good; small adjustments could raise yield further.".to_string()
    } else {
        format!("Improving the environment could increase {name} yield.")
    }];

    if let Some(day) = latest {
        for ch in Channel::ALL {
            let band = crop.band(ch);
            if let Some(v) = day.value(ch).filter(|v| !band.in_optimal(*v)) {
                lines.push(format!(
                    "Bringing {} ({v:.1}{}) into {} would help {name} yield.",
                    band.display_name.to_lowercase(),
                    band.unit,
                    band.optimal_range_label()
                ));
            }
        }
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
    use time::macros::{date, datetime};
    use time::Duration;

    fn default_crop() -> CropProfile {
        ThresholdRegistry::builtin().default_profile().as_ref().clone()
    }

    fn temperature_days(values: &[f64]) -> Vec<SensorSample> {
        let start = datetime!(2024-05-01 09:00 UTC);
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                SensorSample::new(1, start + Duration::days(i as i64)).with(Channel::Temperature, *v)
            })
            .collect()
    }

    #[test]
    fn aggregates_by_calendar_date() {
        let samples = vec![
            SensorSample::new(1, datetime!(2024-05-02 23:00 UTC)).with(Channel::Humidity, 60.0),
            SensorSample::new(1, datetime!(2024-05-01 08:00 UTC)).with(Channel::Humidity, 40.0),
            SensorSample::new(1, datetime!(2024-05-01 20:00 UTC))
                .with(Channel::Humidity, 50.0)
                .with(Channel::Light, 70.0),
        ];
        let days = aggregate_daily(&samples);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, date!(2024-05-01));
        assert_eq!(days[0].humidity, Some(45.0));
        assert_eq!(days[0].light, Some(70.0));
        assert_eq!(days[1].light, None);
        assert_eq!(days[1].humidity, Some(60.0));
    }

    #[test]
    fn four_day_temperature_scores() {
        let crop = default_crop();
        let days = aggregate_daily(&temperature_days(&[18.0, 22.0, 26.0, 30.0]));
        let scores: Vec<f64> = days.iter().map(|d| day_score(d, &crop)).collect();
        assert_eq!(scores[0], 1.0);
        assert_eq!(scores[1], 1.0);
        assert!(scores[2] < 1.0);
        assert!(scores[3] < 1.0);
        let rolling = rolling_score(&days, &crop);
        assert!(rolling > 0.5 && rolling < 1.0, "rolling {rolling}");
    }

    #[test]
    fn rolling_uses_last_seven_days() {
        let crop = default_crop();
        // Three terrible days followed by seven optimal ones.
        let mut temps = vec![-10.0; 3];
        temps.extend([20.0; 7]);
        let days = aggregate_daily(&temperature_days(&temps));
        assert_eq!(days.len(), 10);
        assert_eq!(rolling_score(&days, &crop), 1.0);
    }

    #[test]
    fn day_without_channels_scores_half() {
        let day = DailyAggregate {
            date: date!(2024-05-01),
            humidity: None,
            temperature: None,
            light: None,
            soil_moisture: None,
        };
        assert_eq!(day_score(&day, &default_crop()), 0.5);
    }

    #[test]
    fn channel_day_score_floor() {
        let band = default_crop().temperature;
        assert_eq!(channel_day_score(-10.0, &band), 0.3);
    }

    #[test]
    fn yield_model_perfect_score() {
        let p = yield_model(1.0, 10.0, 365);
        assert_eq!(p.base_production, 1000.0);
        assert!((p.production_multiplier - 1.2).abs() < 1e-12);
        assert!((p.predicted_production - 1200.0).abs() < 1e-9);
        assert!((p.confidence - 0.9).abs() < 1e-12);
        assert!((p.lower_bound - 1080.0).abs() < 1e-9);
        assert!((p.upper_bound - 1320.0).abs() < 1e-9);
        assert_eq!(p.unit, "kg");
    }

    #[test]
    fn single_day_is_insufficient() {
        let err = estimate(&temperature_days(&[20.0]), &default_crop(), 7).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientSamples { needed: 2, got: 1, .. }));
    }

    #[test]
    fn estimate_reports_latest_day_deviation() {
        let reg = ThresholdRegistry::builtin();
        let crop = reg.resolve("tomato").unwrap().profile;
        let est = estimate(&temperature_days(&[22.0, 32.0]), &crop, 7).unwrap();
        assert_eq!(est.days_observed, 2);
        assert_eq!(est.horizon_days, 7);
        assert_eq!(est.recommendations.len(), 2);
        assert!(est.recommendations[1].contains("temperature (32.0℃) into 20-25℃"));
        assert!(est.prediction.lower_bound <= est.prediction.predicted_production);
    }
}
