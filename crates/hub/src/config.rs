//! TOML config file loading, validation, and crop registration.

use anyhow::{bail, Context, Result};
use greenhouse_engine::{Channel, CropProfile, ThresholdBand, ThresholdRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Longest history window the analysis endpoints accept.
pub const MAX_PERIOD_DAYS: u32 = 3650;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub control: ControlSettings,
    #[serde(default)]
    pub farms: Vec<FarmEntry>,
    #[serde(default)]
    pub crops: Vec<CropEntry>,
}

/// `auto` publishes actuator commands; `monitor` only records what it would
/// have sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Auto,
    #[default]
    Monitor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlSettings {
    #[serde(default)]
    pub mode: OperationMode,
    #[serde(default = "default_tick_sec")]
    pub tick_sec: u64,
    #[serde(default = "default_stale_timeout_sec")]
    pub stale_timeout_sec: i64,
    #[serde(default = "default_threshold_std")]
    pub threshold_std: f64,
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
    /// History window for analysis endpoints when the request gives none.
    #[serde(default = "default_period_days")]
    pub period_days: u32,
}

fn default_tick_sec() -> u64 {
    30
}

fn default_stale_timeout_sec() -> i64 {
    300
}

fn default_threshold_std() -> f64 {
    greenhouse_engine::anomaly::DEFAULT_THRESHOLD_STD
}

fn default_horizon_days() -> u32 {
    7
}

fn default_period_days() -> u32 {
    7
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            mode: OperationMode::default(),
            tick_sec: default_tick_sec(),
            stale_timeout_sec: default_stale_timeout_sec(),
            threshold_std: default_threshold_std(),
            horizon_days: default_horizon_days(),
            period_days: default_period_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmEntry {
    pub farm_id: u32,
    pub name: String,
    /// Empty means the default profile.
    #[serde(default)]
    pub crop: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CropEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub base_yield_per_unit: f64,
    pub humidity: BandEntry,
    pub temperature: BandEntry,
    pub light: BandEntry,
    pub soil_moisture: BandEntry,
}

/// `[min, max]` pairs, e.g. `{ optimal = [50.0, 70.0], ... }`.
#[derive(Debug, Clone, Deserialize)]
pub struct BandEntry {
    pub optimal: [f64; 2],
    pub acceptable: [f64; 2],
    pub critical: [f64; 2],
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl BandEntry {
    pub fn to_band(&self, channel: Channel) -> ThresholdBand {
        ThresholdBand {
            optimal_min: self.optimal[0],
            optimal_max: self.optimal[1],
            acceptable_min: self.acceptable[0],
            acceptable_max: self.acceptable[1],
            critical_min: self.critical[0],
            critical_max: self.critical[1],
            unit: self
                .unit
                .clone()
                .unwrap_or_else(|| channel.default_unit().to_string()),
            display_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| channel.label().to_string()),
        }
    }
}

impl CropEntry {
    fn band_entry(&self, channel: Channel) -> &BandEntry {
        match channel {
            Channel::Humidity => &self.humidity,
            Channel::Temperature => &self.temperature,
            Channel::Light => &self.light,
            Channel::SoilMoisture => &self.soil_moisture,
        }
    }

    pub fn to_profile(&self) -> CropProfile {
        CropProfile {
            name: self.name.trim().to_string(),
            description: self.description.clone(),
            base_yield_per_unit: self.base_yield_per_unit,
            humidity: self.humidity.to_band(Channel::Humidity),
            temperature: self.temperature.to_band(Channel::Temperature),
            light: self.light.to_band(Channel::Light),
            soil_moisture: self.soil_moisture.to_band(Channel::SoilMoisture),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_control(&mut errors);
        self.validate_farms(&mut errors);
        self.validate_crops(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_control(&self, errors: &mut Vec<String>) {
        let c = &self.control;
        if c.tick_sec == 0 {
            errors.push("control: tick_sec must be positive".to_string());
        }
        if c.stale_timeout_sec <= 0 {
            errors.push(format!(
                "control: stale_timeout_sec must be positive, got {}",
                c.stale_timeout_sec
            ));
        }
        if !(c.threshold_std.is_finite() && c.threshold_std > 0.0) {
            errors.push(format!(
                "control: threshold_std must be positive, got {}",
                c.threshold_std
            ));
        }
        if c.horizon_days == 0 {
            errors.push("control: horizon_days must be positive".to_string());
        }
        if c.period_days == 0 {
            errors.push("control: period_days must be positive".to_string());
        } else if c.period_days > MAX_PERIOD_DAYS {
            errors.push(format!(
                "control: period_days must be at most {MAX_PERIOD_DAYS}, got {}",
                c.period_days
            ));
        }
    }

    fn validate_farms(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<u32> = HashSet::new();

        for f in &self.farms {
            let ctx = format!("farm {}", f.farm_id);

            if !seen_ids.insert(f.farm_id) {
                errors.push(format!("{ctx}: duplicate farm_id"));
            }
            if f.name.trim().is_empty() {
                errors.push(format!("{ctx}: name is empty"));
            }
        }
    }

    fn validate_crops(&self, errors: &mut Vec<String>) {
        let mut seen_names: HashSet<String> = HashSet::new();

        for (i, c) in self.crops.iter().enumerate() {
            let ctx = || {
                if c.name.trim().is_empty() {
                    format!("crops[{i}]")
                } else {
                    format!("crop '{}'", c.name)
                }
            };

            // ── Identity ────────────────────────────────────────
            if c.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            } else if !seen_names.insert(c.name.trim().to_lowercase()) {
                errors.push(format!("{}: duplicate crop name", ctx()));
            }

            // ── Yield model ─────────────────────────────────────
            if !(c.base_yield_per_unit.is_finite() && c.base_yield_per_unit >= 0.0) {
                errors.push(format!(
                    "{}: base_yield_per_unit must be non-negative, got {}",
                    ctx(),
                    c.base_yield_per_unit
                ));
            }

            // ── Bands ───────────────────────────────────────────
            for ch in Channel::ALL {
                let band = c.band_entry(ch).to_band(ch);
                if band.optimal_min >= band.optimal_max {
                    errors.push(format!(
                        "{}: {ch} optimal range [{}, {}] is empty",
                        ctx(),
                        band.optimal_min,
                        band.optimal_max
                    ));
                } else if !band.is_ordered() {
                    errors.push(format!(
                        "{}: {ch} bands must nest critical ⊇ acceptable ⊇ optimal",
                        ctx()
                    ));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Register the config's crop profiles on top of the built-in table.
pub fn apply(config: &Config, registry: &ThresholdRegistry) -> Result<()> {
    for c in &config.crops {
        registry
            .register(c.to_profile())
            .with_context(|| format!("failed to register crop '{}'", c.name))?;
    }

    tracing::info!(
        farms = config.farms.len(),
        crops = config.crops.len(),
        mode = ?config.control.mode,
        "config applied"
    );

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
