//! Crop threshold bands and the copy-on-write crop registry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::channel::Channel;
use crate::error::RegistryError;

/// Name of the fallback profile used for unknown crops.
pub const DEFAULT_CROP: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub optimal_min: f64,
    pub optimal_max: f64,
    pub acceptable_min: f64,
    pub acceptable_max: f64,
    pub critical_min: f64,
    pub critical_max: f64,
    pub unit: String,
    pub display_name: String,
}

impl ThresholdBand {
    pub fn in_optimal(&self, v: f64) -> bool {
        self.optimal_min <= v && v <= self.optimal_max
    }

    pub fn in_acceptable(&self, v: f64) -> bool {
        self.acceptable_min <= v && v <= self.acceptable_max
    }

    pub fn in_critical(&self, v: f64) -> bool {
        self.critical_min <= v && v <= self.critical_max
    }

    pub fn optimal_width(&self) -> f64 {
        self.optimal_max - self.optimal_min
    }

    pub fn optimal_midpoint(&self) -> f64 {
        (self.optimal_min + self.optimal_max) / 2.0
    }

    /// e.g. `"50-70%"`
    pub fn optimal_range_label(&self) -> String {
        format!("{}-{}{}", self.optimal_min, self.optimal_max, self.unit)
    }

    /// `critical_min <= acceptable_min <= optimal_min <= optimal_max <=
    /// acceptable_max <= critical_max`. The engine never checks this; config
    /// loaders do.
    pub fn is_ordered(&self) -> bool {
        self.critical_min <= self.acceptable_min
            && self.acceptable_min <= self.optimal_min
            && self.optimal_min <= self.optimal_max
            && self.optimal_max <= self.acceptable_max
            && self.acceptable_max <= self.critical_max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropProfile {
    pub name: String,
    pub description: String,
    /// Yearly yield per plant (kg).
    pub base_yield_per_unit: f64,
    pub humidity: ThresholdBand,
    pub temperature: ThresholdBand,
    pub light: ThresholdBand,
    pub soil_moisture: ThresholdBand,
}

impl CropProfile {
    pub fn band(&self, channel: Channel) -> &ThresholdBand {
        match channel {
            Channel::Humidity => &self.humidity,
            Channel::Temperature => &self.temperature,
            Channel::Light => &self.light,
            Channel::SoilMoisture => &self.soil_moisture,
        }
    }
}

/// Outcome of a crop lookup. `known == false` means the default profile was
/// substituted and callers should surface a warning.
#[derive(Debug, Clone)]
pub struct ResolvedCrop {
    pub requested: String,
    pub profile: Arc<CropProfile>,
    pub known: bool,
}

impl ResolvedCrop {
    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn warning(&self) -> Option<String> {
        if self.known || self.requested.trim().is_empty() {
            return None;
        }
        Some(format!(
            "no thresholds for crop '{}'; using default conditions",
            self.requested.trim()
        ))
    }
}

/// Source of crop thresholds.
pub trait ThresholdProvider: Send + Sync {
    fn resolve(&self, crop: &str) -> Result<ResolvedCrop, RegistryError>;

    fn band(&self, crop: &str, channel: Channel) -> Result<(ThresholdBand, bool), RegistryError> {
        let resolved = self.resolve(crop)?;
        Ok((resolved.profile.band(channel).clone(), resolved.known))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type CropMap = BTreeMap<String, Arc<CropProfile>>;

/// Registry key for a crop name.
fn crop_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Append-only crop registry. Registration clones the map, inserts, and
/// swaps the `Arc`, so readers always see a complete map.
pub struct ThresholdRegistry {
    default: Arc<CropProfile>,
    crops: RwLock<Arc<CropMap>>,
}

impl ThresholdRegistry {
    pub fn new(default: CropProfile, crops: impl IntoIterator<Item = CropProfile>) -> Self {
        let map: CropMap = crops
            .into_iter()
            .map(|c| (crop_key(&c.name), Arc::new(c)))
            .collect();
        Self {
            default: Arc::new(default),
            crops: RwLock::new(Arc::new(map)),
        }
    }

    /// Registry seeded with the built-in crop table.
    pub fn builtin() -> Self {
        Self::new(builtin::default_profile(), builtin::profiles())
    }

    pub fn default_profile(&self) -> Arc<CropProfile> {
        Arc::clone(&self.default)
    }

    fn snapshot(&self) -> Result<Arc<CropMap>, RegistryError> {
        self.crops
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| RegistryError::Unavailable)
    }

    pub fn register(&self, profile: CropProfile) -> Result<(), RegistryError> {
        let key = crop_key(&profile.name);
        if key.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if key == DEFAULT_CROP {
            return Err(RegistryError::Duplicate(profile.name));
        }

        let mut guard = self.crops.write().map_err(|_| RegistryError::Unavailable)?;
        if guard.contains_key(&key) {
            return Err(RegistryError::Duplicate(profile.name));
        }
        let mut next = CropMap::clone(&guard);
        tracing::info!(crop = %profile.name, "crop registered");
        next.insert(key, Arc::new(profile));
        *guard = Arc::new(next);
        Ok(())
    }

    /// Registered crop profiles, sorted by name. The default is not listed.
    pub fn list(&self) -> Result<Vec<Arc<CropProfile>>, RegistryError> {
        Ok(self.snapshot()?.values().cloned().collect())
    }
}

impl ThresholdProvider for ThresholdRegistry {
    /// Exact (case-insensitive) match first, then a built-in alias, then
    /// substring match in either direction, then the default profile.
    fn resolve(&self, crop: &str) -> Result<ResolvedCrop, RegistryError> {
        let requested = crop.to_string();
        let key = crop_key(crop);
        let fallback = || ResolvedCrop {
            requested: requested.clone(),
            profile: self.default_profile(),
            known: false,
        };

        let alias = builtin::canonical_name(&key);
        if key.is_empty() || key == DEFAULT_CROP || alias == Some(DEFAULT_CROP) {
            return Ok(fallback());
        }

        let crops = self.snapshot()?;
        let exact = crops
            .get(&key)
            .or_else(|| alias.and_then(|name| crops.get(name)));
        if let Some(profile) = exact {
            return Ok(ResolvedCrop {
                requested,
                profile: Arc::clone(profile),
                known: true,
            });
        }

        let partial = crops
            .iter()
            .find(|(name, _)| key.contains(name.as_str()) || name.contains(key.as_str()));
        match partial {
            Some((_, profile)) => Ok(ResolvedCrop {
                requested,
                profile: Arc::clone(profile),
                known: true,
            }),
            None => {
                tracing::debug!(crop = %crop, "unknown crop, falling back to defaults");
                Ok(fallback())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in crop table
// ---------------------------------------------------------------------------

mod builtin {
    use super::{CropProfile, ThresholdBand, DEFAULT_CROP};
    use crate::channel::Channel;

    type Limits = [f64; 6];

    /// Korean crop names used by existing field installations.
    pub(super) const ALIASES: &[(&str, &str)] = &[
        ("사과", "apple"),
        ("토마토", "tomato"),
        ("상추", "lettuce"),
        ("딸기", "strawberry"),
        ("오이", "cucumber"),
        ("고추", "chili pepper"),
        ("배추", "napa cabbage"),
        ("시금치", "spinach"),
        ("파프리카", "bell pepper"),
        ("가지", "eggplant"),
        ("무", "radish"),
        ("브로콜리", "broccoli"),
        ("기본", DEFAULT_CROP),
    ];

    /// Exact alias lookup; `key` is already trimmed and lowercased.
    pub(super) fn canonical_name(key: &str) -> Option<&'static str> {
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, name)| *name)
    }

    fn band(channel: Channel, l: Limits) -> ThresholdBand {
        ThresholdBand {
            optimal_min: l[0],
            optimal_max: l[1],
            acceptable_min: l[2],
            acceptable_max: l[3],
            critical_min: l[4],
            critical_max: l[5],
            unit: channel.default_unit().to_string(),
            display_name: channel.label().to_string(),
        }
    }

    /// Limits are `[opt_min, opt_max, acc_min, acc_max, crit_min, crit_max]`
    /// for humidity, temperature, light, soil moisture.
    fn crop(name: &str, description: &str, base_yield: f64, limits: [Limits; 4]) -> CropProfile {
        let [h, t, l, s] = limits;
        CropProfile {
            name: name.to_string(),
            description: description.to_string(),
            base_yield_per_unit: base_yield,
            humidity: band(Channel::Humidity, h),
            temperature: band(Channel::Temperature, t),
            light: band(Channel::Light, l),
            soil_moisture: band(Channel::SoilMoisture, s),
        }
    }

    pub(super) fn default_profile() -> CropProfile {
        crop(
            DEFAULT_CROP,
            "General-purpose growing conditions",
            10.0,
            [
                [50.0, 70.0, 30.0, 80.0, 20.0, 90.0],
                [18.0, 25.0, 10.0, 30.0, 5.0, 35.0],
                [60.0, 80.0, 50.0, 85.0, 30.0, 100.0],
                [40.0, 60.0, 30.0, 70.0, 20.0, 80.0],
            ],
        )
    }

    pub(super) fn profiles() -> Vec<CropProfile> {
        vec![
            crop(
                "apple",
                "Apple, growing season: 15-25℃, humidity 60-80%",
                50.0,
                [
                    [60.0, 80.0, 30.0, 80.0, 20.0, 90.0],
                    [15.0, 25.0, 0.0, 35.0, -5.0, 40.0],
                    [60.0, 80.0, 50.0, 80.0, 30.0, 100.0],
                    [40.0, 60.0, 20.0, 60.0, 10.0, 80.0],
                ],
            ),
            crop(
                "tomato",
                "Tomato: 20-25℃, humidity 50-70%",
                10.0,
                [
                    [50.0, 70.0, 40.0, 80.0, 30.0, 90.0],
                    [20.0, 25.0, 15.0, 30.0, 10.0, 35.0],
                    [70.0, 90.0, 60.0, 95.0, 40.0, 100.0],
                    [50.0, 70.0, 40.0, 80.0, 20.0, 90.0],
                ],
            ),
            crop(
                "lettuce",
                "Lettuce: 18-22℃, humidity 60-75%",
                0.5,
                [
                    [60.0, 75.0, 50.0, 80.0, 40.0, 90.0],
                    [18.0, 22.0, 10.0, 25.0, 5.0, 30.0],
                    [60.0, 80.0, 50.0, 85.0, 30.0, 100.0],
                    [50.0, 70.0, 40.0, 80.0, 20.0, 90.0],
                ],
            ),
            crop(
                "strawberry",
                "Strawberry: 18-22℃, humidity 60-75%, light 65-85%",
                2.0,
                [
                    [60.0, 75.0, 50.0, 80.0, 40.0, 90.0],
                    [18.0, 22.0, 10.0, 25.0, 5.0, 30.0],
                    [65.0, 85.0, 55.0, 90.0, 40.0, 100.0],
                    [60.0, 75.0, 50.0, 80.0, 30.0, 90.0],
                ],
            ),
            crop(
                "cucumber",
                "Cucumber: 22-28℃, humidity 70-85%, soil moisture 70-85%",
                15.0,
                [
                    [70.0, 85.0, 60.0, 90.0, 50.0, 95.0],
                    [22.0, 28.0, 18.0, 32.0, 15.0, 35.0],
                    [70.0, 90.0, 60.0, 95.0, 50.0, 100.0],
                    [70.0, 85.0, 60.0, 90.0, 50.0, 95.0],
                ],
            ),
            crop(
                "chili pepper",
                "Chili pepper: 25-30℃, humidity 50-70%, light 75-90%",
                8.0,
                [
                    [50.0, 70.0, 40.0, 80.0, 30.0, 90.0],
                    [25.0, 30.0, 20.0, 32.0, 15.0, 35.0],
                    [75.0, 90.0, 65.0, 95.0, 50.0, 100.0],
                    [60.0, 75.0, 50.0, 80.0, 40.0, 90.0],
                ],
            ),
            crop(
                "napa cabbage",
                "Napa cabbage: 15-20℃, humidity 65-80%, soil moisture 65-80%",
                3.0,
                [
                    [65.0, 80.0, 55.0, 85.0, 45.0, 90.0],
                    [15.0, 20.0, 10.0, 25.0, 5.0, 28.0],
                    [60.0, 75.0, 50.0, 80.0, 40.0, 90.0],
                    [65.0, 80.0, 55.0, 85.0, 45.0, 90.0],
                ],
            ),
            crop(
                "spinach",
                "Spinach: 15-20℃, humidity 60-75%, light 55-70%",
                0.3,
                [
                    [60.0, 75.0, 50.0, 80.0, 40.0, 85.0],
                    [15.0, 20.0, 10.0, 22.0, 5.0, 25.0],
                    [55.0, 70.0, 45.0, 75.0, 35.0, 85.0],
                    [60.0, 75.0, 50.0, 80.0, 40.0, 85.0],
                ],
            ),
            crop(
                "bell pepper",
                "Bell pepper: 23-27℃, humidity 55-70%, light 75-90%",
                12.0,
                [
                    [55.0, 70.0, 45.0, 75.0, 35.0, 85.0],
                    [23.0, 27.0, 20.0, 30.0, 18.0, 32.0],
                    [75.0, 90.0, 65.0, 95.0, 55.0, 100.0],
                    [65.0, 75.0, 55.0, 80.0, 45.0, 85.0],
                ],
            ),
            crop(
                "eggplant",
                "Eggplant: 22-28℃, humidity 60-75%, light 70-85%",
                10.0,
                [
                    [60.0, 75.0, 50.0, 80.0, 40.0, 85.0],
                    [22.0, 28.0, 18.0, 30.0, 15.0, 32.0],
                    [70.0, 85.0, 60.0, 90.0, 50.0, 95.0],
                    [65.0, 80.0, 55.0, 85.0, 45.0, 90.0],
                ],
            ),
            crop(
                "radish",
                "Radish: 18-22℃, humidity 60-75%, soil moisture 70-85%",
                1.5,
                [
                    [60.0, 75.0, 50.0, 80.0, 40.0, 85.0],
                    [18.0, 22.0, 12.0, 25.0, 8.0, 28.0],
                    [60.0, 75.0, 50.0, 80.0, 40.0, 85.0],
                    [70.0, 85.0, 60.0, 90.0, 50.0, 95.0],
                ],
            ),
            crop(
                "broccoli",
                "Broccoli: 16-20℃, humidity 65-80%, light 65-80%",
                1.0,
                [
                    [65.0, 80.0, 55.0, 85.0, 45.0, 90.0],
                    [16.0, 20.0, 12.0, 22.0, 8.0, 25.0],
                    [65.0, 80.0, 55.0, 85.0, 45.0, 90.0],
                    [65.0, 80.0, 55.0, 85.0, 45.0, 90.0],
                ],
            ),
        ]
    }
}

// ===========================================================================
// Tests
// ===========================================================================
