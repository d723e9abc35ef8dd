use greenhouse_engine::{ControlCommand, Evaluator, SensorSample, ThresholdRegistry};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::config::{ControlSettings, FarmEntry, OperationMode};
use crate::history::SampleHistory;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type aliases
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;
pub type SharedHistory = Arc<RwLock<SampleHistory>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub mode: OperationMode,
    pub mqtt_connected: bool,
    pub farms: BTreeMap<u32, FarmState>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct FarmState {
    pub name: String,
    pub crop: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
    pub latest: Option<SensorSample>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_control: Option<OffsetDateTime>,
    pub last_commands: Vec<ControlCommand>,
}

impl FarmState {
    fn unnamed(farm_id: u32) -> Self {
        Self {
            name: format!("farm {farm_id}"),
            crop: String::new(),
            last_seen: None,
            latest: None,
            last_control: None,
            last_commands: Vec::new(),
        }
    }
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Command,
    Control,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mode: OperationMode,
    pub mqtt_connected: bool,
    pub farms: BTreeMap<u32, FarmState>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(farms: &[FarmEntry], mode: OperationMode) -> Self {
        let farms = farms
            .iter()
            .map(|f| {
                (
                    f.farm_id,
                    FarmState {
                        name: f.name.clone(),
                        crop: f.crop.clone(),
                        ..FarmState::unnamed(f.farm_id)
                    },
                )
            })
            .collect();

        Self {
            started_at: Instant::now(),
            mode,
            mqtt_connected: false,
            farms,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Crop name configured for a farm; empty for unknown farms.
    pub fn crop_for(&self, farm_id: u32) -> String {
        self.farms
            .get(&farm_id)
            .map(|f| f.crop.clone())
            .unwrap_or_default()
    }

    /// Record a telemetry sample. Unconfigured farms are tracked on first
    /// sight with the default crop.
    pub fn record_reading(&mut self, sample: &SensorSample) {
        let farm = self
            .farms
            .entry(sample.farm_id)
            .or_insert_with(|| FarmState::unnamed(sample.farm_id));
        farm.last_seen = Some(OffsetDateTime::now_utc());
        farm.latest = Some(sample.clone());

        let values: Vec<String> = greenhouse_engine::Channel::ALL
            .iter()
            .filter_map(|ch| sample.value(*ch).map(|v| format!("{ch}={v:.1}")))
            .collect();
        self.push_event(
            EventKind::Reading,
            format!("farm {}: {}", sample.farm_id, values.join(", ")),
        );
    }

    /// Record the commands of one control evaluation.
    pub fn record_commands(&mut self, farm_id: u32, commands: &[ControlCommand], published: bool) {
        let farm = self
            .farms
            .entry(farm_id)
            .or_insert_with(|| FarmState::unnamed(farm_id));
        farm.last_control = Some(OffsetDateTime::now_utc());
        farm.last_commands = commands.to_vec();

        let verb = if published { "sent" } else { "suggested" };
        for c in commands {
            self.push_event(
                EventKind::Command,
                format!(
                    "farm {farm_id}: {verb} {} {:?} {} (current {:.1}, target {:.1})",
                    c.device, c.action, c.magnitude, c.current_value, c.target_value
                ),
            );
        }
    }

    /// Record a control-loop event (start-up, alerts, skips).
    pub fn record_control(&mut self, detail: String) {
        self.push_event(EventKind::Control, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mode: self.mode,
            mqtt_connected: self.mqtt_connected,
            farms: self.farms.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ---------------------------------------------------------------------------
// Handles shared by the web server, MQTT loop and controller
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub history: SharedHistory,
    pub registry: Arc<ThresholdRegistry>,
    pub evaluator: Evaluator,
    pub settings: Arc<ControlSettings>,
}

impl AppState {
    pub fn new(
        shared: SharedState,
        history: SampleHistory,
        registry: Arc<ThresholdRegistry>,
        evaluator: Evaluator,
        settings: ControlSettings,
    ) -> Self {
        Self {
            shared,
            history: Arc::new(RwLock::new(history)),
            registry,
            evaluator,
            settings: Arc::new(settings),
        }
    }

    /// Store a sample in history and surface it in the status view.
    pub async fn ingest(&self, sample: SensorSample) {
        self.shared.write().await.record_reading(&sample);
        let farm_id = sample.farm_id;
        let mut history = self.history.write().await;
        history.push(sample);
        tracing::debug!(farm = farm_id, stored = history.len(farm_id), "sample stored");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
