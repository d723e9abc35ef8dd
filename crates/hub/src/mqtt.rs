use anyhow::{bail, Context, Result};
use greenhouse_engine::control::resolve_payload;
use greenhouse_engine::{ControlCommand, CurrentReading, ReadingPayload, SensorSample};
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;

// ---------------------------------------------------------------------------
// Topic helpers
// ---------------------------------------------------------------------------

pub(crate) const TELEMETRY_FILTER: &str = "tele/+/reading";

/// How far a node's `ts` may run ahead of the hub clock.
pub(crate) const MAX_CLOCK_SKEW_SEC: i64 = 300;

/// Extract the farm id from "tele/<farm_id>/reading".
pub(crate) fn extract_farm_id(topic: &str) -> Option<u32> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "tele" && parts[2] == "reading" {
        parts[1].parse().ok()
    } else {
        None
    }
}

/// "actuator/<farm_id>/<device>/set"
pub(crate) fn command_topic(farm_id: u32, device: &str) -> String {
    format!("actuator/{farm_id}/{device}/set")
}

pub(crate) fn command_payload(command: &ControlCommand) -> Result<Vec<u8>> {
    serde_json::to_vec(command).context("failed to encode control command")
}

// ---------------------------------------------------------------------------
// Telemetry payloads
// ---------------------------------------------------------------------------

/// Build a stored sample from a resolved reading. Values are clipped into
/// their channel ranges first.
pub(crate) fn sample_from_reading(
    farm_id: u32,
    timestamp: OffsetDateTime,
    reading: &CurrentReading,
) -> SensorSample {
    let clipped = reading.clipped();
    SensorSample {
        timestamp,
        farm_id,
        humidity: clipped.humidity,
        temperature: clipped.temperature,
        light: clipped.light,
        soil_moisture: clipped.soil_moisture,
    }
}

/// Parse a telemetry body: `{"ts"?: <unix secs>, "sensors": [...]}` or
/// `{"ts"?: <unix secs>, "humidity": .., ...}`. A missing or invalid `ts`,
/// or one more than `MAX_CLOCK_SKEW_SEC` ahead of `now`, falls back to `now`.
pub(crate) fn parse_telemetry(farm_id: u32, body: &[u8], now: OffsetDateTime) -> Result<SensorSample> {
    let value: Value = serde_json::from_slice(body).context("telemetry is not valid JSON")?;
    let payload = ReadingPayload::deserialize(&value).context("unrecognised telemetry shape")?;
    telemetry_sample(farm_id, &value, &payload, now)
}

pub(crate) fn telemetry_sample(
    farm_id: u32,
    value: &Value,
    payload: &ReadingPayload,
    now: OffsetDateTime,
) -> Result<SensorSample> {
    let timestamp = match value
        .get("ts")
        .and_then(Value::as_i64)
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
    {
        Some(ts) if (ts - now).whole_seconds() > MAX_CLOCK_SKEW_SEC => {
            tracing::warn!(farm = farm_id, ts = %ts, "telemetry timestamp is in the future, using receive time");
            now
        }
        Some(ts) => ts,
        None => now,
    };

    let reading = resolve_payload(payload);
    if reading.is_empty() {
        bail!("telemetry for farm {farm_id} carries no recognised channel");
    }
    Ok(sample_from_reading(farm_id, timestamp, &reading))
}

// ===========================================================================
// Tests
// ===========================================================================
