//! Closed-loop controller: on every tick, evaluates each farm's latest fresh
//! sample against its crop bands and publishes the resulting actuator
//! commands to `actuator/<farm_id>/<device>/set`.
//!
//! The engine is stateless, so there is no per-farm state machine here.
//! Oscillation near band edges is handled by the engine's hysteresis margin;
//! the loop only adds the operational guards (fresh data, broker connection,
//! operating mode).

use std::time::Duration;

use greenhouse_engine::CurrentReading;
use rumqttc::{AsyncClient, QoS};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::config::OperationMode;
use crate::mqtt::{command_payload, command_topic, MAX_CLOCK_SKEW_SEC};
use crate::state::AppState;

/// Result of evaluating one farm on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No sample has arrived for the farm yet.
    NoReading,
    /// Latest sample is older than `stale_timeout_sec`, or dated in the
    /// future beyond the allowed clock skew.
    Stale { age_sec: i64 },
    /// Auto mode with the broker down.
    Disconnected,
    /// Crop lookup failed; nothing was decided.
    Failed,
    /// Every channel inside its band plus hysteresis.
    InBand,
    /// Monitor mode: commands recorded but not sent.
    Alerted(usize),
    /// Auto mode: commands published.
    Published(usize),
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run the control loop. Intended to be `tokio::spawn`-ed from main.
pub async fn run(app: AppState, mqtt: AsyncClient) {
    let tick_sec = app.settings.tick_sec;
    let mode = app.settings.mode;

    // Let the first telemetry arrive before deciding on empty history.
    tokio::time::sleep(Duration::from_secs(tick_sec)).await;

    let mut ticker = tokio::time::interval(Duration::from_secs(tick_sec));

    info!(tick_sec, ?mode, "controller started");
    app.shared
        .write()
        .await
        .record_control(format!("controller started (mode: {mode:?}, tick: {tick_sec}s)"));

    loop {
        ticker.tick().await;

        let farm_ids: Vec<u32> = app.shared.read().await.farms.keys().copied().collect();
        for farm_id in farm_ids {
            let outcome = evaluate_farm(farm_id, &app, &mqtt, OffsetDateTime::now_utc()).await;
            tracing::debug!(farm = farm_id, ?outcome, "tick");
        }
    }
}

// ---------------------------------------------------------------------------
// Per-farm evaluation
// ---------------------------------------------------------------------------

pub async fn evaluate_farm(
    farm_id: u32,
    app: &AppState,
    mqtt: &AsyncClient,
    now: OffsetDateTime,
) -> TickOutcome {
    let mode = app.settings.mode;

    // ── Guard: broker connection (auto mode only) ────────────────
    if mode == OperationMode::Auto && !app.shared.read().await.mqtt_connected {
        return TickOutcome::Disconnected;
    }

    // ── Guard: fresh sample (both modes) ─────────────────────────
    let latest = match app.history.read().await.latest(farm_id) {
        Some(s) => s.clone(),
        None => return TickOutcome::NoReading,
    };

    // A sample dated ahead of the hub clock cannot be trusted as current.
    let age_sec = (now - latest.timestamp).whole_seconds();
    if age_sec > app.settings.stale_timeout_sec || age_sec < -MAX_CLOCK_SKEW_SEC {
        warn!(
            farm = farm_id,
            age_sec,
            stale_timeout_sec = app.settings.stale_timeout_sec,
            "controller: stale sensor data, skipping"
        );
        return TickOutcome::Stale { age_sec };
    }

    // ── Decide ───────────────────────────────────────────────────
    let crop = app.shared.read().await.crop_for(farm_id);
    let outcome = app.evaluator.control(&CurrentReading::from(&latest), &crop);

    if !outcome.success {
        let detail = outcome.warning.unwrap_or_else(|| "control evaluation failed".to_string());
        error!(farm = farm_id, crop = %crop, "controller: {detail}");
        app.shared
            .write()
            .await
            .record_error(format!("farm {farm_id}: {detail}"));
        return TickOutcome::Failed;
    }

    if outcome.commands.is_empty() {
        return TickOutcome::InBand;
    }

    // ── Monitor mode: record, do not actuate ─────────────────────
    if mode == OperationMode::Monitor {
        info!(
            farm = farm_id,
            crop = %outcome.crop,
            commands = outcome.commands.len(),
            "controller: out-of-band alert (monitor mode)"
        );
        let mut st = app.shared.write().await;
        st.record_control(format!(
            "farm {farm_id}: {} channel(s) outside the {} band",
            outcome.commands.len(),
            outcome.crop
        ));
        st.record_commands(farm_id, &outcome.commands, false);
        return TickOutcome::Alerted(outcome.commands.len());
    }

    // ── Auto mode: publish ───────────────────────────────────────
    let mut sent = Vec::with_capacity(outcome.commands.len());
    for cmd in outcome.commands {
        let topic = command_topic(farm_id, &cmd.device);
        let payload = match command_payload(&cmd) {
            Ok(p) => p,
            Err(e) => {
                error!(farm = farm_id, device = %cmd.device, "controller: {e:#}");
                continue;
            }
        };

        if let Err(e) = mqtt.publish(topic, QoS::AtLeastOnce, false, payload).await {
            error!(farm = farm_id, device = %cmd.device, "controller: failed to publish command: {e}");
            app.shared
                .write()
                .await
                .record_error(format!("farm {farm_id}: publish {} failed: {e}", cmd.device));
            continue;
        }

        info!(
            farm = farm_id,
            device = %cmd.device,
            action = ?cmd.action,
            magnitude = cmd.magnitude,
            "controller: command published"
        );
        sent.push(cmd);
    }

    app.shared
        .write()
        .await
        .record_commands(farm_id, &sent, true);
    TickOutcome::Published(sent.len())
}

// ===========================================================================
// Tests
// ===========================================================================
