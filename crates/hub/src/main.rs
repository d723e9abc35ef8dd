mod config;
mod controller;
mod history;
mod mqtt;
mod state;
mod web;

use anyhow::Result;
use greenhouse_engine::{Evaluator, PredictorSlot, ThresholdRegistry};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use history::{SampleHistory, DEFAULT_CAPACITY};
use mqtt::{extract_farm_id, parse_telemetry, TELEMETRY_FILTER};
use state::{AppState, SystemState};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port: u16 = env_or("MQTT_PORT", 1883);
    let web_port: u16 = env_or("WEB_PORT", 8080);
    let history_capacity: usize = env_or("HISTORY_CAPACITY", DEFAULT_CAPACITY);

    // ── Config file (control settings, farms, extra crops) ──────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    let registry = Arc::new(ThresholdRegistry::builtin());
    config::apply(&cfg, &registry)?;

    if cfg.farms.is_empty() {
        warn!("no farms configured; the controller will only see farms that report telemetry");
    }

    // ── Engine + shared state ───────────────────────────────────────
    // No learned model ships with the hub; the slot stays untrained until
    // one is swapped in.
    let evaluator = Evaluator::new(registry.clone(), Arc::new(PredictorSlot::untrained()));

    let shared = Arc::new(RwLock::new(SystemState::new(&cfg.farms, cfg.control.mode)));
    let history = SampleHistory::new(history_capacity);
    info!(capacity = history.capacity(), "sample history ready");

    let app = AppState::new(shared, history, registry, evaluator, cfg.control.clone());
    app.shared
        .write()
        .await
        .record_system("hub started".to_string());

    // ── Web server ──────────────────────────────────────────────────
    let web_app = app.clone();
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_app, web_port).await {
            error!(error = %format!("{e:#}"), "web server stopped");
        }
    });

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("greenhouse-hub", broker, mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    client.subscribe(TELEMETRY_FILTER, QoS::AtLeastOnce).await?;
    info!(filter = TELEMETRY_FILTER, "hub subscribed");

    // ── Controller ──────────────────────────────────────────────────
    tokio::spawn(controller::run(app.clone(), client.clone()));

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let Some(farm_id) = extract_farm_id(&p.topic) else {
                    warn!(topic = %p.topic, "unhandled topic");
                    continue;
                };

                match parse_telemetry(farm_id, &p.payload, OffsetDateTime::now_utc()) {
                    Ok(sample) => {
                        tracing::debug!(farm = farm_id, ts = %sample.timestamp, "telemetry");
                        app.ingest(sample).await;
                    }
                    Err(e) => {
                        let detail = format!("bad telemetry on {}: {e:#}", p.topic);
                        warn!("{detail}");
                        app.shared.write().await.record_error(detail);
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                let mut st = app.shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = app.shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "mqtt error, reconnecting");

                let mut st = app.shared.write().await;
                st.mqtt_connected = false;
                st.record_error(format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
