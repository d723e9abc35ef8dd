use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use greenhouse_engine::{
    Channel, CropProfile, CurrentReading, ReadingPayload, RegistryError, Report, ThresholdProvider,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use time::OffsetDateTime;
use tokio::net::TcpListener;

use crate::config::{Config, ControlSettings, CropEntry, MAX_PERIOD_DAYS};
use crate::mqtt::parse_telemetry;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/analysis", get(api_analysis))
        .route("/api/anomalies", get(api_anomalies))
        .route("/api/production", get(api_production))
        .route("/api/control", post(api_control))
        .route("/api/telemetry", post(api_telemetry))
        .route("/api/crops", get(api_crops).post(api_add_crop))
        .route("/api/crops/{name}", get(api_crop))
        .with_state(app)
}

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

/// Shared by the analysis endpoints. Unset fields fall back to `[control]`.
#[derive(Debug, Deserialize)]
struct PeriodQuery {
    farm_id: u32,
    days: Option<u32>,
    crop: Option<String>,
    threshold_std: Option<f64>,
    horizon_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FarmQuery {
    farm_id: u32,
    crop: Option<String>,
}

fn failure(status: StatusCode, message: impl ToString) -> Response {
    (
        status,
        Json(json!({ "success": false, "message": message.to_string() })),
    )
        .into_response()
}

/// 200 for a successful report, 422 when the engine could not produce one.
fn report_response<T: Serialize>(report: Report<T>) -> Response {
    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(report)).into_response()
}

impl PeriodQuery {
    /// Requested window, or `[control].period_days`; 400 when out of range.
    fn period_days(&self, settings: &ControlSettings) -> Result<u32, Response> {
        let days = self.days.unwrap_or(settings.period_days);
        if days == 0 || days > MAX_PERIOD_DAYS {
            return Err(failure(
                StatusCode::BAD_REQUEST,
                format!("days must be between 1 and {MAX_PERIOD_DAYS}, got {days}"),
            ));
        }
        Ok(days)
    }
}

impl AppState {
    async fn crop_or_configured(&self, farm_id: u32, requested: Option<String>) -> String {
        match requested {
            Some(crop) => crop,
            None => self.shared.read().await.crop_for(farm_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.shared.read().await;
    Json(st.to_status())
}

// ---------------------------------------------------------------------------
// Analysis over recorded history
// ---------------------------------------------------------------------------

async fn api_analysis(State(app): State<AppState>, Query(q): Query<PeriodQuery>) -> Response {
    let days = match q.period_days(&app.settings) {
        Ok(days) => days,
        Err(resp) => return resp,
    };
    let crop = app.crop_or_configured(q.farm_id, q.crop).await;
    let samples = app
        .history
        .read()
        .await
        .since(q.farm_id, days, OffsetDateTime::now_utc());
    report_response(app.evaluator.analyze(&samples, &crop))
}

async fn api_anomalies(State(app): State<AppState>, Query(q): Query<PeriodQuery>) -> Response {
    let days = match q.period_days(&app.settings) {
        Ok(days) => days,
        Err(resp) => return resp,
    };
    let threshold_std = q.threshold_std.unwrap_or(app.settings.threshold_std);
    if !(threshold_std.is_finite() && threshold_std > 0.0) {
        return failure(
            StatusCode::BAD_REQUEST,
            format!("threshold_std must be positive, got {threshold_std}"),
        );
    }
    let crop = app.crop_or_configured(q.farm_id, q.crop).await;
    let samples = app
        .history
        .read()
        .await
        .since(q.farm_id, days, OffsetDateTime::now_utc());
    report_response(app.evaluator.detect_anomalies(&samples, &crop, threshold_std))
}

async fn api_production(State(app): State<AppState>, Query(q): Query<PeriodQuery>) -> Response {
    let days = match q.period_days(&app.settings) {
        Ok(days) => days,
        Err(resp) => return resp,
    };
    let horizon_days = q.horizon_days.unwrap_or(app.settings.horizon_days);
    if horizon_days == 0 {
        return failure(StatusCode::BAD_REQUEST, "horizon_days must be positive");
    }
    let crop = app.crop_or_configured(q.farm_id, q.crop).await;
    let samples = app
        .history
        .read()
        .await
        .since(q.farm_id, days, OffsetDateTime::now_utc());
    report_response(app.evaluator.predict_production(&samples, &crop, horizon_days))
}

// ---------------------------------------------------------------------------
// Control and ingestion
// ---------------------------------------------------------------------------

/// Evaluate a reading supplied in the request body. Nothing is published.
async fn api_control(
    State(app): State<AppState>,
    Query(q): Query<FarmQuery>,
    Json(payload): Json<ReadingPayload>,
) -> Response {
    let reading = CurrentReading::from(&payload);
    if reading.is_empty() {
        return failure(
            StatusCode::BAD_REQUEST,
            "reading carries no recognised channel",
        );
    }
    let crop = app.crop_or_configured(q.farm_id, q.crop).await;
    let outcome = app.evaluator.control(&reading, &crop);
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(outcome)).into_response()
}

#[derive(Debug, Deserialize)]
struct TelemetryQuery {
    farm_id: u32,
}

async fn api_telemetry(
    State(app): State<AppState>,
    Query(q): Query<TelemetryQuery>,
    body: Bytes,
) -> Response {
    match parse_telemetry(q.farm_id, &body, OffsetDateTime::now_utc()) {
        Ok(sample) => {
            app.ingest(sample).await;
            (StatusCode::ACCEPTED, Json(json!({ "success": true }))).into_response()
        }
        Err(e) => {
            tracing::warn!(farm = q.farm_id, error = %format!("{e:#}"), "rejected telemetry");
            failure(StatusCode::BAD_REQUEST, format!("{e:#}"))
        }
    }
}

// ---------------------------------------------------------------------------
// Crop registry
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CropSummary {
    name: String,
    description: String,
    /// Channel key to optimal range, e.g. `"humidity": "50-70%"`.
    conditions: BTreeMap<&'static str, String>,
}

impl From<&CropProfile> for CropSummary {
    fn from(profile: &CropProfile) -> Self {
        Self {
            name: profile.name.clone(),
            description: profile.description.clone(),
            conditions: Channel::ALL
                .iter()
                .map(|ch| (ch.key(), profile.band(*ch).optimal_range_label()))
                .collect(),
        }
    }
}

async fn api_crops(State(app): State<AppState>) -> Response {
    let registered = match app.registry.list() {
        Ok(list) => list,
        Err(e) => return failure(StatusCode::SERVICE_UNAVAILABLE, e),
    };
    let default = app.registry.default_profile();
    let crops: Vec<CropSummary> = std::iter::once(default.as_ref())
        .chain(registered.iter().map(|p| p.as_ref()))
        .map(CropSummary::from)
        .collect();
    Json(json!({ "success": true, "total": crops.len(), "crops": crops })).into_response()
}

/// Unknown names answer 404 but still carry the fallback profile.
async fn api_crop(State(app): State<AppState>, Path(name): Path<String>) -> Response {
    let resolved = match app.registry.resolve(&name) {
        Ok(r) => r,
        Err(e) => return failure(StatusCode::SERVICE_UNAVAILABLE, e),
    };
    let status = if resolved.known {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    let body = json!({
        "success": resolved.known,
        "requested": resolved.requested,
        "crop": resolved.name(),
        "known": resolved.known,
        "warning": resolved.warning(),
        "profile": resolved.profile.as_ref(),
    });
    (status, Json(body)).into_response()
}

async fn api_add_crop(State(app): State<AppState>, Json(entry): Json<CropEntry>) -> Response {
    // Reuse the config file's crop rules so both paths reject the same input.
    let check = Config {
        control: ControlSettings::default(),
        farms: Vec::new(),
        crops: vec![entry.clone()],
    };
    if let Err(e) = check.validate() {
        return failure(StatusCode::BAD_REQUEST, format!("{e:#}"));
    }

    let profile = entry.to_profile();
    match app.registry.register(profile.clone()) {
        Ok(()) => {
            app.shared
                .write()
                .await
                .record_system(format!("crop '{}' registered", profile.name));
            (
                StatusCode::CREATED,
                Json(json!({ "success": true, "crop": profile })),
            )
                .into_response()
        }
        Err(e @ RegistryError::Duplicate(_)) => failure(StatusCode::CONFLICT, e),
        Err(e @ RegistryError::EmptyName) => failure(StatusCode::BAD_REQUEST, e),
        Err(e @ RegistryError::Unavailable) => failure(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(app: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    tracing::info!(%addr, "http api listening");

    axum::serve(listener, router(app))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FarmEntry, OperationMode};
    use crate::history::SampleHistory;
    use crate::state::SystemState;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use greenhouse_engine::{Evaluator, PredictorSlot, SensorSample, ThresholdRegistry};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use time::Duration;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn test_app() -> AppState {
        let farms = vec![FarmEntry {
            farm_id: 1,
            name: "North".into(),
            crop: "tomato".into(),
        }];
        let registry = Arc::new(ThresholdRegistry::builtin());
        AppState::new(
            Arc::new(RwLock::new(SystemState::new(&farms, OperationMode::Monitor))),
            SampleHistory::default(),
            Arc::clone(&registry),
            Evaluator::new(registry, Arc::new(PredictorSlot::untrained())),
            ControlSettings::default(),
        )
    }

    async fn seed_history(app: &AppState, hours: i64) {
        let now = OffsetDateTime::now_utc();
        for h in 0..hours {
            let sample = SensorSample::new(1, now - Duration::hours(h))
                .with(Channel::Humidity, 58.0 + (h % 5) as f64)
                .with(Channel::Temperature, 22.0)
                .with(Channel::Light, 70.0)
                .with(Channel::SoilMoisture, 60.0);
            app.ingest(sample).await;
        }
    }

    async fn send(app: &AppState, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(b) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(b.to_string())
            }
            None => Body::empty(),
        };
        let resp = router(app.clone())
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    // -- Status ---------------------------------------------------------------

    #[tokio::test]
    async fn status_lists_configured_farms() {
        let app = test_app();
        let (status, json) = send(&app, Method::GET, "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["mode"], "monitor");
        assert_eq!(json["farms"]["1"]["crop"], "tomato");
    }

    // -- Analysis -------------------------------------------------------------

    #[tokio::test]
    async fn analysis_over_history() {
        let app = test_app();
        seed_history(&app, 24).await;
        let (status, json) = send(&app, Method::GET, "/api/analysis?farm_id=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["crop"], "tomato");
        assert_eq!(json["data_count"], 24);
        assert_eq!(json["overall_score"], 1.0);
    }

    #[tokio::test]
    async fn analysis_without_history_is_unprocessable() {
        let app = test_app();
        let (status, json) = send(&app, Method::GET, "/api/analysis?farm_id=1", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["success"], false);
        assert!(json["message"].as_str().unwrap().contains("no sensor data"));
    }

    #[tokio::test]
    async fn analysis_requires_farm_id() {
        let app = test_app();
        let (status, _) = send(&app, Method::GET, "/api/analysis", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn analysis_period_out_of_range_rejected() {
        let app = test_app();
        seed_history(&app, 6).await;
        for uri in [
            "/api/analysis?farm_id=1&days=4294967295",
            "/api/anomalies?farm_id=1&days=4294967295",
            "/api/production?farm_id=1&days=0",
        ] {
            let (status, json) = send(&app, Method::GET, uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(json["message"].as_str().unwrap().contains("days must be between"));
        }
        let (status, _) =
            send(&app, Method::GET, "/api/analysis?farm_id=1&days=3650", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn analysis_crop_override_warns_on_unknown() {
        let app = test_app();
        seed_history(&app, 6).await;
        let (status, json) =
            send(&app, Method::GET, "/api/analysis?farm_id=1&crop=kiwano", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["crop_known"], false);
        assert!(json["warning"].as_str().unwrap().contains("kiwano"));
    }

    #[tokio::test]
    async fn anomalies_reported() {
        let app = test_app();
        seed_history(&app, 24).await;
        let (status, json) = send(&app, Method::GET, "/api/anomalies?farm_id=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["threshold_std"], 2.0);
        assert!(json["anomalies"].is_array());
    }

    #[tokio::test]
    async fn anomalies_reject_non_positive_threshold() {
        let app = test_app();
        let (status, json) =
            send(&app, Method::GET, "/api/anomalies?farm_id=1&threshold_std=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn production_over_two_days() {
        let app = test_app();
        seed_history(&app, 48).await;
        let (status, json) =
            send(&app, Method::GET, "/api/production?farm_id=1&horizon_days=14", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["horizon_days"], 14);
        assert_eq!(json["prediction"]["unit"], "kg");
    }

    #[tokio::test]
    async fn production_rejects_zero_horizon() {
        let app = test_app();
        let (status, _) =
            send(&app, Method::GET, "/api/production?farm_id=1&horizon_days=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- Control --------------------------------------------------------------

    #[tokio::test]
    async fn control_from_labelled_reading() {
        let app = test_app();
        let body = r#"{"sensors":[{"name":"온도","value":12},{"name":"습도","value":60}]}"#;
        let (status, json) = send(&app, Method::POST, "/api/control?farm_id=1", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["crop"], "tomato");
        let commands = json["commands"].as_array().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0]["device"], "heater");
        assert_eq!(json["learned_enabled"], false);
    }

    #[tokio::test]
    async fn control_without_channels_rejected() {
        let app = test_app();
        let body = r#"{"sensors":[{"name":"co2","value":900}]}"#;
        let (status, _) = send(&app, Method::POST, "/api/control?farm_id=1", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- Telemetry ------------------------------------------------------------

    #[tokio::test]
    async fn telemetry_is_ingested() {
        let app = test_app();
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/telemetry?farm_id=3",
            Some(r#"{"humidity":55,"temperature":21}"#),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(app.history.read().await.len(3), 1);
        assert!(app.shared.read().await.farms.contains_key(&3));
    }

    #[tokio::test]
    async fn bad_telemetry_rejected() {
        let app = test_app();
        let (status, json) =
            send(&app, Method::POST, "/api/telemetry?farm_id=1", Some("not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["message"].as_str().unwrap().contains("not valid JSON"));
        assert_eq!(app.history.read().await.len(1), 0);
    }

    // -- Crops ----------------------------------------------------------------

    #[tokio::test]
    async fn korean_crop_name_resolves() {
        let app = test_app();
        // "토마토", percent-encoded.
        let uri = "/api/crops/%ED%86%A0%EB%A7%88%ED%86%A0";
        let (status, json) = send(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["crop"], "tomato");
        assert_eq!(json["requested"], "토마토");
    }

    #[tokio::test]
    async fn crops_listed_with_default_first() {
        let app = test_app();
        let (status, json) = send(&app, Method::GET, "/api/crops", None).await;
        assert_eq!(status, StatusCode::OK);
        let crops = json["crops"].as_array().unwrap();
        assert_eq!(json["total"], crops.len());
        assert_eq!(crops[0]["name"], "default");
        assert!(crops.iter().any(|c| c["name"] == "tomato"));
    }

    #[tokio::test]
    async fn crop_detail_known_and_unknown() {
        let app = test_app();
        let (status, json) = send(&app, Method::GET, "/api/crops/tomato", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["known"], true);
        assert_eq!(json["profile"]["temperature"]["optimal_min"], 20.0);

        let (status, json) = send(&app, Method::GET, "/api/crops/kiwano", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["crop"], "default");
        assert!(json["warning"].is_string());
    }

    const NEW_CROP: &str = r#"{
        "name": "okra",
        "description": "Okra: 24-30℃",
        "base_yield_per_unit": 2.5,
        "humidity": {"optimal": [55, 70], "acceptable": [45, 80], "critical": [30, 90]},
        "temperature": {"optimal": [24, 30], "acceptable": [18, 34], "critical": [12, 38]},
        "light": {"optimal": [65, 85], "acceptable": [55, 90], "critical": [35, 100]},
        "soil_moisture": {"optimal": [50, 65], "acceptable": [40, 75], "critical": [25, 90]}
    }"#;

    #[tokio::test]
    async fn crop_added_then_duplicate_conflicts() {
        let app = test_app();
        let (status, json) = send(&app, Method::POST, "/api/crops", Some(NEW_CROP)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["crop"]["name"], "okra");
        assert_eq!(json["crop"]["temperature"]["unit"], "℃");

        let (status, json) = send(&app, Method::GET, "/api/crops/okra", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["known"], true);

        let (status, _) = send(&app, Method::POST, "/api/crops", Some(NEW_CROP)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn crop_with_unnested_bands_rejected() {
        let app = test_app();
        let body = NEW_CROP.replace("[45, 80]", "[60, 80]");
        let (status, json) = send(&app, Method::POST, "/api/crops", Some(body.as_str())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["message"].as_str().unwrap().contains("must nest"));
        let (status, _) = send(&app, Method::GET, "/api/crops/okra", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
