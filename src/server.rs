use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::db::Database;
use crate::models::{ApplicationRecord, DayCounts, FilterPreset, Scorecard};
use crate::store::{RecordStore, StoreError, StoreResult};
use crate::wire::{camel_to_snake, transform_keys};

#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Database>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    BadRequest(String),

    #[error("database lock poisoned")]
    Poisoned,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Validation(_) | StoreError::Serialization(_))
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// A record as served, with day counts computed at read time.
#[derive(Serialize)]
struct WireRecord<'a> {
    #[serde(flatten)]
    record: &'a ApplicationRecord,
    #[serde(flatten)]
    counts: DayCounts,
}

#[derive(Deserialize)]
struct PresetBody {
    name: String,
    config: Value,
}

fn with_db<T>(state: &AppState, f: impl FnOnce(&Database) -> StoreResult<T>) -> ApiResult<T> {
    let db = state.db.lock().map_err(|_| ApiError::Poisoned)?;
    Ok(f(&db)?)
}

/// Accepts camelCase or snake_case keys.
fn decode_record(body: Value) -> ApiResult<ApplicationRecord> {
    let body = transform_keys(body, camel_to_snake);
    serde_json::from_value(body).map_err(|e| ApiError::Store(e.into()))
}

pub fn build_router(db: Database) -> Router {
    let state = AppState {
        db: Arc::new(Mutex::new(db)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/applications", get(list_applications).post(create_application))
        .route(
            "/applications/{id}",
            axum::routing::put(update_application).delete(delete_application),
        )
        .route("/applications/{id}/scores", get(get_scores).post(set_scores))
        .route("/applications/{id}/scores/{factor}", delete(remove_score))
        .route("/filter-configs", get(list_presets).post(save_preset))
        .route("/filter-configs/{id}", delete(delete_preset))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(db: Database, addr: SocketAddr) -> Result<()> {
    let app = build_router(db);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Serving job applications on http://{}", addr);
    axum::serve(listener, app).await.context("Server stopped unexpectedly")?;
    Ok(())
}

// --- Handlers ---

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn list_applications(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let records = with_db(&state, |db| db.list_records())?;
    let today = Local::now().date_naive();
    let wire: Vec<WireRecord> = records
        .iter()
        .map(|record| WireRecord {
            record,
            counts: record.day_counts(today),
        })
        .collect();
    Ok(Json(serde_json::to_value(wire).map_err(StoreError::from)?))
}

async fn create_application(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let record = decode_record(body)?;
    let id = with_db(&state, |db| db.create_record(&record))?;
    info!("Created application #{}", id);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": id, "message": "Job application added successfully" })),
    ))
}

async fn update_application(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let record = decode_record(body)?.with_id(id);
    with_db(&state, |db| db.update_record(id, &record))?;
    Ok(Json(json!({ "message": "Job application updated successfully" })))
}

async fn delete_application(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    with_db(&state, |db| db.delete_record(id))?;
    info!("Deleted application #{}", id);
    Ok(Json(json!({ "message": "Job application deleted successfully" })))
}

async fn get_scores(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Scorecard>> {
    let card = with_db(&state, |db| {
        if db.get_record(id)?.is_none() {
            return Err(StoreError::NotFound(format!("Application #{}", id)));
        }
        db.list_scores(id)
    })?;
    Ok(Json(card))
}

async fn set_scores(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(card): Json<Scorecard>,
) -> ApiResult<Json<Scorecard>> {
    let card = with_db(&state, |db| {
        db.set_scores(id, &card.scores)?;
        db.list_scores(id)
    })?;
    Ok(Json(card))
}

async fn remove_score(
    State(state): State<AppState>,
    Path((id, factor)): Path<(i64, String)>,
) -> ApiResult<Json<Value>> {
    with_db(&state, |db| db.remove_score(id, &factor))?;
    Ok(Json(json!({ "message": "Score removed" })))
}

async fn list_presets(State(state): State<AppState>) -> ApiResult<Json<Vec<FilterPreset>>> {
    Ok(Json(with_db(&state, |db| db.list_presets())?))
}

async fn save_preset(
    State(state): State<AppState>,
    Json(body): Json<PresetBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Preset name is required".to_string()));
    }
    // Browser clients post the config as an object, the CLI as a string.
    let config = match body.config {
        Value::String(s) => s,
        other => other.to_string(),
    };
    let id = with_db(&state, |db| db.save_preset(name, &config))?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn delete_preset(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    with_db(&state, |db| db.delete_preset(id))?;
    Ok(Json(json!({ "message": "Filter configuration deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        build_router(Database::open_in_memory().unwrap())
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_accepts_camel_case_and_lists_day_counts() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/applications",
            Some(json!({
                "employer": "Acme",
                "jobTitle": "Data Engineer",
                "dateAppNotif": "2024-01-01",
                "lastUpdate": "2024-01-05",
                "lastCompletedStage": "Interview 1"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_i64().unwrap();

        let (status, body) = call(&app, "GET", "/applications", None).await;
        assert_eq!(status, StatusCode::OK);
        let row = &body[0];
        assert_eq!(row["id"], id);
        assert_eq!(row["job_title"], "Data Engineer");
        assert_eq!(row["last_completed_stage"], "Interview 1");
        assert_eq!(row["da_lu"], 4);
        assert!(row["da_now"].as_i64().unwrap() >= 4);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_return_404() {
        let app = app();
        let (status, body) = call(&app, "PUT", "/applications/77", Some(json!({"employer": "X"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));

        let (status, _) = call(&app, "DELETE", "/applications/77", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_replaces_record() {
        let app = app();
        let (_, body) = call(&app, "POST", "/applications", Some(json!({"employer": "Acme"}))).await;
        let id = body["id"].as_i64().unwrap();

        let uri = format!("/applications/{}", id);
        let (status, _) = call(
            &app,
            "PUT",
            &uri,
            Some(json!({"employer": "Acme", "last_completed_stage": "Rejected"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, "GET", "/applications", None).await;
        assert_eq!(body[0]["last_completed_stage"], "Rejected");
    }

    #[tokio::test]
    async fn test_presets_accept_object_or_string_config() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/filter-configs",
            Some(json!({"name": "Active", "config": {"hideNegativeOutcomes": true}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_i64().unwrap();

        let (_, body) = call(
            &app,
            "POST",
            "/filter-configs",
            Some(json!({"name": "Active", "config": "{\"searchQuery\":\"rust\"}"})),
        )
        .await;
        assert_eq!(body["id"], id);

        let (_, body) = call(&app, "GET", "/filter-configs", None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["config"], "{\"searchQuery\":\"rust\"}");

        let (status, _) = call(&app, "POST", "/filter-configs", Some(json!({"name": " ", "config": {}}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/filter-configs/{}", id);
        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_scores_merge_and_validate() {
        let app = app();
        let (_, body) = call(&app, "POST", "/applications", Some(json!({"employer": "Acme"}))).await;
        let uri = format!("/applications/{}/scores", body["id"]);

        let (status, _) = call(&app, "POST", &uri, Some(json!({"scores": {"communication": 8}}))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, "POST", &uri, Some(json!({"scores": {"benefits": 5}}))).await;
        assert_eq!(body["scores"], json!({"benefits": 5, "communication": 8}));

        let (status, _) = call(&app, "POST", &uri, Some(json!({"scores": {"benefits": 50}}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // one bad factor rejects the whole card
        let (status, _) = call(&app, "POST", &uri, Some(json!({"scores": {"benefits": 1, "vibes": 3}}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, body) = call(&app, "GET", &uri, None).await;
        assert_eq!(body["scores"], json!({"benefits": 5, "communication": 8}));

        let (status, _) = call(&app, "DELETE", &format!("{}/benefits", uri), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, "GET", &uri, None).await;
        assert_eq!(body["scores"], json!({"communication": 8}));

        let (status, _) = call(&app, "GET", "/applications/999/scores", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
