//! HTTP control API.
//!
//! Small JSON surface for health, configuration, voice profiles, and error
//! visibility. CORS is wide open so local tooling and the desktop client's
//! settings page can call it directly.

use crate::attention::AttentionEngine;
use crate::config::Config;
use crate::dispatch::{DispatcherHandle, DispatcherMsg};
use crate::error::{AttuneError, Result};
use crate::filter::VoiceFilter;
use crate::hub::ConnectionHub;
use crate::resilience::Resilience;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Shared handles the control API operates on.
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<RwLock<Config>>,
    pub config_path: Option<PathBuf>,
    pub filter: Arc<VoiceFilter>,
    pub engine: Arc<Mutex<AttentionEngine>>,
    pub dispatcher: DispatcherHandle,
    pub resilience: Arc<Resilience>,
    pub hub: Arc<ConnectionHub>,
    pub started_at: Instant,
}

impl ApiState {
    /// Push the current configuration into every live component.
    pub async fn apply_config(&self) {
        let config = self.config.read().await.clone();
        self.filter.set_sensitivity(config.detection.sensitivity).await;
        self.dispatcher
            .send(DispatcherMsg::SetSensitivity(config.detection.sensitivity))
            .await;
        self.dispatcher
            .send(DispatcherMsg::SetSilenceTimeout(Duration::from_millis(
                config.detection.silence_timeout_ms,
            )))
            .await;

        let mut engine = self.engine.lock().await;
        engine.apply_detection_config(&config.detection);
        if config.llm.enabled {
            engine.enable_llm();
        } else {
            engine.disable_llm();
        }
    }

    async fn persist_config(&self) {
        if let Some(path) = &self.config_path {
            let config = self.config.read().await.clone();
            if let Err(e) = config.save(path) {
                tracing::warn!(path = %path.display(), "failed to persist config: {e}");
            }
        }
    }
}

/// Build the control API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(get_config).put(put_config))
        .route("/config/sensitivity", put(put_sensitivity))
        .route("/config/keywords", post(post_keyword))
        .route("/profiles", get(get_profiles))
        .route("/profiles/{id}", delete(delete_profile))
        .route("/errors", get(get_errors))
        .layer(middleware::from_fn(permissive_cors))
        .with_state(state)
}

/// Serve the control API on an already-bound listener.
pub async fn serve(listener: TcpListener, state: ApiState) -> Result<()> {
    axum::serve(listener, router(state))
        .await
        .map_err(|e| AttuneError::Other(format!("control API server failed: {e}")))
}

async fn permissive_cors(request: Request, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS;
    let mut response = if preflight {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, PUT, POST, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

fn not_found(message: impl Into<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "activeConnections": state.hub.connection_count().await,
    }))
}

async fn get_config(State(state): State<ApiState>) -> Json<Config> {
    Json(state.config.read().await.clone())
}

async fn put_config(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    let config: Config = match serde_json::from_value(body) {
        Ok(config) => config,
        Err(e) => return bad_request(format!("invalid configuration: {e}")),
    };
    if let Err(e) = config.validate() {
        return bad_request(e.to_string());
    }

    *state.config.write().await = config;
    state.apply_config().await;
    state.persist_config().await;
    info!("configuration replaced via control API");
    Json(json!({ "success": true })).into_response()
}

async fn put_sensitivity(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    let level = match body.get("level").and_then(Value::as_f64) {
        Some(level) if (0.0..=1.0).contains(&level) => level as f32,
        Some(_) => return bad_request("level must be within [0, 1]"),
        None => return bad_request("missing numeric field 'level'"),
    };

    state.config.write().await.detection.sensitivity = level;
    state.apply_config().await;
    state.persist_config().await;
    Json(json!({ "success": true, "sensitivity": level })).into_response()
}

async fn post_keyword(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    let keyword = match body.get("keyword").and_then(Value::as_str) {
        Some(keyword) if !keyword.trim().is_empty() => keyword.trim().to_lowercase(),
        Some(_) => return bad_request("keyword must not be empty"),
        None => return bad_request("missing string field 'keyword'"),
    };

    state
        .config
        .write()
        .await
        .detection
        .attention_keywords
        .insert(keyword.clone());
    state.engine.lock().await.add_keyword(&keyword);
    state.persist_config().await;
    Json(json!({ "success": true, "keyword": keyword })).into_response()
}

async fn get_profiles(State(state): State<ApiState>) -> Json<Value> {
    let profiles = state.filter.list().await;
    Json(json!({ "success": true, "profiles": profiles }))
}

async fn delete_profile(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    if state.filter.remove(&id).await {
        Json(json!({ "success": true })).into_response()
    } else {
        not_found(format!("no profile with id '{id}'"))
    }
}

async fn get_errors(State(state): State<ApiState>) -> Json<Value> {
    Json(serde_json::to_value(state.resilience.snapshot()).unwrap_or_else(|_| json!({})))
}
