//! REST API server for the research agent
//!
//! Exposes one shared agent session over HTTP. Every handler locks the agent
//! for the duration of the request, so actions and debates never interleave.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::ResearchAgent;
use crate::error::ResearchError;
use crate::learning::{DEFAULT_MIN_OBSERVATIONS, DEFAULT_PATTERN_LIMIT};

const DEFAULT_RECENT_DEBATES: usize = 10;
const DEFAULT_LOG_ENTRIES: usize = 50;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PlanRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub observed_rate: f64,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PatternQuery {
    pub min_observations: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
    /// `llm` or `roles`
    pub filter: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn failure(error: ResearchError) -> ApiResult {
    let status = match &error {
        ResearchError::UnknownAction(_) => StatusCode::NOT_FOUND,
        ResearchError::SequenceViolation(_) => StatusCode::CONFLICT,
        ResearchError::ConfigError(_) => StatusCode::SERVICE_UNAVAILABLE,
        ResearchError::DebateError(_) | ResearchError::LlmError(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(status = %status, error = %error, "Request failed");
    (status, Json(ApiResponse::error(error.to_string())))
}

fn respond<T: Serialize>(result: crate::Result<T>) -> ApiResult {
    match result {
        Ok(data) => ok(data),
        Err(e) => failure(e),
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<Mutex<ResearchAgent>>,
}

/// =============================
/// Session Endpoints
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn knowledge(State(state): State<ApiState>) -> ApiResult {
    let agent = state.agent.lock().await;
    let session = agent.session();
    ok(serde_json::json!({
        "session_id": session.id(),
        "planner": agent.planner_name(),
        "summary": session.cache().state_summary(),
        "knowledge": session.cache(),
    }))
}

async fn logs(State(state): State<ApiState>, Query(query): Query<LogQuery>) -> ApiResult {
    let agent = state.agent.lock().await;
    let log = agent.session().log();

    let entries: Vec<_> = match query.filter.as_deref() {
        Some("llm") => log.llm_entries().into_iter().cloned().collect(),
        Some("roles") => log.role_entries().into_iter().cloned().collect(),
        _ => log
            .recent(query.limit.unwrap_or(DEFAULT_LOG_ENTRIES))
            .into_iter()
            .cloned()
            .collect(),
    };
    ok(entries)
}

async fn plan(State(state): State<ApiState>, body: Option<Json<PlanRequest>>) -> ApiResult {
    let force = body.map(|Json(req)| req.force).unwrap_or(false);
    info!(force, "Plan requested");
    let mut agent = state.agent.lock().await;
    respond(agent.plan(force).await)
}

async fn run_action(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Option<Json<PlanRequest>>,
) -> ApiResult {
    let force = body.map(|Json(req)| req.force).unwrap_or(false);
    let mut agent = state.agent.lock().await;
    respond(
        agent
            .run_action(&name, force)
            .await
            .map(|outcome| serde_json::json!({ "action": name, "outcome": outcome })),
    )
}

/// =============================
/// Debate Endpoints
/// =============================

async fn run_debate(State(state): State<ApiState>) -> ApiResult {
    let mut agent = state.agent.lock().await;
    respond(agent.run_debate().await)
}

async fn resume_debate(State(state): State<ApiState>) -> ApiResult {
    let mut agent = state.agent.lock().await;
    respond(agent.resume_debate().await)
}

async fn save_debate(State(state): State<ApiState>) -> ApiResult {
    let mut agent = state.agent.lock().await;
    respond(
        agent
            .save_debate()
            .await
            .map(|id| serde_json::json!({ "debate_id": id })),
    )
}

async fn recent_debates(State(state): State<ApiState>, Query(query): Query<LimitQuery>) -> ApiResult {
    let store = state.agent.lock().await.store();
    respond(
        store
            .recent_debates(query.limit.unwrap_or(DEFAULT_RECENT_DEBATES))
            .await,
    )
}

async fn debate_details(State(state): State<ApiState>, Path(id): Path<i64>) -> ApiResult {
    let store = state.agent.lock().await.store();
    match store.debate_details(id).await {
        Ok(Some(details)) => ok(details),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Debate {} not found", id))),
        ),
        Err(e) => failure(e),
    }
}

async fn validate_debate(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(req): Json<ValidateRequest>,
) -> ApiResult {
    let mut agent = state.agent.lock().await;
    respond(agent.validate_debate(id, req.observed_rate).await)
}

/// =============================
/// Learning Endpoints
/// =============================

async fn patterns(State(state): State<ApiState>, Query(query): Query<PatternQuery>) -> ApiResult {
    let store = state.agent.lock().await.store();
    respond(
        store
            .top_patterns(
                query.min_observations.unwrap_or(DEFAULT_MIN_OBSERVATIONS),
                query.limit.unwrap_or(DEFAULT_PATTERN_LIMIT),
            )
            .await,
    )
}

async fn stats(State(state): State<ApiState>) -> ApiResult {
    let store = state.agent.lock().await.store();
    let validation = match store.validation_stats().await {
        Ok(validation) => validation,
        Err(e) => return failure(e),
    };
    let trend = match store.accuracy_trend().await {
        Ok(trend) => trend,
        Err(e) => return failure(e),
    };
    ok(serde_json::json!({
        "validation": validation,
        "trend": trend,
    }))
}

async fn recommendation(State(state): State<ApiState>) -> ApiResult {
    let mut agent = state.agent.lock().await;
    match agent.recommendation().await {
        Ok(Some(rec)) => ok(rec),
        Ok(None) => failure(ResearchError::SequenceViolation(
            "rates have not been analyzed yet".to_string(),
        )),
        Err(e) => failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(agent: Arc<Mutex<ResearchAgent>>) -> Router {
    let state = ApiState { agent };

    Router::new()
        .route("/health", get(health))
        .route("/api/knowledge", get(knowledge))
        .route("/api/logs", get(logs))
        .route("/api/plan", post(plan))
        .route("/api/actions/:name", post(run_action))
        .route("/api/debate", post(run_debate))
        .route("/api/debate/resume", post(resume_debate))
        .route("/api/debates", get(recent_debates).post(save_debate))
        .route("/api/debates/:id", get(debate_details))
        .route("/api/debates/:id/validate", post(validate_debate))
        .route("/api/patterns", get(patterns))
        .route("/api/stats", get(stats))
        .route("/api/recommendation", get(recommendation))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    agent: Arc<Mutex<ResearchAgent>>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(agent);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
