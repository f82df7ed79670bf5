//! The HTTP control plane: the daemon's local-only REST + SSE surface.
//! Routes bind straight onto the workflow engine; the SSE route streams
//! straight from the event hub instead of polling any store.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::warn;

use agentctl_core::{EngineError, Event, RunId};

use crate::engine::Engine;

/// Shared state for HTTP handlers.
pub struct AppState {
    pub engine: Engine,
    pub auth_token: Option<String>,
    pub keepalive: Duration,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/runs", post(start_run).get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/cancel", post(cancel_run))
        .route("/runs/{id}/plan/approve", post(approve_plan))
        .route("/runs/{id}/state", get(get_run_state))
        .route("/runs/{id}/events", get(stream_events))
        .route("/runs/{id}/hooks/events", post(ingest_hook_events))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(err: EngineError) -> (StatusCode, Json<ErrorBody>) {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorBody { error: err.to_string() }))
}

fn parse_run_id(raw: &str) -> Result<RunId, (StatusCode, Json<ErrorBody>)> {
    if raw.is_empty() {
        return Err(error_response(EngineError::Validation("run id must not be empty".to_string())));
    }
    Ok(RunId::from_string(raw))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRunRequest {
    agent_id: String,
    source: String,
    task_name: String,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    plan_mode: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct StartRunResponse {
    id: String,
    workdir: String,
}

async fn start_run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<StartRunResponse>), (StatusCode, Json<ErrorBody>)> {
    if body.agent_id.is_empty() || body.source.is_empty() || body.task_name.is_empty() {
        return Err(error_response(EngineError::Validation(
            "agentId, source, and taskName are all required".to_string(),
        )));
    }
    let run_id = body.run_id.map(RunId::from_string);
    let (run_id, workdir) = state
        .engine
        .start_workflow(run_id, body.agent_id, body.source, &body.task_name, body.prompt, body.plan_mode)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(StartRunResponse { id: run_id.to_string(), workdir })))
}

async fn list_runs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.list_workflows().await)
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let run_id = parse_run_id(&id)?;
    let run = state.engine.get_run(&run_id).await.ok_or_else(|| error_response(EngineError::NotFound(id)))?;
    Ok(Json(run))
}

async fn get_run_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let run_id = parse_run_id(&id)?;
    let doc = state.engine.get_workflow_state(&run_id).await.map_err(error_response)?;
    Ok(Json(doc))
}

async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let run_id = parse_run_id(&id)?;
    state.engine.cancel_workflow(&run_id).await.map_err(error_response)?;
    Ok(StatusCode::ACCEPTED)
}

async fn approve_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let run_id = parse_run_id(&id)?;
    state.engine.approve_plan(&run_id).await.map_err(error_response)?;
    Ok(StatusCode::OK)
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, (StatusCode, Json<ErrorBody>)> {
    let run_id = parse_run_id(&id)?;
    let rx = state.engine.subscribe_to_events(run_id).await.map_err(error_response)?;
    let stream = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let payload = serde_json::to_string(&event).unwrap_or_default();
        Some((Ok(SseEvent::default().event(event.event_type.as_str()).data(payload)), rx))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keepalive).text("keepalive")))
}

fn check_bearer(headers: &HeaderMap, expected: &Option<String>) -> Result<(), (StatusCode, Json<ErrorBody>)> {
    let Some(expected) = expected else { return Ok(()) };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => {
            warn!("rejected hook ingestion with missing or invalid bearer token");
            Err(error_response(EngineError::Auth))
        }
    }
}

/// Hook programs post either one event or `{"events": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HookEventBody {
    Batch { events: Vec<Event> },
    Single(Event),
}

impl HookEventBody {
    fn into_events(self) -> Vec<Event> {
        match self {
            HookEventBody::Batch { events } => events,
            HookEventBody::Single(event) => vec![event],
        }
    }
}

async fn ingest_hook_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<HookEventBody>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    check_bearer(&headers, &state.auth_token)?;
    let run_id = parse_run_id(&id)?;
    let events = body.into_events();
    if events.iter().any(|event| event.run_id != run_id) {
        return Err(error_response(EngineError::Validation("event runId does not match the URL's run id".to_string())));
    }
    // Best-effort telemetry: the ingestor may drop under load, but that is
    // never a failure the hook programs should count against the daemon.
    for event in events {
        state.engine.ingestor().ingest(event);
    }
    Ok(StatusCode::OK)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
