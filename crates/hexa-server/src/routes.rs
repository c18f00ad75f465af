// HTTP routes: service info, the LLM relay endpoints, session control, and
// the fallback that forwards everything else to the container.

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use hexa_core::config::CorsConfig;
use hexa_llm::client::strip_code_fences;
use hexa_llm::prompt::{code_prompt, deep_dive_prompt, flowchart_prompt, DeepDiveContext};
use hexa_llm::ChatRequest;
use hexa_notebook::parse_mermaid;

use crate::error::ApiError;
use crate::marimo;
use crate::proxy;
use crate::state::AppState;
use crate::voice;

/// Paths listed by `/` and by the not-found response.
pub const ENDPOINTS: &[&str] = &[
    "/",
    "/health",
    "/api/health",
    "/voice",
    "/api/generate-diagram",
    "/api/deepdive-node",
    "/api/generate-code",
    "/api/marimo/generate",
    "/api/generate-marimo",
    "/api/save",
    "/api/notebooks/{id}",
    "/api/session",
    "/state",
];

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors);

    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/api/health", get(health))
        .route("/voice", get(voice_upgrade))
        .route("/api/generate-diagram", post(generate_diagram))
        .route("/api/deepdive-node", post(deep_dive_node))
        .route("/api/generate-code", post(generate_code))
        .route(
            "/api/session",
            post(new_session)
                .get(current_session)
                .put(set_session)
                .delete(clear_session),
        )
        .merge(marimo::routes())
        // Applied before the fallback so proxied responses keep the
        // container's CORS headers only.
        .layer(cors)
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.allowed_origins.is_empty() || config.allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Unwrap a JSON body, turning extractor rejections into the usual error body.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v)
        .map_err(|rejection| ApiError::bad_request(format!("Invalid JSON body: {}", rejection.body_text())))
}

/// `Some` only for present, non-blank strings.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Info + health
// ---------------------------------------------------------------------------

async fn service_info() -> Json<Value> {
    Json(json!({
        "message": "CodeGen Hexa Backend API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "endpoints": ENDPOINTS,
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn voice_upgrade(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => {
            let gate = state.voice_gate();
            info!(ready = gate.ready, "voice connection opened");
            ws.on_upgrade(move |socket| voice::run_voice_socket(socket, gate))
        }
        Err(_) => (StatusCode::BAD_REQUEST, "Expected WebSocket upgrade").into_response(),
    }
}

// ---------------------------------------------------------------------------
// LLM relay endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DiagramRequest {
    prompt: Option<String>,
    language: Option<String>,
}

async fn generate_diagram(
    State(state): State<AppState>,
    body: Result<Json<DiagramRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = json_body(body)?;
    let prompt = non_empty(req.prompt).ok_or_else(|| ApiError::bad_request("Prompt is required"))?;
    let language = non_empty(req.language).unwrap_or_else(|| "python".to_string());

    let pair = flowchart_prompt(&prompt, &language);
    let chat = ChatRequest::new(&state.config.llm.flowchart, pair.system, pair.user);
    let text = state
        .llm
        .complete(&chat)
        .await
        .map_err(|e| ApiError::relay(e, "Failed to generate diagram"))?;

    let diagram = strip_code_fences(&text);
    let flow = parse_mermaid(&diagram);
    info!(
        diagram_len = diagram.len(),
        nodes = flow.nodes.len(),
        edges = flow.edges.len(),
        "diagram generated"
    );

    Ok(Json(json!({
        "success": true,
        "diagram": diagram,
        "flow": flow,
        "prompt": prompt,
        "language": language,
    })))
}

#[derive(Debug, Deserialize)]
struct DeepDiveRequest {
    node_name: Option<String>,
    question: Option<String>,
    #[serde(default)]
    original_prompt: Option<String>,
    #[serde(default)]
    flowchart: Option<String>,
}

async fn deep_dive_node(
    State(state): State<AppState>,
    body: Result<Json<DeepDiveRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = json_body(body)?;
    let (Some(node_name), Some(question)) = (non_empty(req.node_name), non_empty(req.question))
    else {
        return Err(ApiError::bad_request("Node name and question are required"));
    };
    let original_prompt = req.original_prompt.unwrap_or_default();
    let flowchart = req.flowchart.unwrap_or_default();
    info!(
        node_name = %node_name,
        flowchart_len = flowchart.len(),
        "deep dive requested"
    );

    let pair = deep_dive_prompt(&DeepDiveContext {
        node_name: &node_name,
        question: &question,
        original_prompt: &original_prompt,
        flowchart: &flowchart,
    });
    let chat = ChatRequest::new(&state.config.llm.deep_dive, pair.system, pair.user);
    let explanation = state
        .llm
        .complete(&chat)
        .await
        .map_err(|e| ApiError::relay(e, "Failed to generate deep dive explanation"))?;

    Ok(Json(json!({
        "success": true,
        "explanation": explanation,
        "node_name": node_name,
    })))
}

#[derive(Debug, Deserialize)]
struct CodeRequest {
    diagram: Option<String>,
    language: Option<String>,
}

async fn generate_code(
    State(state): State<AppState>,
    body: Result<Json<CodeRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = json_body(body)?;
    let diagram = non_empty(req.diagram).ok_or_else(|| ApiError::bad_request("Diagram is required"))?;
    let language = non_empty(req.language).unwrap_or_else(|| "python".to_string());

    let pair = code_prompt(&diagram, &language);
    let chat = ChatRequest::new(&state.config.llm.code, pair.system, pair.user);
    let code = state
        .llm
        .complete(&chat)
        .await
        .map_err(|e| ApiError::relay(e, "Failed to generate code"))?;

    Ok(Json(json!({
        "success": true,
        "code": code,
        "diagram": diagram,
        "language": language,
    })))
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

async fn new_session(State(state): State<AppState>) -> Json<Value> {
    let id = state.sessions.generate();
    info!(session_id = %id, "session started");
    Json(json!({ "success": true, "sessionId": id }))
}

async fn current_session(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "success": true, "sessionId": state.sessions.current() }))
}

#[derive(Debug, Deserialize)]
struct SetSessionRequest {
    session_id: Option<String>,
}

async fn set_session(
    State(state): State<AppState>,
    body: Result<Json<SetSessionRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = json_body(body)?;
    let id = non_empty(req.session_id).ok_or_else(|| ApiError::bad_request("session_id is required"))?;
    state.sessions.set(id.clone());
    Ok(Json(json!({ "success": true, "sessionId": id })))
}

async fn clear_session(State(state): State<AppState>) -> Json<Value> {
    state.sessions.clear();
    Json(json!({ "success": true, "sessionId": null }))
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

async fn fallback(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    if !path.starts_with("/api/") {
        if let Some(container) = state.proxy_target() {
            let container = container.clone();
            return proxy::forward(state, &container, req).await;
        }
    }
    not_found()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not Found",
            "message": "The requested endpoint does not exist",
            "available_endpoints": ENDPOINTS,
        })),
    )
        .into_response()
}
