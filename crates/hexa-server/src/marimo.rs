// Notebook endpoints: generation, saving, and retrieval.
//
// `/api/marimo/generate` runs the configured strategy and answers in the
// `{success, ...}` shape used by the rest of the API. `/api/generate-marimo`,
// `/api/save` and `/state` answer in the container's `{ok, ...}` shape so
// clients written against the container keep working.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use hexa_llm::LlmError;
use hexa_notebook::{
    draft_direct, generate_notebook, missing_markers, FlowGraph, NotebookError, NotebookRequest,
};

use crate::container::{ContainerError, SavedNotebook};
use crate::error::ApiError;
use crate::routes::{json_body, non_empty};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/marimo/generate", post(generate))
        .route("/api/generate-marimo", post(generate_direct))
        .route("/api/save", post(save))
        .route("/api/notebooks/{id}", get(notebook_body))
        .route("/state", get(load_latest).post(store_latest))
}

/// `{"ok": false, "error": ...}` with `status`.
fn ok_error(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "ok": false, "error": error }))).into_response()
}

fn log_saved(saved: &SavedNotebook) {
    let failed_saves = saved.attempts.iter().filter(|a| a.via == "http").count();
    info!(
        notebook_id = %saved.id,
        base = %saved.base,
        attempts = saved.attempts.len(),
        failed_saves,
        "notebook saved to container"
    );
}

/// Where a notebook can be fetched when there is no container to serve it.
fn local_url(id: &str) -> String {
    format!("/api/notebooks/{id}")
}

// ---------------------------------------------------------------------------
// /api/marimo/generate
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    diagram: Option<String>,
    prompt: Option<String>,
    language: Option<String>,
    #[serde(default)]
    flow_graph: Option<FlowGraph>,
}

async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = json_body(body)?;
    let (Some(diagram), Some(prompt)) = (non_empty(req.diagram), non_empty(req.prompt)) else {
        return Err(ApiError::bad_request("Diagram and prompt are required"));
    };
    let language = non_empty(req.language).unwrap_or_else(|| "python".to_string());
    let strategy = state.config.notebook.strategy;
    let session_id = state.sessions.current();

    info!(
        diagram_len = diagram.len(),
        %language,
        strategy = strategy.as_str(),
        has_flow_graph = req.flow_graph.is_some(),
        session_id = session_id.as_deref().unwrap_or("-"),
        "starting notebook generation"
    );

    let request = NotebookRequest {
        prompt: prompt.clone(),
        mermaid: diagram.clone(),
        language: language.clone(),
        title: None,
        flow: req.flow_graph,
    };
    let notebook = generate_notebook(&state.llm, &state.config.llm, strategy, &request)
        .await
        .map_err(|e| ApiError::notebook(e, "Failed to generate Marimo notebook"))?;

    state
        .store
        .save_notebook(&notebook.id, &notebook.filename, &notebook.content)?;

    let (notebook_id, url) = match &state.container {
        Some(container) => {
            match container
                .save(&notebook.id, &notebook.filename, &notebook.content)
                .await
            {
                Ok(saved) => {
                    log_saved(&saved);
                    (saved.id, saved.url)
                }
                Err(ContainerError::AllFailed { attempts }) => {
                    return Err(ApiError::ContainerSave { attempts })
                }
                Err(e) => return Err(ApiError::Internal(e.to_string())),
            }
        }
        None => (notebook.id.clone(), local_url(&notebook.id)),
    };

    Ok(Json(json!({
        "success": true,
        "marimoUrl": state.public_url(&url),
        "notebookId": notebook_id,
        "diagram": diagram,
        "language": language,
        "prompt": prompt,
        "strategy": notebook.strategy.as_str(),
        "sanitized": notebook.outcome,
        "sessionId": session_id,
    })))
}

// ---------------------------------------------------------------------------
// /api/generate-marimo
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DirectRequest {
    title: Option<String>,
    language: Option<String>,
    #[serde(default)]
    mermaid: Option<String>,
    #[serde(default)]
    flow: Option<FlowGraph>,
}

async fn generate_direct(
    State(state): State<AppState>,
    body: Result<Json<DirectRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => return ok_error(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };

    let (Some(title), Some(language)) = (non_empty(req.title), non_empty(req.language)) else {
        return ok_error(StatusCode::BAD_REQUEST, "Missing required fields: title, language");
    };

    let request = NotebookRequest {
        prompt: title.clone(),
        mermaid: req.mermaid.unwrap_or_default(),
        language,
        title: Some(title),
        flow: req.flow,
    };

    let draft = match draft_direct(&state.llm, &state.config.llm.notebook_direct, &request).await {
        Ok(draft) => draft,
        Err(NotebookError::Llm(LlmError::NotConfigured)) => {
            return ok_error(StatusCode::INTERNAL_SERVER_ERROR, "OpenAI API key not configured")
        }
        Err(e) => {
            error!(error = %e, "direct notebook generation failed");
            return ok_error(StatusCode::BAD_GATEWAY, "openai");
        }
    };

    let missing = missing_markers(&draft.content);
    if !missing.is_empty() {
        let preview: String = draft.content.chars().take(200).collect();
        warn!(?missing, %preview, "model returned an invalid notebook");
        return ok_error(StatusCode::BAD_REQUEST, "invalid_marimo");
    }

    if let Err(e) = state
        .store
        .save_notebook(&draft.id, &draft.filename, &draft.content)
    {
        error!(error = %format!("{e:#}"), "failed to store notebook");
        return ok_error(StatusCode::INTERNAL_SERVER_ERROR, "store");
    }

    let (id, url) = match &state.container {
        Some(container) => match container
            .save(&draft.id, &draft.filename, &draft.content)
            .await
        {
            Ok(saved) => {
                log_saved(&saved);
                (saved.id, saved.url)
            }
            Err(e) => {
                error!(error = %e, "container save failed");
                return ok_error(StatusCode::BAD_GATEWAY, "container_save");
            }
        },
        None => (draft.id.clone(), local_url(&draft.id)),
    };

    Json(json!({
        "ok": true,
        "url": state.public_url(&url),
        "name": draft.filename,
        "id": id,
    }))
    .into_response()
}

// ---------------------------------------------------------------------------
// /api/save
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SaveRequest {
    content: Option<String>,
    id: Option<String>,
}

async fn save(
    State(state): State<AppState>,
    body: Result<Json<SaveRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = json_body(body)?;
    let content = non_empty(req.content).ok_or_else(|| ApiError::bad_request("Content is required"))?;
    if !content.contains("import marimo as mo") || !content.contains("app = mo.App()") {
        return Err(ApiError::bad_request("Invalid Marimo notebook content"));
    }

    let id = non_empty(req.id)
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis().to_string());
    let filename = format!("notebook_{id}.py");

    state.store.save_notebook(&id, &filename, &content)?;

    let app_path = match &state.container {
        Some(container) => match container.save(&id, &filename, &content).await {
            Ok(saved) => {
                log_saved(&saved);
                saved.url
            }
            Err(e) => {
                error!(error = %e, "container save failed");
                return Err(ApiError::Internal("Failed to save notebook".to_string()));
            }
        },
        None => local_url(&id),
    };

    Ok(Json(json!({
        "success": true,
        "id": id,
        "filename": filename,
        "appPath": app_path,
        "message": "Notebook saved successfully",
    })))
}

// ---------------------------------------------------------------------------
// Stored notebooks
// ---------------------------------------------------------------------------

async fn notebook_body(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let notebook = state
        .store
        .notebook(&id)?
        .ok_or_else(|| ApiError::NotFound("Notebook not found".to_string()))?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/x-python; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", notebook.filename),
            ),
        ],
        notebook.content,
    )
        .into_response())
}

async fn load_latest(State(state): State<AppState>) -> Response {
    match state.store.latest() {
        Ok(Some(nb)) if !nb.content.is_empty() => Json(json!({
            "ok": true,
            "id": nb.id,
            "length": nb.content.chars().count(),
            "content": nb.content,
        }))
        .into_response(),
        Ok(_) => ok_error(StatusCode::NOT_FOUND, "not found"),
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to load latest notebook");
            ok_error(StatusCode::INTERNAL_SERVER_ERROR, "store")
        }
    }
}

#[derive(Debug, Deserialize)]
struct StateRequest {
    id: Option<String>,
    content: Option<String>,
}

async fn store_latest(
    State(state): State<AppState>,
    body: Result<Json<StateRequest>, JsonRejection>,
) -> Response {
    let fields = body
        .ok()
        .and_then(|Json(req)| non_empty(req.id).zip(req.content));
    let Some((id, content)) = fields else {
        return ok_error(StatusCode::BAD_REQUEST, "id and content required");
    };

    match state.store.save_notebook(&id, &format!("{id}.py"), &content) {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to store notebook state");
            ok_error(StatusCode::INTERNAL_SERVER_ERROR, "store")
        }
    }
}
