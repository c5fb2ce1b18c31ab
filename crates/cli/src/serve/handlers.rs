//! HTTP route handlers.
//!
//! Run endpoints only start work: they answer 202 at once, or 409 while a
//! run of the same kind is active. Progress is polled from the status
//! endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use promptsmith_eval::{EvaluateRequest, JobKind, OptimizeRequest, StartOutcome};
use promptsmith_storage::{ProgramStore, SignatureCatalog, StorageError};
use serde::Deserialize;

use super::json_error;
use super::state::AppState;

fn storage_error(e: StorageError) -> Response {
    let status = match e {
        StorageError::SignatureNotFound { .. } | StorageError::ProgramNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, &e.to_string()).into_response()
}

fn started(outcome: StartOutcome, kind: &str) -> Response {
    match outcome {
        // The run records its own outcome in the session.
        StartOutcome::Started(_) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "started" })),
        )
            .into_response(),
        StartOutcome::AlreadyRunning => json_error(
            StatusCode::CONFLICT,
            &format!("{} already in progress", kind),
        )
        .into_response(),
    }
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

/// GET /signatures
pub(crate) async fn handle_list_signatures(State(state): State<Arc<AppState>>) -> Response {
    match SignatureCatalog::list(state.store.as_ref()) {
        Ok(signatures) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "signatures": signatures,
                "current_signature": state.session.selection().signature,
            })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

/// POST /signatures/{name}/select
pub(crate) async fn handle_select_signature(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    if let Err(e) = state.session.select_signature(Some(&name)) {
        return storage_error(e);
    }
    let selection = state.session.selection();
    (StatusCode::OK, Json(serde_json::json!(selection))).into_response()
}

/// GET /models
pub(crate) async fn handle_list_models(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "models": state.configured_models,
            "default_model": state.default_model,
            "current_model": state.session.selection().model,
        })),
    )
        .into_response()
}

/// POST /models/{name}/select
pub(crate) async fn handle_select_model(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    let name = name.trim();
    if name.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "model name is empty").into_response();
    }
    state.session.select_model(Some(name));
    let selection = state.session.selection();
    (StatusCode::OK, Json(serde_json::json!(selection))).into_response()
}

/// GET /programs
pub(crate) async fn handle_list_programs(State(state): State<Arc<AppState>>) -> Response {
    match ProgramStore::list(state.store.as_ref()) {
        Ok(programs) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "programs": programs,
                "current_program_id": state.session.selection().program_id,
            })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

/// POST /programs/{id}/select
pub(crate) async fn handle_select_program(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if let Err(e) = state.session.select_program(Some(&id)) {
        return storage_error(e);
    }
    let selection = state.session.selection();
    (StatusCode::OK, Json(serde_json::json!(selection))).into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct OptimizeBody {
    /// Defaults to the selected signature.
    pub(crate) signature: Option<String>,
    pub(crate) model: Option<String>,
    pub(crate) base_program_id: Option<String>,
    pub(crate) judge_model: Option<String>,
}

/// POST /optimize
pub(crate) async fn handle_optimize(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OptimizeBody>,
) -> Response {
    let Some(signature) = body
        .signature
        .or_else(|| state.session.selection().signature)
    else {
        return json_error(StatusCode::BAD_REQUEST, "no signature given or selected")
            .into_response();
    };
    let model = state.model_for(body.model);
    let request = OptimizeRequest {
        signature,
        model: model.clone(),
        base_program_id: body.base_program_id,
        judge_model: body.judge_model,
    };
    let outcome = state.worker.start_optimization(request);
    if matches!(outcome, StartOutcome::Started(_)) {
        // Later runs default to the model this program was compiled with.
        state.session.select_model(Some(&model));
    }
    started(outcome, "optimization")
}

/// GET /optimization_status
pub(crate) async fn handle_optimization_status(State(state): State<Arc<AppState>>) -> Response {
    let status = state.session.status(JobKind::Optimization);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "running": status.running,
            "last_error": status.last_error,
            "last_program_id": status.last_program_id,
            "current_program_id": state.session.selection().program_id,
        })),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct EvaluateBody {
    /// Defaults to the selected program.
    pub(crate) program_id: Option<String>,
    pub(crate) model: Option<String>,
    pub(crate) judge_model: Option<String>,
}

/// POST /evaluate
pub(crate) async fn handle_evaluate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EvaluateBody>,
) -> Response {
    let request = EvaluateRequest {
        program_id: body.program_id,
        model: state.model_for(body.model),
        judge_model: body.judge_model,
    };
    started(state.worker.start_evaluation(request), "evaluation")
}

/// GET /evaluation
pub(crate) async fn handle_evaluation(State(state): State<Arc<AppState>>) -> Response {
    let status = state.session.status(JobKind::Evaluation);
    let result = state.session.last_evaluation();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "running": status.running,
            "last_error": status.last_error,
            "result": result.as_deref(),
        })),
    )
        .into_response()
}
