//! `promptsmith serve` -- HTTP JSON API over the session.
//!
//! Endpoints:
//! - GET  /health                 - Server status
//! - GET  /signatures             - Signatures and the selected one
//! - POST /signatures/{name}/select - Select a signature and its newest program
//! - GET  /models                 - Configured, default and selected models
//! - POST /models/{name}/select   - Select the model runs default to
//! - GET  /programs               - Programs, newest first, and the selected one
//! - POST /programs/{id}/select   - Select a program (and its signature)
//! - POST /optimize               - Start an optimization run
//! - GET  /optimization_status    - Poll the optimization run
//! - POST /evaluate               - Start an evaluation run
//! - GET  /evaluation             - Poll the evaluation run and its last result
//!
//! All responses use Content-Type: application/json.

mod handlers;
mod state;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use self::handlers::{
    handle_evaluate, handle_evaluation, handle_health, handle_list_models, handle_list_programs,
    handle_list_signatures, handle_not_found, handle_optimization_status, handle_optimize,
    handle_select_model, handle_select_program, handle_select_signature,
};
use self::state::AppState;
use crate::app::App;
use crate::error::CliError;

/// Maximum request body size: 1 MB.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/signatures", get(handle_list_signatures))
        .route("/signatures/{name}/select", post(handle_select_signature))
        .route("/models", get(handle_list_models))
        .route("/models/{name}/select", post(handle_select_model))
        .route("/programs", get(handle_list_programs))
        .route("/programs/{id}/select", post(handle_select_program))
        .route("/optimize", post(handle_optimize))
        .route("/optimization_status", get(handle_optimization_status))
        .route("/evaluate", post(handle_evaluate))
        .route("/evaluation", get(handle_evaluation))
        .fallback(handle_not_found)
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Serve until Ctrl+C. The newest program is selected at startup.
pub(crate) async fn start_server(app: App, port: u16) -> Result<(), CliError> {
    let engine = app.engine()?;
    if let Some(id) = app.session.restore()? {
        info!(program = %id, "restored current program");
    }

    let state = Arc::new(AppState {
        store: app.store.clone(),
        session: app.session.clone(),
        worker: app.worker(&engine),
        default_model: app.config.default_model.clone(),
        configured_models: app.config.models.models.keys().cloned().collect(),
    });

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CliError::Runtime(format!("could not bind {}: {}", addr, e)))?;
    info!("promptsmith listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| CliError::Runtime(format!("server error: {}", e)))?;

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
