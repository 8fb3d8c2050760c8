//! Request edge: router assembly plus the request-correlation middleware.
//! Cross-cutting concerns live here only — CORS, body limit, event logging.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// JSON body limit (10 MB).
const BODY_LIMIT: usize = 10 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/status", get(handlers::status))
        .route("/api/search", get(handlers::search))
        .route("/api/verify-sources", get(handlers::verify_sources))
        .route("/api/refresh-archive", post(handlers::refresh_archive))
        .route("/api/models", get(handlers::models))
        .route("/api/refresh-models", post(handlers::refresh_models))
        .route("/api/workflow", post(handlers::create_workflow))
        .route("/api/workflow/:id", get(handlers::get_workflow))
        .route("/api/upload-script", post(handlers::upload_script))
        .route("/api/generate-script", post(handlers::generate_script))
        .route("/api/generate-audio", post(handlers::generate_audio))
        .route("/api/finalize", post(handlers::finalize))
        .route(
            "/api/validate-openrouter-key",
            post(handlers::validate_openrouter_key),
        )
        .route("/api/validate-keys", post(handlers::validate_keys))
        .route("/api/key-pool-status", get(handlers::key_pool_status))
        .route("/api/openrouter", post(handlers::openrouter_proxy))
        .route("/api/feedback", post(handlers::submit_feedback))
        .route(
            "/api/voices",
            get(handlers::list_voices).post(handlers::create_voice),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_log_middleware,
        ))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Per-request correlation: one timestamped log line and an append to the
/// event log. Event writes are best-effort; a storage hiccup never fails
/// the request it describes.
async fn request_log_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());
    let user_agent = req
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let started = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16();
    let duration_ms = started.elapsed().as_millis() as u64;

    tracing::info!(%method, %path, status, duration_ms, "request");

    let data = serde_json::json!({
        "method": method.as_str(),
        "path": path,
        "status": status,
        "duration_ms": duration_ms,
    });
    if let Err(e) = state
        .store
        .append_event("api_request", &data, ip.as_deref(), user_agent.as_deref())
        .await
    {
        tracing::warn!(error = %e, "failed to append request event");
    }

    response
}
