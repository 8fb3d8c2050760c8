//! Endpoint handlers. Each one validates inputs, dispatches to exactly one
//! component call, and shapes the response; typed errors are mapped to HTTP
//! by `AppError` alone.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppError;
use crate::llm::orchestrator::ScriptRequest;
use crate::llm::validator::KeyErrorCode;
use crate::store::{NewFeedback, SearchFilter};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub keyword: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowRequest {
    pub name: Option<String>,
    pub speech_ids: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadScriptRequest {
    pub workflow_id: Option<String>,
    pub script: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateScriptRequest {
    pub workflow_id: Option<String>,
    pub model: Option<String>,
    pub style: Option<String>,
    pub duration: Option<u32>,
    pub batch_size: Option<usize>,
    pub use_swarm: Option<bool>,
    pub api_key: Option<String>,
    pub use_pool: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAudioRequest {
    pub workflow_id: Option<String>,
    pub voice: Option<String>,
    pub preset: Option<String>,
    /// Recognized for compatibility; synthesis always runs the local worker.
    #[allow(dead_code)]
    pub use_local: Option<bool>,
    pub custom_voice_path: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub workflow_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub local_bundle: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateKeyRequest {
    pub api_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateKeysRequest {
    pub api_keys: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsParams {
    pub category: Option<String>,
    pub live: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    pub model: Option<String>,
    pub messages: Option<serde_json::Value>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub use_pool: Option<bool>,
    pub api_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVoiceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub audio_files: Option<Vec<String>>,
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::input(format!("missing required field: {field}")))
}

/// Bearer token or explicit key header; body keys win over either.
fn key_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

// ── Catalog / search ─────────────────────────────────────────

pub async fn health(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let db_ok = state.store.ping().await.is_ok();
    let speeches = state.store.count_speeches().await.unwrap_or(0);
    let workflows = state.store.count_workflows().await.unwrap_or(0);

    let health_status = if db_ok { "ok" } else { "degraded" };
    let body = json!({
        "status": health_status,
        "db": db_ok,
        "counts": { "speeches": speeches, "workflows": workflows },
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "memory_mb": process_rss_mb(),
    });
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(body)).into_response())
}

pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, AppError> {
    let counts = state.store.speech_counts_by_source().await?;
    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    let by_source: serde_json::Map<String, serde_json::Value> = counts
        .into_iter()
        .map(|(source, n)| (source, json!(n)))
        .collect();

    Ok(Json(json!({
        "sources": state.ingest.availability_snapshot(),
        "counts": { "total": total, "by_source": by_source },
        "ai_configured": state.config.env_api_key().is_some() || !state.pool.is_empty(),
    })))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let filter = SearchFilter {
        keyword: params.keyword,
        start_date: params.start_date,
        end_date: params.end_date,
        limit: params.limit.unwrap_or(50),
        offset: params.offset.unwrap_or(0),
    }
    .clamped();

    let (results, total) = state.store.search_speeches(&filter).await?;
    let has_more = (filter.offset + results.len() as i64) < total;

    Ok(Json(json!({
        "results": results,
        "pagination": {
            "total": total,
            "limit": filter.limit,
            "offset": filter.offset,
            "hasMore": has_more,
        },
    })))
}

pub async fn verify_sources(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let statuses = state.ingest.verify_all().await;
    Ok(Json(serde_json::to_value(statuses).unwrap_or_default()))
}

pub async fn refresh_archive(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report = state.ingest.refresh().await?;
    Ok(Json(serde_json::to_value(report).unwrap_or_default()))
}

// ── Models ───────────────────────────────────────────────────

pub async fn models(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ModelsParams>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let configured = state.config.env_api_key().is_some() || !state.pool.is_empty();
    let validation = json!({
        "configured": configured,
        "pool_size": state.pool.len(),
    });

    if params.live.unwrap_or(false) {
        let key = key_from_headers(&headers)
            .or_else(|| state.config.env_api_key().map(String::from))
            .ok_or_else(|| AppError::Unauthorized("live model list needs an API key".into()))?;
        let live = state.client.list_models(&key).await.map_err(AppError::from)?;
        let models: Vec<serde_json::Value> = live
            .into_iter()
            .map(|m| json!({ "id": m.id, "name": m.name, "description": m.description }))
            .collect();
        return Ok(Json(json!({ "models": models, "validation": validation })));
    }

    let models = match params.category.as_deref() {
        Some(category) => state.catalog.by_category(category).await?,
        None => state.catalog.list().await?,
    };
    Ok(Json(json!({ "models": models, "validation": validation })))
}

pub async fn refresh_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<ValidateKeyRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let key = body
        .and_then(|Json(b)| b.api_key)
        .or_else(|| key_from_headers(&headers))
        .or_else(|| state.config.env_api_key().map(String::from))
        .ok_or_else(|| AppError::Unauthorized("model refresh needs an API key".into()))?;

    let summary = state.catalog.refresh(&state.client, &key).await?;
    Ok(Json(json!({ "refreshed": summary })))
}

// ── Workflow ─────────────────────────────────────────────────

pub async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateWorkflowRequest>,
) -> Result<Response, AppError> {
    let name = require(body.name, "name")?;
    let speech_ids = require(body.speech_ids, "speechIds")?;
    if speech_ids.is_empty() {
        return Err(AppError::input("speechIds must not be empty"));
    }

    let workflow = state.workflows.create(&name, &speech_ids).await?;
    let body = json!({
        "workflowId": workflow.id,
        "name": workflow.name,
        "status": workflow.status,
        "speechIds": workflow.speech_ids,
        "createdAt": workflow.created_at,
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (workflow, speeches) = state.workflows.get_with_speeches(&id).await?;
    let mut body = serde_json::to_value(&workflow).unwrap_or_default();
    body["speeches"] = serde_json::to_value(&speeches).unwrap_or_default();
    Ok(Json(body))
}

pub async fn upload_script(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UploadScriptRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let workflow_id = require(body.workflow_id, "workflowId")?;
    let script = require(body.script, "script")?;

    let workflow = state.workflows.upload_script(&workflow_id, &script).await?;
    Ok(Json(json!({
        "workflowId": workflow.id,
        "status": workflow.status,
        "scriptChars": script.chars().count(),
    })))
}

pub async fn generate_script(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GenerateScriptRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let workflow_id = require(body.workflow_id, "workflowId")?;
    let model = require(body.model, "model")?;
    if let Some(duration) = body.duration {
        if duration == 0 || duration > 180 {
            return Err(AppError::input("duration must be between 1 and 180 minutes"));
        }
    }

    let mut req = ScriptRequest::new(model);
    if let Some(style) = body.style {
        req.style = style;
    }
    if let Some(duration) = body.duration {
        req.duration_minutes = duration;
    }
    if let Some(batch_size) = body.batch_size {
        if batch_size == 0 {
            return Err(AppError::input("batchSize must be at least 1"));
        }
        req.batch_size = batch_size;
    }
    req.use_swarm = body.use_swarm.unwrap_or(false);
    req.client_key = body.api_key.or_else(|| key_from_headers(&headers));
    req.use_pool = body.use_pool.unwrap_or(true);

    let (workflow, outcome) = state
        .workflows
        .generate_script(&workflow_id, &req)
        .await
        .map_err(|e| attach_pool_stats(e.into(), &state))?;

    Ok(Json(json!({
        "workflowId": workflow.id,
        "status": workflow.status,
        "script": outcome.script,
        "strategy": outcome.strategy,
        "batchProcessed": outcome.batch_processed,
    })))
}

pub async fn generate_audio(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateAudioRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let workflow_id = require(body.workflow_id, "workflowId")?;
    let voice = body.voice.unwrap_or_else(|| "default".into());
    let preset = body.preset.unwrap_or_else(|| "standard".into());
    let custom_voice = body.custom_voice_path.map(std::path::PathBuf::from);

    let (workflow, outcome) = state
        .workflows
        .generate_audio(&workflow_id, &voice, &preset, custom_voice.as_deref())
        .await?;

    Ok(Json(json!({
        "workflowId": workflow.id,
        "status": workflow.status,
        "audioUrl": outcome.audio_url,
        "fallback": outcome.fallback,
        "ttsResult": outcome.tts,
        "error": outcome.error,
    })))
}

pub async fn finalize(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FinalizeRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let workflow_id = require(body.workflow_id, "workflowId")?;
    let local_bundle = body.local_bundle.unwrap_or(true);

    let (workflow, outcome) = state
        .workflows
        .finalize(
            &workflow_id,
            body.title.as_deref(),
            body.description.as_deref(),
            local_bundle,
        )
        .await?;

    Ok(Json(json!({
        "workflowId": workflow.id,
        "status": workflow.status,
        "rssUrl": outcome.rss_url,
        "bundlePath": outcome.bundle_path,
    })))
}

// ── LLM / key management ─────────────────────────────────────

fn verdict_status(code: Option<KeyErrorCode>) -> StatusCode {
    match code {
        None => StatusCode::OK,
        Some(KeyErrorCode::InvalidKey) => StatusCode::UNAUTHORIZED,
        Some(KeyErrorCode::InsufficientPermissions) => StatusCode::FORBIDDEN,
        Some(KeyErrorCode::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        Some(KeyErrorCode::NetworkError) => StatusCode::SERVICE_UNAVAILABLE,
        Some(KeyErrorCode::ValidationFailed) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn validate_openrouter_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<ValidateKeyRequest>>,
) -> Result<Response, AppError> {
    let key = body
        .and_then(|Json(b)| b.api_key)
        .or_else(|| key_from_headers(&headers))
        .ok_or_else(|| AppError::input("missing required field: apiKey"))?;

    let verdict = state.validator.validate(&key).await?;
    let status = verdict_status(verdict.error_code);
    let body = json!({
        "valid": verdict.valid,
        "modelCount": verdict.model_count,
        "cached": verdict.cached,
        "error": verdict.error_code,
    });
    Ok((status, Json(body)).into_response())
}

pub async fn validate_keys(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValidateKeysRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let keys = require(body.api_keys, "apiKeys")?;
    if keys.is_empty() {
        return Err(AppError::input("apiKeys must not be empty"));
    }
    if keys.len() > 10 {
        return Err(AppError::input("at most 10 keys per request"));
    }

    let mut results = Vec::with_capacity(keys.len());
    let mut added = 0usize;
    for key in &keys {
        let verdict = state.validator.validate(key).await?;
        if verdict.valid {
            let priority = ((verdict.model_count / 10).clamp(1, 10)) as u32;
            state.pool.add_key(key.clone(), priority);
            added += 1;
        }
        results.push(json!({
            "keyPrefix": crate::llm::pool::redact_key(key),
            "valid": verdict.valid,
            "modelCount": verdict.model_count,
            "error": verdict.error_code,
            "cached": verdict.cached,
        }));
    }

    Ok(Json(json!({ "results": results, "added": added, "poolSize": state.pool.len() })))
}

pub async fn key_pool_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let stats = state.pool.stats();
    Ok(Json(json!({ "size": stats.len(), "keys": stats })))
}

fn attach_pool_stats(err: AppError, state: &Arc<AppState>) -> AppError {
    match err {
        AppError::RateLimited { message, .. } => AppError::RateLimited {
            message,
            pool_stats: (!state.pool.is_empty()).then(|| state.pool.stats()),
        },
        other => other,
    }
}

pub async fn openrouter_proxy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ProxyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let model = require(body.model, "model")?;
    let messages = require(body.messages, "messages")?;
    if !messages.is_array() {
        return Err(AppError::input("messages must be an array"));
    }

    let mut upstream = json!({ "model": model, "messages": messages });
    if let Some(t) = body.temperature {
        upstream["temperature"] = json!(t);
    }
    if let Some(m) = body.max_tokens {
        upstream["max_tokens"] = json!(m);
    }

    let client_key = body.api_key.or_else(|| key_from_headers(&headers));
    let use_pool = body.use_pool.unwrap_or(true);

    let value = state
        .orchestrator
        .proxy(&upstream, client_key.as_deref(), use_pool)
        .await
        .map_err(|e| attach_pool_stats(AppError::from(e), &state))?;
    Ok(Json(value))
}

// ── Feedback / voices ────────────────────────────────────────

pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewFeedback>,
) -> Result<Response, AppError> {
    for (field, value) in [
        ("overall_rating", body.overall_rating),
        ("script_rating", body.script_rating),
        ("audio_rating", body.audio_rating),
    ] {
        if !(1..=5).contains(&value) {
            return Err(AppError::input(format!("{field} must be between 1 and 5")));
        }
    }

    state.store.insert_feedback(&body).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true }))).into_response())
}

pub async fn list_voices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let voices = state.workflows.list_voices().await?;
    Ok(Json(voices))
}

pub async fn create_voice(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateVoiceRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let name = require(body.name, "name")?;
    let description = body.description.unwrap_or_default();
    let audio_files = require(body.audio_files, "audioFiles")?;
    if audio_files.is_empty() {
        return Err(AppError::input("audioFiles must not be empty"));
    }

    let result = state
        .workflows
        .create_voice(&name, &description, &audio_files)
        .await?;
    Ok(Json(result))
}

/// Resident set size of this process in MB, per the health snapshot.
fn process_rss_mb() -> Option<f64> {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let mut sys = System::new();
    let pid = Pid::from(std::process::id() as usize);
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
    sys.process(pid)
        .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
}
