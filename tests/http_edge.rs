//! Request-edge tests: input validation, response shaping, and the error
//! envelope, driven through the router with an in-memory store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use podgen::config::Config;
use podgen::store::NewSpeech;
use podgen::AppState;
use tower::util::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(data_dir: &std::path::Path, provider_base: &str, env_key: Option<&str>) -> Config {
    Config {
        port: 0,
        data_dir: data_dir.to_path_buf(),
        database_url: Some("sqlite::memory:".into()),
        openrouter_api_key: env_key.map(String::from),
        openrouter_test_key: None,
        youtube_api_key: None,
        jwt_secret: None,
        default_admin_password: None,
        production: false,
        subject: "Donald Trump".into(),
        tts_bin: "tts-worker".into(),
        event_retention_days: 30,
        openrouter_base_url: provider_base.into(),
    }
}

async fn app(provider_base: &str, env_key: Option<&str>) -> (Arc<AppState>, axum::Router) {
    let tmp = tempfile::tempdir().unwrap();
    let state = AppState::build(test_config(tmp.path(), provider_base, env_key))
        .await
        .unwrap();
    // Keep the tempdir alive for the duration of the test process.
    std::mem::forget(tmp);
    let router = podgen::api::router(state.clone());
    (state, router)
}

async fn seed_speeches(state: &Arc<AppState>) {
    state
        .store
        .upsert_speeches(&[
            NewSpeech {
                id: "archive_a".into(),
                title: "Rally in Phoenix, AZ".into(),
                date: Some("2020-02-19".into()),
                source: "archive".into(),
                ..NewSpeech::default()
            },
            NewSpeech {
                id: "archive_b".into(),
                title: "Address".into(),
                date: None,
                source: "archive".into(),
                ..NewSpeech::default()
            },
        ])
        .await
        .unwrap();
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn search_orders_and_filters() {
    let server = MockServer::start().await;
    let (state, router) = app(&server.uri(), None).await;
    seed_speeches(&state).await;

    let res = router.clone().oneshot(get("/api/search")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["pagination"]["total"], 2);
    assert_eq!(body["results"][0]["id"], "archive_a");
    assert_eq!(body["results"][1]["id"], "archive_b");
    assert_eq!(body["pagination"]["hasMore"], false);

    let res = router
        .clone()
        .oneshot(get("/api/search?keyword=phoenix"))
        .await
        .unwrap();
    let body = json_body(res).await;
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["results"][0]["id"], "archive_a");
}

#[tokio::test]
async fn search_clamps_limit_and_offset() {
    let server = MockServer::start().await;
    let (state, router) = app(&server.uri(), None).await;
    seed_speeches(&state).await;

    let res = router
        .clone()
        .oneshot(get("/api/search?limit=1000&offset=0"))
        .await
        .unwrap();
    let body = json_body(res).await;
    assert_eq!(body["pagination"]["limit"], 100);
}

#[tokio::test]
async fn create_workflow_validates_speech_ids() {
    let server = MockServer::start().await;
    let (_state, router) = app(&server.uri(), None).await;

    let res = router
        .clone()
        .oneshot(post_json(
            "/api/workflow",
            serde_json::json!({"name": "W1", "speechIds": []}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = json_body(res).await;
    assert_eq!(body["error"], "invalid_input");

    let res = router
        .clone()
        .oneshot(post_json(
            "/api/workflow",
            serde_json::json!({"name": "W1", "speechIds": ["archive_a"]}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body = json_body(res).await;
    assert_eq!(body["status"], "draft");
    assert!(body["workflowId"].as_str().unwrap().starts_with("wf_"));
}

#[tokio::test]
async fn missing_workflow_is_404() {
    let server = MockServer::start().await;
    let (_state, router) = app(&server.uri(), None).await;

    let res = router
        .clone()
        .oneshot(get("/api/workflow/wf_missing"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body = json_body(res).await;
    assert_eq!(body["error"], "not_found");

    let res = router
        .clone()
        .oneshot(post_json(
            "/api/upload-script",
            serde_json::json!({"workflowId": "wf_missing", "script": "text"}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_script_rejects_oversize_and_empty() {
    let server = MockServer::start().await;
    let (state, router) = app(&server.uri(), None).await;
    seed_speeches(&state).await;

    let wf = state
        .workflows
        .create("W1", &["archive_a".into()])
        .await
        .unwrap();

    let res = router
        .clone()
        .oneshot(post_json(
            "/api/upload-script",
            serde_json::json!({"workflowId": wf.id, "script": ""}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let oversize = "a".repeat(50_001);
    let res = router
        .clone()
        .oneshot(post_json(
            "/api/upload-script",
            serde_json::json!({"workflowId": wf.id, "script": oversize}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let at_cap = "a".repeat(50_000);
    let res = router
        .clone()
        .oneshot(post_json(
            "/api/upload-script",
            serde_json::json!({"workflowId": wf.id, "script": at_cap}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["status"], "script_uploaded");
}

#[tokio::test]
async fn generate_script_single_strategy_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "A script."}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (state, router) = app(&server.uri(), Some("sk-or-env")).await;
    seed_speeches(&state).await;
    let wf = state
        .workflows
        .create("W1", &["archive_a".into()])
        .await
        .unwrap();

    let res = router
        .clone()
        .oneshot(post_json(
            "/api/generate-script",
            serde_json::json!({
                "workflowId": wf.id,
                "model": "x/y",
                "style": "professional",
                "duration": 5
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["status"], "script_generated");
    assert_eq!(body["batchProcessed"], false);
    assert_eq!(body["script"], "A script.");

    let stored = state.store.get_workflow(&wf.id).await.unwrap();
    assert_eq!(stored.script.as_deref(), Some("A script."));
}

#[tokio::test]
async fn generate_script_requires_model() {
    let server = MockServer::start().await;
    let (_state, router) = app(&server.uri(), None).await;

    let res = router
        .clone()
        .oneshot(post_json(
            "/api/generate-script",
            serde_json::json!({"workflowId": "wf_x"}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = json_body(res).await;
    assert_eq!(body["error"], "invalid_input");
    assert!(body["message"].as_str().unwrap().contains("model"));
}

#[tokio::test]
async fn validate_keys_bulk_adds_valid_keys_to_pool() {
    let server = MockServer::start().await;
    // 42 models → priority 4.
    let models: Vec<serde_json::Value> = (0..42)
        .map(|i| serde_json::json!({"id": format!("m/{i}")}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": models})))
        .mount(&server)
        .await;

    let (state, router) = app(&server.uri(), None).await;

    let res = router
        .clone()
        .oneshot(post_json(
            "/api/validate-keys",
            serde_json::json!({"apiKeys": ["sk-or-v1-good", "not-a-key"]}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["added"], 1);
    assert_eq!(body["poolSize"], 1);
    assert_eq!(body["results"][0]["valid"], true);
    assert_eq!(body["results"][1]["valid"], false);

    let stats = state.pool.stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].priority, 4);

    // Pool status endpoint reflects the addition, key redacted.
    let res = router.clone().oneshot(get("/api/key-pool-status")).await.unwrap();
    let body = json_body(res).await;
    assert_eq!(body["size"], 1);
    let prefix = body["keys"][0]["key_prefix"].as_str().unwrap();
    assert!(prefix.starts_with("sk-or-v1"));
    assert!(!prefix.contains("good"));
}

#[tokio::test]
async fn validate_keys_caps_batch_at_ten() {
    let server = MockServer::start().await;
    let (_state, router) = app(&server.uri(), None).await;

    let keys: Vec<String> = (0..11).map(|i| format!("sk-or-{i}")).collect();
    let res = router
        .clone()
        .oneshot(post_json(
            "/api/validate-keys",
            serde_json::json!({"apiKeys": keys}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn proxy_rate_limit_maps_to_429_with_pool_stats() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let (state, router) = app(&server.uri(), None).await;
    state.pool.add_key("sk-or-k1", 10);

    let res = router
        .clone()
        .oneshot(post_json(
            "/api/openrouter",
            serde_json::json!({
                "model": "x/y",
                "messages": [{"role": "user", "content": "hi"}]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        res.headers().get("retry-after").unwrap().to_str().unwrap(),
        "60"
    );
    let body = json_body(res).await;
    assert_eq!(body["error"], "rate_limited");
    assert!(body["pool"].is_array());

    // The pool key is now cooling down.
    assert!(state.pool.stats()[0].rate_limited);
}

#[tokio::test]
async fn proxy_requires_model_and_messages() {
    let server = MockServer::start().await;
    let (_state, router) = app(&server.uri(), None).await;

    let res = router
        .clone()
        .oneshot(post_json(
            "/api/openrouter",
            serde_json::json!({"model": "x/y"}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn feedback_validates_rating_range() {
    let server = MockServer::start().await;
    let (_state, router) = app(&server.uri(), None).await;

    let res = router
        .clone()
        .oneshot(post_json(
            "/api/feedback",
            serde_json::json!({
                "overall_rating": 6,
                "script_rating": 3,
                "audio_rating": 3,
                "recommend": true
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = router
        .clone()
        .oneshot(post_json(
            "/api/feedback",
            serde_json::json!({
                "overall_rating": 5,
                "script_rating": 4,
                "audio_rating": 3,
                "comments": "solid",
                "recommend": true,
                "session_id": "abc"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn health_reports_ok_with_counts() {
    let server = MockServer::start().await;
    let (state, router) = app(&server.uri(), None).await;
    seed_speeches(&state).await;

    let res = router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db"], true);
    assert_eq!(body["counts"]["speeches"], 2);
}

#[tokio::test]
async fn requests_append_to_event_log() {
    let server = MockServer::start().await;
    let (state, router) = app(&server.uri(), None).await;

    let before = state.store.count_events().await.unwrap();
    router.clone().oneshot(get("/api/search")).await.unwrap();
    let after = state.store.count_events().await.unwrap();
    assert_eq!(after, before + 1);
}

#[tokio::test]
async fn models_endpoint_returns_curated_seed_with_validation() {
    let server = MockServer::start().await;
    let (_state, router) = app(&server.uri(), None).await;

    let res = router.clone().oneshot(get("/api/models")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert!(!body["models"].as_array().unwrap().is_empty());
    assert_eq!(body["validation"]["configured"], false);

    let res = router
        .clone()
        .oneshot(get("/api/models?category=top_free"))
        .await
        .unwrap();
    let body = json_body(res).await;
    for model in body["models"].as_array().unwrap() {
        assert_eq!(model["category"], "top_free");
    }
}
