//! podgen — podcast assembly service for archived political speeches.
//!
//! Library crate so integration tests can build the full application state
//! and router without going through the binary.

use std::sync::Arc;
use std::time::Instant;

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod sources;
pub mod store;
pub mod workflow;

use config::Config;
use ingest::IngestEngine;
use llm::catalog::ModelCatalog;
use llm::client::OpenRouterClient;
use llm::orchestrator::Orchestrator;
use llm::pool::KeyPool;
use llm::validator::KeyValidator;
use sources::SourceRegistry;
use store::Store;
use workflow::tts::TtsWorker;
use workflow::WorkflowEngine;

/// Shared application state passed to handlers and background jobs.
/// Everything here is an explicit dependency constructed at startup; tests
/// build isolated instances over an in-memory store.
pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub ingest: IngestEngine,
    pub pool: Arc<KeyPool>,
    pub orchestrator: Arc<Orchestrator>,
    pub validator: KeyValidator,
    pub catalog: ModelCatalog,
    pub workflows: WorkflowEngine,
    pub client: OpenRouterClient,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the component graph: store (migrated), source registry, key
    /// pool, orchestrator, workflow engine.
    pub async fn build(config: Config) -> anyhow::Result<Arc<Self>> {
        if config.database_url.is_none() {
            tokio::fs::create_dir_all(&config.data_dir).await?;
        }

        let store = Store::connect(&config.database_url()).await?;
        store.migrate().await?;

        let registry = Arc::new(SourceRegistry::from_config(&config));
        let ingest = IngestEngine::new(store.clone(), registry);

        let client = OpenRouterClient::new(config.openrouter_base_url.clone());
        let pool = Arc::new(KeyPool::new());
        let orchestrator = Arc::new(Orchestrator::new(
            client.clone(),
            pool.clone(),
            store.clone(),
            config.env_api_key().map(String::from),
        ));
        let validator = KeyValidator::new(store.clone(), client.clone());
        let catalog = ModelCatalog::new(store.clone());

        let tts = TtsWorker::new(config.tts_bin.clone());
        let workflows = WorkflowEngine::new(
            store.clone(),
            orchestrator.clone(),
            tts,
            config.data_dir.clone(),
        );

        Ok(Arc::new(Self {
            config,
            store,
            ingest,
            pool,
            orchestrator,
            validator,
            catalog,
            workflows,
            client,
            started_at: Instant::now(),
        }))
    }
}
