//! Curated model catalog maintenance.
//!
//! The table is seeded by migration; `refresh` folds the live provider list
//! into the `top_free` / `discovered` tiers. Usage counters and scores are
//! owned by the orchestrator's post-call hook and survive refreshes.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::store::{CuratedModel, Store, StoreError};

use super::client::{ModelInfo, OpenRouterClient};
use super::LlmError;

/// Keep refreshes bounded; the provider catalog runs to hundreds of entries.
const MAX_DISCOVERED: usize = 25;
const MAX_FREE: usize = 15;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub free: usize,
    pub discovered: usize,
}

pub struct ModelCatalog {
    store: Store,
}

fn is_free(info: &ModelInfo) -> bool {
    if info.id.ends_with(":free") {
        return true;
    }
    info.pricing
        .as_ref()
        .and_then(|p| p.prompt.as_deref())
        .map(|p| p.trim_start_matches('$') == "0" || p == "0.0")
        .unwrap_or(false)
}

impl ModelCatalog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<CuratedModel>, StoreError> {
        self.store.list_curated_models().await
    }

    pub async fn by_category(&self, category: &str) -> Result<Vec<CuratedModel>, StoreError> {
        self.store.curated_models_by(category).await
    }

    /// Pull the live provider catalog and upsert the refreshable tiers.
    pub async fn refresh(
        &self,
        client: &OpenRouterClient,
        api_key: &str,
    ) -> Result<RefreshSummary, CatalogError> {
        let models = client.list_models(api_key).await?;
        let now = Utc::now();

        let mut free = 0usize;
        let mut discovered = 0usize;
        for info in models {
            let category = if is_free(&info) {
                if free >= MAX_FREE {
                    continue;
                }
                free += 1;
                "top_free"
            } else {
                if discovered >= MAX_DISCOVERED {
                    continue;
                }
                discovered += 1;
                "discovered"
            };

            let provider = info.id.split('/').next().unwrap_or("unknown").to_string();
            let entry = CuratedModel {
                name: info.name.unwrap_or_else(|| info.id.clone()),
                id: info.id,
                provider,
                description: info.description.unwrap_or_default(),
                category: category.into(),
                performance_score: if category == "top_free" { 4.0 } else { 5.0 },
                usage_count: 0,
                avg_response_time: 0.0,
                success_rate: 1.0,
                last_used: None,
                created_at: now,
                updated_at: now,
            };
            self.store.upsert_curated_model(&entry).await?;
        }

        tracing::info!(free, discovered, "curated model tiers refreshed");
        Ok(RefreshSummary { free, discovered })
    }
}
