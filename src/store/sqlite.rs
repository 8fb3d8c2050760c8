use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

/// Storage failures with a machine-readable subkind. Nothing is swallowed:
/// callers decide whether a `NotFound` is a 404 or a precondition failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Io(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn subkind(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::Conflict(_) => "conflict",
            StoreError::Io(_) | StoreError::Migrate(_) => "io",
        }
    }
}

// ── Records ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Speech {
    pub id: String,
    pub title: String,
    pub date: Option<String>,
    pub source: String,
    pub rally_location: Option<String>,
    pub video_url: Option<String>,
    pub audio_url: Option<String>,
    pub transcript_url: Option<String>,
    pub transcript: Option<String>,
    pub duration: Option<String>,
    pub thumbnail_url: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A normalized record as produced by a source adapter, before it has
/// store-managed timestamps. `id` must already carry the source prefix.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSpeech {
    pub id: String,
    pub title: String,
    pub date: Option<String>,
    pub source: String,
    pub rally_location: Option<String>,
    pub video_url: Option<String>,
    pub audio_url: Option<String>,
    pub transcript_url: Option<String>,
    pub transcript: Option<String>,
    pub duration: Option<String>,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    ScriptGenerated,
    ScriptUploaded,
    AudioGenerated,
    Finalized,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::ScriptGenerated => "script_generated",
            WorkflowStatus::ScriptUploaded => "script_uploaded",
            WorkflowStatus::AudioGenerated => "audio_generated",
            WorkflowStatus::Finalized => "finalized",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(WorkflowStatus::Draft),
            "script_generated" => Some(WorkflowStatus::ScriptGenerated),
            "script_uploaded" => Some(WorkflowStatus::ScriptUploaded),
            "audio_generated" => Some(WorkflowStatus::AudioGenerated),
            "finalized" => Some(WorkflowStatus::Finalized),
            _ => None,
        }
    }

    /// Both script states are equivalent entry points into the audio stage.
    pub fn has_script(self) -> bool {
        matches!(
            self,
            WorkflowStatus::ScriptGenerated
                | WorkflowStatus::ScriptUploaded
                | WorkflowStatus::AudioGenerated
                | WorkflowStatus::Finalized
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub speech_ids: Vec<String>,
    pub script: Option<String>,
    pub audio_url: Option<String>,
    pub rss_url: Option<String>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: String,
    name: String,
    speech_ids: String,
    script: Option<String>,
    audio_url: Option<String>,
    rss_url: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = StoreError;

    fn try_from(row: WorkflowRow) -> Result<Self, StoreError> {
        let speech_ids: Vec<String> = serde_json::from_str(&row.speech_ids)
            .map_err(|e| StoreError::Io(sqlx::Error::Decode(Box::new(e))))?;
        let status = WorkflowStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Io(sqlx::Error::Decode(
                format!("unknown workflow status '{}'", row.status).into(),
            ))
        })?;
        Ok(Workflow {
            id: row.id,
            name: row.name,
            speech_ids,
            script: row.script,
            audio_url: row.audio_url,
            rss_url: row.rss_url,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Partial update of a workflow's mutable fields. `None` leaves a field as-is.
#[derive(Debug, Default, Clone)]
pub struct WorkflowPatch {
    pub name: Option<String>,
    pub script: Option<String>,
    pub audio_url: Option<String>,
    pub rss_url: Option<String>,
    pub status: Option<WorkflowStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CuratedModel {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub description: String,
    pub category: String,
    pub performance_score: f64,
    pub usage_count: i64,
    pub avg_response_time: f64,
    pub success_rate: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct KeyValidation {
    pub key_hash: String,
    pub is_valid: bool,
    pub model_count: i64,
    pub error_code: Option<String>,
    pub validated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFeedback {
    pub overall_rating: i64,
    pub script_rating: i64,
    pub audio_rating: i64,
    pub comments: Option<String>,
    pub recommend: bool,
    pub session_id: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct SearchFilter {
    pub keyword: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl SearchFilter {
    /// Clamp limit to [1, 100] (default 50) and offset to [0, ∞).
    pub fn clamped(mut self) -> Self {
        if self.limit == 0 {
            self.limit = 50;
        }
        self.limit = self.limit.clamp(1, 100);
        self.offset = self.offset.max(0);
        self
    }
}

// ── Store ────────────────────────────────────────────────────

/// Single-writer embedded catalog store. All persistent records live here;
/// other components hold transient references only.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        // One connection keeps the write path serial; reads are sub-millisecond
        // and WAL keeps them from blocking behind the writer on file-backed DBs.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect_with(opts)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run embedded migrations. Safe on a fresh database and on restart.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    // ── Speeches ─────────────────────────────────────────────

    /// Insert-or-replace by id. Returns how many rows were newly inserted.
    /// Re-ingesting an existing item updates its metadata but preserves
    /// `status` and `created_at`.
    pub async fn upsert_speeches(&self, records: &[NewSpeech]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        let now = Utc::now();

        for rec in records {
            let exists: Option<String> =
                sqlx::query_scalar("SELECT id FROM speeches WHERE id = ?")
                    .bind(&rec.id)
                    .fetch_optional(&mut *tx)
                    .await?;

            if exists.is_some() {
                sqlx::query(
                    r#"UPDATE speeches
                       SET title = ?, date = ?, source = ?, rally_location = ?,
                           video_url = ?, audio_url = ?, transcript_url = ?,
                           transcript = ?, duration = ?, thumbnail_url = ?,
                           updated_at = ?
                       WHERE id = ?"#,
                )
                .bind(&rec.title)
                .bind(&rec.date)
                .bind(&rec.source)
                .bind(&rec.rally_location)
                .bind(&rec.video_url)
                .bind(&rec.audio_url)
                .bind(&rec.transcript_url)
                .bind(&rec.transcript)
                .bind(&rec.duration)
                .bind(&rec.thumbnail_url)
                .bind(now)
                .bind(&rec.id)
                .execute(&mut *tx)
                .await?;
            } else {
                sqlx::query(
                    r#"INSERT INTO speeches
                       (id, title, date, source, rally_location, video_url, audio_url,
                        transcript_url, transcript, duration, thumbnail_url, status,
                        created_at, updated_at)
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)"#,
                )
                .bind(&rec.id)
                .bind(&rec.title)
                .bind(&rec.date)
                .bind(&rec.source)
                .bind(&rec.rally_location)
                .bind(&rec.video_url)
                .bind(&rec.audio_url)
                .bind(&rec.transcript_url)
                .bind(&rec.transcript)
                .bind(&rec.duration)
                .bind(&rec.thumbnail_url)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Substring search over title ∪ transcript ∪ rally_location with
    /// inclusive date bounds. Order: `date DESC` with nulls last, ties
    /// broken by `id ASC`. Returns `(page, unpaginated_total)`.
    pub async fn search_speeches(
        &self,
        filter: &SearchFilter,
    ) -> Result<(Vec<Speech>, i64), StoreError> {
        let filter = filter.clone().clamped();
        let keyword = filter.keyword.as_ref().map(|k| k.to_lowercase());

        const WHERE: &str = r#"
            status = 'active'
            AND (?1 IS NULL
                 OR lower(title) LIKE '%' || ?1 || '%'
                 OR lower(COALESCE(transcript, '')) LIKE '%' || ?1 || '%'
                 OR lower(COALESCE(rally_location, '')) LIKE '%' || ?1 || '%')
            AND (?2 IS NULL OR (date IS NOT NULL AND date >= ?2))
            AND (?3 IS NULL OR (date IS NOT NULL AND date <= ?3))
        "#;

        let rows: Vec<Speech> = sqlx::query_as(&format!(
            r#"SELECT * FROM speeches
               WHERE {WHERE}
               ORDER BY date IS NULL, date DESC, id ASC
               LIMIT ?4 OFFSET ?5"#
        ))
        .bind(&keyword)
        .bind(&filter.start_date)
        .bind(&filter.end_date)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM speeches WHERE {WHERE}"))
                .bind(&keyword)
                .bind(&filter.start_date)
                .bind(&filter.end_date)
                .fetch_one(&self.pool)
                .await?;

        Ok((rows, total))
    }

    pub async fn count_speeches(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM speeches")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn speech_counts_by_source(&self) -> Result<Vec<(String, i64)>, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT source, COUNT(*) FROM speeches GROUP BY source")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    /// Resolve speech ids in caller order. Missing ids come back separately
    /// so transition preconditions can name them.
    pub async fn resolve_speeches(
        &self,
        ids: &[String],
    ) -> Result<(Vec<Speech>, Vec<String>), StoreError> {
        let mut found = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            let row: Option<Speech> = sqlx::query_as("SELECT * FROM speeches WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            match row {
                Some(s) => found.push(s),
                None => missing.push(id.clone()),
            }
        }
        Ok((found, missing))
    }

    // ── Workflows ────────────────────────────────────────────

    pub async fn create_workflow(
        &self,
        name: &str,
        speech_ids: &[String],
    ) -> Result<Workflow, StoreError> {
        let id = format!("wf_{}", uuid::Uuid::new_v4().simple());
        let now = Utc::now();
        let ids_json = serde_json::to_string(speech_ids)
            .map_err(|e| StoreError::Io(sqlx::Error::Encode(Box::new(e))))?;

        sqlx::query(
            r#"INSERT INTO workflows (id, name, speech_ids, status, created_at, updated_at)
               VALUES (?, ?, ?, 'draft', ?, ?)"#,
        )
        .bind(&id)
        .bind(name)
        .bind(&ids_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_workflow(&id).await
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Workflow, StoreError> {
        let row: Option<WorkflowRow> = sqlx::query_as("SELECT * FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| StoreError::NotFound(format!("workflow {id}")))?
            .try_into()
    }

    /// Partial update; bumps `updated_at`. Fields left `None` are untouched.
    pub async fn update_workflow(
        &self,
        id: &str,
        patch: &WorkflowPatch,
    ) -> Result<Workflow, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"UPDATE workflows SET
                   name = COALESCE(?, name),
                   script = COALESCE(?, script),
                   audio_url = COALESCE(?, audio_url),
                   rss_url = COALESCE(?, rss_url),
                   status = COALESCE(?, status),
                   updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&patch.name)
        .bind(&patch.script)
        .bind(&patch.audio_url)
        .bind(&patch.rss_url)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("workflow {id}")));
        }
        self.get_workflow(id).await
    }

    pub async fn count_workflows(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM workflows")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ── Curated models ───────────────────────────────────────

    pub async fn curated_models_by(&self, category: &str) -> Result<Vec<CuratedModel>, StoreError> {
        let rows: Vec<CuratedModel> = sqlx::query_as(
            r#"SELECT * FROM curated_models WHERE category = ?
               ORDER BY performance_score DESC, usage_count DESC"#,
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_curated_models(&self) -> Result<Vec<CuratedModel>, StoreError> {
        let rows: Vec<CuratedModel> = sqlx::query_as(
            "SELECT * FROM curated_models ORDER BY performance_score DESC, usage_count DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Insert or refresh a catalog entry. Usage counters survive a refresh.
    pub async fn upsert_curated_model(&self, model: &CuratedModel) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO curated_models
               (id, name, provider, description, category, performance_score,
                usage_count, avg_response_time, success_rate, last_used,
                created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   provider = excluded.provider,
                   description = excluded.description,
                   category = excluded.category,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&model.id)
        .bind(&model.name)
        .bind(&model.provider)
        .bind(&model.description)
        .bind(&model.category)
        .bind(model.performance_score)
        .bind(model.usage_count)
        .bind(model.avg_response_time)
        .bind(model.success_rate)
        .bind(model.last_used)
        .bind(model.created_at)
        .bind(model.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Post-call bookkeeping: bump usage, fold the observation into the
    /// running averages, then re-derive the 0–10 performance score.
    pub async fn record_model_use(
        &self,
        model_id: &str,
        response_time_secs: f64,
        success: bool,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let success_val = if success { 1.0f64 } else { 0.0f64 };
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"UPDATE curated_models SET
                   avg_response_time =
                       (avg_response_time * usage_count + ?) / (usage_count + 1),
                   success_rate =
                       (success_rate * usage_count + ?) / (usage_count + 1),
                   usage_count = usage_count + 1,
                   last_used = ?,
                   updated_at = ?
               WHERE id = ?"#,
        )
        .bind(response_time_secs)
        .bind(success_val)
        .bind(now)
        .bind(now)
        .bind(model_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"UPDATE curated_models
               SET performance_score = MAX(0.0, MIN(10.0, success_rate * 10.0 - avg_response_time))
               WHERE id = ?"#,
        )
        .bind(model_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // ── Key validation cache ─────────────────────────────────

    pub async fn cache_key_validation(
        &self,
        key_hash: &str,
        is_valid: bool,
        model_count: i64,
        error_code: Option<&str>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let expires = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1));
        sqlx::query(
            r#"INSERT INTO key_validations
               (key_hash, is_valid, model_count, error_code, validated_at, expires_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(key_hash) DO UPDATE SET
                   is_valid = excluded.is_valid,
                   model_count = excluded.model_count,
                   error_code = excluded.error_code,
                   validated_at = excluded.validated_at,
                   expires_at = excluded.expires_at"#,
        )
        .bind(key_hash)
        .bind(is_valid)
        .bind(model_count)
        .bind(error_code)
        .bind(now)
        .bind(expires)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cache hit only while `expires_at > now`; expired rows are dropped.
    pub async fn lookup_key_validation(
        &self,
        key_hash: &str,
    ) -> Result<Option<KeyValidation>, StoreError> {
        let row: Option<KeyValidation> =
            sqlx::query_as("SELECT * FROM key_validations WHERE key_hash = ?")
                .bind(key_hash)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(v) if v.expires_at > Utc::now() => Ok(Some(v)),
            Some(_) => {
                sqlx::query("DELETE FROM key_validations WHERE key_hash = ?")
                    .bind(key_hash)
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    // ── Events ───────────────────────────────────────────────

    pub async fn append_event(
        &self,
        event_type: &str,
        data: &serde_json::Value,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO events (event_type, data, ip, user_agent, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(event_type)
        .bind(data.to_string())
        .bind(ip)
        .bind(user_agent)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_events_older_than(&self, days: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let result = sqlx::query("DELETE FROM events WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_events(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ── Feedback ─────────────────────────────────────────────

    pub async fn insert_feedback(&self, fb: &NewFeedback) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO feedback
               (overall_rating, script_rating, audio_rating, comments, recommend,
                session_id, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(fb.overall_rating)
        .bind(fb.script_rating)
        .bind(fb.audio_rating)
        .bind(&fb.comments)
        .bind(fb.recommend)
        .bind(&fb.session_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────
