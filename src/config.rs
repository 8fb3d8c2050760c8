use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Root of the on-disk layout: archive.db, audio/, rss/, bundles/.
    pub data_dir: PathBuf,
    /// Overrides the default `sqlite://<data_dir>/archive.db` when set.
    pub database_url: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub openrouter_test_key: Option<String>,
    pub youtube_api_key: Option<String>,
    /// Recognized for compatibility; session issuance is handled elsewhere.
    pub jwt_secret: Option<String>,
    pub default_admin_password: Option<String>,
    /// NODE_ENV == "production" suppresses error message detail.
    pub production: bool,
    /// Subject name the C-SPAN adapter filters titles against.
    pub subject: String,
    /// TTS worker executable. Looked up on PATH when relative.
    pub tts_bin: PathBuf,
    /// Event log retention window in days.
    pub event_retention_days: i64,
    /// OpenRouter API base. Overridable so tests can point at a stub server.
    pub openrouter_base_url: String,
}

impl Config {
    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!("sqlite://{}", self.data_dir.join("archive.db").display()),
        }
    }

    /// Environment key used when neither the client nor the pool supplies one.
    pub fn env_api_key(&self) -> Option<&str> {
        self.openrouter_api_key
            .as_deref()
            .or(self.openrouter_test_key.as_deref())
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let production = std::env::var("NODE_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let data_dir: PathBuf = std::env::var("PODGEN_DATA_DIR")
        .unwrap_or_else(|_| "./data".into())
        .into();

    Ok(Config {
        port: std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000),
        data_dir,
        database_url: std::env::var("DATABASE_URL").ok(),
        openrouter_api_key: std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|v| !v.is_empty()),
        openrouter_test_key: std::env::var("OPENROUTER_TEST_KEY")
            .ok()
            .filter(|v| !v.is_empty()),
        youtube_api_key: std::env::var("YOUTUBE_API_KEY")
            .ok()
            .filter(|v| !v.is_empty()),
        jwt_secret: std::env::var("JWT_SECRET").ok(),
        default_admin_password: std::env::var("DEFAULT_ADMIN_PASSWORD").ok(),
        production,
        subject: std::env::var("PODGEN_SUBJECT").unwrap_or_else(|_| "Donald Trump".into()),
        tts_bin: std::env::var("PODGEN_TTS_BIN")
            .unwrap_or_else(|_| "tts-worker".into())
            .into(),
        event_retention_days: std::env::var("PODGEN_EVENT_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30),
        openrouter_base_url: std::env::var("OPENROUTER_BASE_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".into()),
    })
}
