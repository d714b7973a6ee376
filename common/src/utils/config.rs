use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    /// Base URL of the remote rendering engine (`/generate`, `/edit`, `/status`).
    pub render_engine_url: String,
    /// Location relative video paths returned by the engine are resolved against.
    #[serde(default = "default_artifact_base_url")]
    pub artifact_base_url: String,
    /// The one account allowed to delete from the public gallery.
    #[serde(default)]
    pub admin_email: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on status polls per job; unbounded when unset.
    #[serde(default)]
    pub max_poll_ticks: Option<u32>,
    #[serde(default = "default_engine_timeout_secs")]
    pub engine_timeout_secs: u64,
}

fn default_artifact_base_url() -> String {
    "https://manim-ai-videos.s3.amazonaws.com/".to_string()
}

fn default_poll_interval_ms() -> u64 {
    3_000
}

fn default_engine_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "visuamath".to_string(),
            surrealdb_database: "visuamath".to_string(),
            http_port: 3000,
            render_engine_url: "http://localhost:8000".to_string(),
            artifact_base_url: default_artifact_base_url(),
            admin_email: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_ticks: None,
            engine_timeout_secs: default_engine_timeout_secs(),
        }
    }
}

impl AppConfig {
    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_email
            .as_deref()
            .is_some_and(|admin| admin.eq_ignore_ascii_case(email.trim()))
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
