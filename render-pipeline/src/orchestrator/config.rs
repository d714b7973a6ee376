use std::time::Duration;

use common::{error::AppError, utils::config::AppConfig};
use url::Url;

#[derive(Debug, Clone)]
pub struct RenderTuning {
    pub poll_interval: Duration,
    /// Status polls allowed per job before it is failed as timed out.
    pub max_ticks: Option<u32>,
    pub max_duration: Option<Duration>,
}

impl Default for RenderTuning {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            max_ticks: None,
            max_duration: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub tuning: RenderTuning,
    /// Always ends with `/` so relative video paths join beneath it.
    pub artifact_base_url: Url,
}

impl RenderConfig {
    pub fn new(tuning: RenderTuning, artifact_base_url: &str) -> Result<Self, AppError> {
        let mut artifact_base_url = Url::parse(artifact_base_url)?;
        if !artifact_base_url.path().ends_with('/') {
            let path = format!("{}/", artifact_base_url.path());
            artifact_base_url.set_path(&path);
        }

        Ok(Self {
            tuning,
            artifact_base_url,
        })
    }

    pub fn from_app_config(config: &AppConfig) -> Result<Self, AppError> {
        let tuning = RenderTuning {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_ticks: config.max_poll_ticks,
            ..RenderTuning::default()
        };
        Self::new(tuning, &config.artifact_base_url)
    }
}
