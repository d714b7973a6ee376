#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod classifier;
pub mod engine;
pub mod launcher;
pub mod orchestrator;

use std::sync::Arc;

use common::{
    error::AppError, storage::version_store::VersionStore, utils::config::AppConfig,
};
pub use launcher::JobLauncher;
pub use orchestrator::{JobEvent, JobEvents, JobOutcome, RenderOrchestrator, RenderRequest};

use engine::HttpRenderEngine;
use orchestrator::RenderConfig;

/// Wire the HTTP engine client, the orchestrator and the launcher from config.
pub fn build_launcher(config: &AppConfig, store: VersionStore) -> Result<JobLauncher, AppError> {
    let engine = Arc::new(HttpRenderEngine::from_config(config)?);
    let render_config = RenderConfig::from_app_config(config)?;
    let orchestrator = RenderOrchestrator::new(store, engine, render_config);

    Ok(JobLauncher::new(Arc::new(orchestrator)))
}
