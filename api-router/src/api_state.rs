use std::sync::Arc;

use common::{
    storage::{db::SurrealDbClient, version_store::VersionStore},
    utils::config::AppConfig,
};
use render_pipeline::{build_launcher, JobLauncher};

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub versions: VersionStore,
    pub launcher: JobLauncher,
}

impl ApiState {
    pub async fn new(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let surreal_db_client = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );

        surreal_db_client.ensure_initialized().await?;

        let versions = VersionStore::new(surreal_db_client.clone());
        let launcher = build_launcher(config, versions)?;

        Ok(Self::with_launcher(surreal_db_client, config.clone(), launcher))
    }

    /// Build the state around an existing launcher so routes and background
    /// jobs share one version store.
    pub fn with_launcher(db: Arc<SurrealDbClient>, config: AppConfig, launcher: JobLauncher) -> Self {
        let versions = launcher.orchestrator().store().clone();
        Self {
            db,
            config,
            versions,
            launcher,
        }
    }
}
