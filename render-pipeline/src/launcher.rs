use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use common::{
    error::AppError,
    storage::types::render_job::{RenderJob, RenderJobState},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::orchestrator::{JobEvents, JobOutcome, RenderOrchestrator, RenderRequest};

/// Runs orchestrations in the background and keeps a cancellation handle
/// for each job still being polled.
#[derive(Clone)]
pub struct JobLauncher {
    orchestrator: Arc<RenderOrchestrator>,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl JobLauncher {
    pub fn new(orchestrator: Arc<RenderOrchestrator>) -> Self {
        Self {
            orchestrator,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn orchestrator(&self) -> &Arc<RenderOrchestrator> {
        &self.orchestrator
    }

    /// Submit right away and poll in the background. Validation and submit
    /// errors come back to the caller; the returned job is already recorded.
    pub async fn launch(&self, request: RenderRequest) -> Result<RenderJob, AppError> {
        let job = self
            .orchestrator
            .start(request, &JobEvents::discard())
            .await?;
        self.spawn(job.clone());
        Ok(job)
    }

    /// Returns `false` when no poller for `job_id` is running here.
    pub fn cancel(&self, job_id: &str) -> bool {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_id)
    }

    /// Pick up jobs a previous process left in `Polling`.
    pub async fn resume_unfinished(&self) -> Result<usize, AppError> {
        let unfinished = RenderJob::get_unfinished(self.orchestrator.store().db()).await?;
        let mut resumed = 0_usize;
        for job in unfinished {
            if self.is_running(&job.id) {
                continue;
            }
            info!(job_id = %job.id, kind = ?job.kind, "resuming render job");
            self.spawn(job);
            resumed = resumed.saturating_add(1);
        }
        Ok(resumed)
    }

    fn spawn(&self, job: RenderJob) {
        if job.state != RenderJobState::Polling {
            warn!(job_id = %job.id, state = job.state.as_str(), "not polling a finished job");
            return;
        }

        let token = CancellationToken::new();
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.id.clone(), token.clone());

        let orchestrator = Arc::clone(&self.orchestrator);
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let job_id = job.id.clone();
            let result = orchestrator
                .observe(job, &JobEvents::discard(), &token)
                .await;
            running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&job_id);

            match result {
                Ok(JobOutcome::Completed { .. }) => info!(%job_id, "background render finished"),
                Ok(outcome) => info!(%job_id, ?outcome, "background render ended"),
                Err(err) => error!(%job_id, error = %err, "background render failed"),
            }
        });
    }
}
