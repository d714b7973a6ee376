mod config;
mod events;
mod state;

pub use config::{RenderConfig, RenderTuning};
pub use events::{JobEvent, JobEvents};
pub use state::JobPhase;

use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        types::{
            artifact::{Artifact, ArtifactPatch, ArtifactStatus},
            render_job::{JobKind, RenderJob},
        },
        version_store::VersionStore,
    },
};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use self::state::{advance, PhaseEvent};
use crate::{
    classifier::{classify_failure, Classification},
    engine::{EngineStatus, JobRequest, RenderEngine, StatusReport},
};

/// What the caller wants rendered. `edit_of` names the video being edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub prompt: String,
    pub user_id: Option<String>,
    pub edit_of: Option<String>,
}

impl RenderRequest {
    pub fn generate(prompt: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            prompt: prompt.into(),
            user_id,
            edit_of: None,
        }
    }

    pub fn edit(
        prompt: impl Into<String>,
        user_id: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            user_id: Some(user_id.into()),
            edit_of: Some(source_id.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed {
        job_id: String,
        artifact: Artifact,
    },
    /// `job_id` is `None` when the engine never accepted the job.
    Failed {
        job_id: Option<String>,
        classification: Classification,
    },
    Cancelled {
        job_id: String,
    },
}

impl JobOutcome {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobOutcome::Completed { job_id, .. } | JobOutcome::Cancelled { job_id } => {
                Some(job_id)
            }
            JobOutcome::Failed { job_id, .. } => job_id.as_deref(),
        }
    }
}

/// Drives one job from submission to a terminal state and writes the result
/// to the version store exactly once.
pub struct RenderOrchestrator {
    store: VersionStore,
    engine: Arc<dyn RenderEngine>,
    config: RenderConfig,
}

impl RenderOrchestrator {
    pub fn new(store: VersionStore, engine: Arc<dyn RenderEngine>, config: RenderConfig) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Submit and observe until done. A refused submission is reported as a
    /// `SUBMIT_ERROR` outcome; bad input is an error.
    pub async fn run(
        &self,
        request: RenderRequest,
        events: &JobEvents,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, AppError> {
        match self.start(request, events).await {
            Ok(job) => self.observe(job, events, cancel).await,
            Err(AppError::Submit(_) | AppError::Transport(_)) => Ok(JobOutcome::Failed {
                job_id: None,
                classification: Classification::submit_failure(),
            }),
            Err(err) => Err(err),
        }
    }

    /// Validate the request, hand it to the engine and record the issued job
    /// id before anything is polled.
    #[instrument(
        skip_all,
        fields(
            user_id = request.user_id.as_deref().unwrap_or("anonymous"),
            edit_of = request.edit_of.as_deref().unwrap_or("")
        )
    )]
    pub async fn start(
        &self,
        request: RenderRequest,
        events: &JobEvents,
    ) -> Result<RenderJob, AppError> {
        let prompt = request.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(AppError::Validation("Prompt must not be empty".into()));
        }

        let source = match request.edit_of.as_deref() {
            Some(source_id) => Some(
                self.load_source(source_id, request.user_id.as_deref())
                    .await?,
            ),
            None => None,
        };
        let (kind, job_request) = match source {
            Some(source) => (
                JobKind::Edit,
                JobRequest::Edit {
                    code: source.code.unwrap_or_default(),
                    prompt: prompt.clone(),
                    previous_video_url: source.video_url,
                    previous_video_id: Some(source.id),
                    user_id: request.user_id.clone(),
                },
            ),
            None => (
                JobKind::Generate,
                JobRequest::Generate {
                    prompt: prompt.clone(),
                    user_id: request.user_id.clone(),
                },
            ),
        };

        let phase = advance(JobPhase::Idle, PhaseEvent::Submit)?;
        let job_id = match self.engine.submit(&job_request).await {
            Ok(job_id) => job_id,
            Err(err) => {
                advance(phase, PhaseEvent::Reject)?;
                if matches!(err, AppError::Submit(_) | AppError::Transport(_)) {
                    warn!(error = %err, "render engine did not accept the job");
                    events.emit(JobEvent::Failed {
                        job_id: None,
                        classification: Classification::submit_failure(),
                    });
                }
                return Err(err);
            }
        };
        advance(phase, PhaseEvent::Accept)?;

        let job = RenderJob::new(job_id, kind, prompt, request.user_id, request.edit_of)
            .record(self.store.db())
            .await?;
        info!(job_id = %job.id, kind = ?job.kind, "render job accepted");
        events.emit(JobEvent::Submitted {
            job_id: job.id.clone(),
        });

        Ok(job)
    }

    async fn load_source(&self, source_id: &str, owner: Option<&str>) -> Result<Artifact, AppError> {
        let owner = owner
            .ok_or_else(|| AppError::Auth("Editing a video requires a signed-in user".into()))?;
        let source = self.store.get(source_id, owner).await?;
        if source.code.as_deref().map_or(true, |code| code.trim().is_empty()) {
            return Err(AppError::Validation(format!(
                "Video {source_id} has no code to edit"
            )));
        }
        Ok(source)
    }

    /// Poll an accepted job until it completes, fails, runs out of budget or
    /// `cancel` fires.
    #[instrument(
        skip_all,
        fields(job_id = %job.id, user_id = job.user_id.as_deref().unwrap_or("anonymous"))
    )]
    pub async fn observe(
        &self,
        job: RenderJob,
        events: &JobEvents,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, AppError> {
        let tuning = &self.config.tuning;
        let started = Instant::now();
        let mut tick: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return self.cancelled(job, tick, events).await;
            }
            let out_of_ticks = tuning.max_ticks.is_some_and(|max| tick >= max);
            let out_of_time = tuning
                .max_duration
                .is_some_and(|max| started.elapsed() >= max);
            if out_of_ticks || out_of_time {
                warn!(tick, "render job exceeded its polling budget");
                return self.failed(job, tick, Classification::timeout(), events).await;
            }

            let interrupted = tokio::select! {
                biased;
                () = cancel.cancelled() => true,
                () = sleep(tuning.poll_interval) => false,
            };
            if interrupted {
                return self.cancelled(job, tick, events).await;
            }

            tick = tick.saturating_add(1);
            events.emit(JobEvent::Polling {
                job_id: job.id.clone(),
                tick,
            });
            let report = self.engine.poll(&job.id).await;
            if cancel.is_cancelled() {
                debug!(tick, "discarding status of cancelled job");
                return self.cancelled(job, tick, events).await;
            }

            match report.status {
                EngineStatus::Completed => {
                    return self.completed(job, tick, report, events).await;
                }
                EngineStatus::Failed => {
                    let classification =
                        classify_failure(report.error_type.as_deref(), report.error.as_deref());
                    return self.failed(job, tick, classification, events).await;
                }
                EngineStatus::Error => {
                    let message = report
                        .error
                        .unwrap_or_else(|| "render engine unreachable".into());
                    warn!(tick, %message, "render engine status unavailable, polling on");
                    events.emit(JobEvent::NetworkError {
                        job_id: job.id.clone(),
                        tick,
                        message,
                    });
                }
                EngineStatus::Pending | EngineStatus::Processing | EngineStatus::Unknown => {
                    debug!(tick, status = ?report.status, "render job still running");
                }
            }
        }
    }

    async fn completed(
        &self,
        job: RenderJob,
        tick: u32,
        report: StatusReport,
        events: &JobEvents,
    ) -> Result<JobOutcome, AppError> {
        let video_url = resolve_video_url(
            &self.config.artifact_base_url,
            report.video_url.as_deref(),
            &job.id,
        )?;

        let mut patch = ArtifactPatch {
            status: Some(ArtifactStatus::Completed),
            video_url: Some(video_url.clone()),
            code: report.code,
            title: report.title,
            ..ArtifactPatch::default()
        };
        self.attach_parent(&job, &mut patch).await?;

        // The log entry is claimed before the video is written, so a job
        // cancelled or finished elsewhere writes nothing.
        advance(JobPhase::Polling, PhaseEvent::Complete)?;
        job.mark_completed(tick, self.store.db()).await?;
        let artifact = self
            .store
            .upsert(&job.id, job.user_id.as_deref(), patch)
            .await?;

        info!(tick, %video_url, "render job completed");
        events.emit(JobEvent::Completed {
            job_id: job.id.clone(),
            video_url,
        });

        Ok(JobOutcome::Completed {
            job_id: job.id,
            artifact,
        })
    }

    async fn failed(
        &self,
        job: RenderJob,
        tick: u32,
        classification: Classification,
        events: &JobEvents,
    ) -> Result<JobOutcome, AppError> {
        let code = classification.kind.code();
        let mut patch = ArtifactPatch {
            status: Some(ArtifactStatus::Failed),
            error: Some(classification.message.to_string()),
            error_type: Some(code.to_string()),
            ..ArtifactPatch::default()
        };
        self.attach_parent(&job, &mut patch).await?;
        patch.previous_video_url = None;

        advance(JobPhase::Polling, PhaseEvent::Fail)?;
        job.mark_failed(tick, code, classification.message, self.store.db())
            .await?;
        self.store
            .upsert(&job.id, job.user_id.as_deref(), patch)
            .await?;

        warn!(
            tick,
            error_type = code,
            retryable = classification.retryable,
            "render job failed"
        );
        events.emit(JobEvent::Failed {
            job_id: Some(job.id.clone()),
            classification: classification.clone(),
        });

        Ok(JobOutcome::Failed {
            job_id: Some(job.id),
            classification,
        })
    }

    async fn cancelled(
        &self,
        job: RenderJob,
        tick: u32,
        events: &JobEvents,
    ) -> Result<JobOutcome, AppError> {
        advance(JobPhase::Polling, PhaseEvent::Cancel)?;
        job.mark_cancelled(tick, self.store.db()).await?;

        info!(tick, "render job cancelled");
        events.emit(JobEvent::Cancelled {
            job_id: job.id.clone(),
        });

        Ok(JobOutcome::Cancelled { job_id: job.id })
    }

    /// Edits fork: the result is a new video pointing at the one edited, and
    /// inherits its code and title unless the engine sent new ones.
    async fn attach_parent(&self, job: &RenderJob, patch: &mut ArtifactPatch) -> Result<(), AppError> {
        let (Some(parent_id), Some(owner)) =
            (job.source_artifact_id.as_deref(), job.user_id.as_deref())
        else {
            return Ok(());
        };
        patch.edit_prompt = Some(job.prompt.clone());

        match self.store.get(parent_id, owner).await {
            Ok(parent) => {
                patch.parent_video_id = Some(parent.id);
                patch.previous_video_url = Some(parent.video_url);
                if patch.code.is_none() {
                    patch.code = parent.code;
                }
                if patch.title.is_none() {
                    patch.title = parent.title;
                }
                Ok(())
            }
            Err(AppError::NotFound(_)) => {
                warn!(%parent_id, "edited video no longer exists, storing edit as a new root");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Absolute URLs are kept, relative paths are joined onto `base`, and a
/// missing URL falls back to the engine's default upload location.
pub fn resolve_video_url(base: &Url, raw: Option<&str>, job_id: &str) -> Result<String, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(base.join(&format!("videos/{job_id}.mp4"))?.into());
    };

    match Url::parse(raw) {
        Ok(absolute) => Ok(absolute.into()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Ok(base.join(raw.trim_start_matches('/'))?.into())
        }
        Err(err) => Err(err.into()),
    }
}
