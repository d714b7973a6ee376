use state_machines::state_machine;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum JobKind {
    #[serde(rename = "generate")]
    #[default]
    Generate,
    #[serde(rename = "edit")]
    Edit,
}

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum RenderJobState {
    #[serde(rename = "Polling")]
    #[default]
    Polling,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Failed")]
    Failed,
    #[serde(rename = "Cancelled")]
    Cancelled,
}

impl RenderJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderJobState::Polling => "Polling",
            RenderJobState::Completed => "Completed",
            RenderJobState::Failed => "Failed",
            RenderJobState::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RenderJobState::Polling)
    }
}

#[derive(Debug, Clone, Copy)]
enum JobTransition {
    Complete,
    Fail,
    Cancel,
}

impl JobTransition {
    fn as_str(self) -> &'static str {
        match self {
            JobTransition::Complete => "complete",
            JobTransition::Fail => "fail",
            JobTransition::Cancel => "cancel",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: RenderJobMachine,
        initial: Polling,
        states: [Polling, Completed, Failed, Cancelled],
        events {
            complete {
                transition: { from: Polling, to: Completed }
            }
            fail {
                transition: { from: Polling, to: Failed }
            }
            cancel {
                transition: { from: Polling, to: Cancelled }
            }
        }
    }

    pub(super) fn polling() -> RenderJobMachine<(), Polling> {
        RenderJobMachine::new(())
    }
}

fn invalid_transition(state: &RenderJobState, event: JobTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid render job transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

fn compute_next_state(
    state: &RenderJobState,
    event: JobTransition,
) -> Result<RenderJobState, AppError> {
    use lifecycle::polling;
    match (state, event) {
        (RenderJobState::Polling, JobTransition::Complete) => polling()
            .complete()
            .map(|_| RenderJobState::Completed)
            .map_err(|_| invalid_transition(state, event)),
        (RenderJobState::Polling, JobTransition::Fail) => polling()
            .fail()
            .map(|_| RenderJobState::Failed)
            .map_err(|_| invalid_transition(state, event)),
        (RenderJobState::Polling, JobTransition::Cancel) => polling()
            .cancel()
            .map(|_| RenderJobState::Cancelled)
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

// Recovery log entry: written before the first status poll so an interrupted
// process can pick the job up again.
stored_object!(RenderJob, "render_job", {
    kind: JobKind,
    prompt: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    source_artifact_id: Option<String>,
    state: RenderJobState,
    ticks: u32,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error_message: Option<String>
});

impl RenderJob {
    pub fn new(
        job_id: String,
        kind: JobKind,
        prompt: String,
        user_id: Option<String>,
        source_artifact_id: Option<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: job_id,
            kind,
            prompt,
            user_id,
            source_artifact_id,
            state: RenderJobState::Polling,
            ticks: 0,
            error_type: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Store the entry. Recording the same job twice keeps the first entry.
    pub async fn record(self, db: &SurrealDbClient) -> Result<RenderJob, AppError> {
        if let Some(existing) = db.get_item::<RenderJob>(&self.id).await? {
            return Ok(existing);
        }
        db.store_item(self.clone()).await?;
        Ok(self)
    }

    pub async fn find(id: &str, db: &SurrealDbClient) -> Result<RenderJob, AppError> {
        db.get_item::<RenderJob>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Render job {id} not found")))
    }

    pub async fn find_owned(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<RenderJob, AppError> {
        let job = Self::find(id, db).await?;
        if job.user_id.as_deref() != Some(user_id) {
            return Err(AppError::NotFound(format!("Render job {id} not found")));
        }
        Ok(job)
    }

    pub async fn mark_completed(
        &self,
        ticks: u32,
        db: &SurrealDbClient,
    ) -> Result<RenderJob, AppError> {
        let next = compute_next_state(&self.state, JobTransition::Complete)?;
        self.finish(next, JobTransition::Complete, ticks, None, None, db)
            .await
    }

    pub async fn mark_failed(
        &self,
        ticks: u32,
        error_type: &str,
        error_message: &str,
        db: &SurrealDbClient,
    ) -> Result<RenderJob, AppError> {
        let next = compute_next_state(&self.state, JobTransition::Fail)?;
        self.finish(
            next,
            JobTransition::Fail,
            ticks,
            Some(error_type.to_string()),
            Some(error_message.to_string()),
            db,
        )
        .await
    }

    pub async fn mark_cancelled(
        &self,
        ticks: u32,
        db: &SurrealDbClient,
    ) -> Result<RenderJob, AppError> {
        let next = compute_next_state(&self.state, JobTransition::Cancel)?;
        self.finish(next, JobTransition::Cancel, ticks, None, None, db)
            .await
    }

    async fn finish(
        &self,
        next: RenderJobState,
        event: JobTransition,
        ticks: u32,
        error_type: Option<String>,
        error_message: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<RenderJob, AppError> {
        const FINISH_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $next,
                ticks = $ticks,
                error_type = $error_type,
                error_message = $error_message,
                updated_at = $now
            WHERE state = $polling
            RETURN AFTER;
        "#;

        let mut result = db
            .client
            .query(FINISH_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("next", next.as_str()))
            .bind(("ticks", ticks))
            .bind(("error_type", error_type))
            .bind(("error_message", error_message))
            .bind(("polling", RenderJobState::Polling.as_str()))
            .bind(("now", surrealdb::sql::Datetime::from(Utc::now())))
            .await?;

        let updated: Option<RenderJob> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, event))
    }

    /// Jobs that were still being polled when the process went away.
    pub async fn get_unfinished(db: &SurrealDbClient) -> Result<Vec<RenderJob>, AppError> {
        let jobs: Vec<RenderJob> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE state = $polling
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("polling", RenderJobState::Polling.as_str()))
            .await?
            .take(0)?;

        Ok(jobs)
    }
}
