use serde::Serialize;
use tokio::sync::mpsc;

use crate::classifier::Classification;

/// Progress of one job as seen by whoever started it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Submitted {
        job_id: String,
    },
    Polling {
        job_id: String,
        tick: u32,
    },
    /// The engine could not be reached on this tick. Polling goes on.
    NetworkError {
        job_id: String,
        tick: u32,
        message: String,
    },
    Completed {
        job_id: String,
        video_url: String,
    },
    Failed {
        job_id: Option<String>,
        classification: Classification,
    },
    Cancelled {
        job_id: String,
    },
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Completed { .. } | JobEvent::Failed { .. } | JobEvent::Cancelled { .. }
        )
    }
}

/// Optional listener for [`JobEvent`]s. A dropped receiver is not an error.
#[derive(Debug, Clone, Default)]
pub struct JobEvents {
    sender: Option<mpsc::UnboundedSender<JobEvent>>,
}

impl JobEvents {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn discard() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: JobEvent) {
        if let Some(sender) = &self.sender {
            sender.send(event).ok();
        }
    }
}
