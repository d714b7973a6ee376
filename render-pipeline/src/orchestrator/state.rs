use common::error::AppError;
use serde::Serialize;
use state_machines::state_machine;

state_machine! {
    name: RenderMachine,
    state: RenderState,
    initial: Idle,
    states: [Idle, Submitting, Polling, Completed, Failed, Cancelled],
    events {
        submit { transition: { from: Idle, to: Submitting } }
        accept { transition: { from: Submitting, to: Polling } }
        reject { transition: { from: Submitting, to: Failed } }
        complete { transition: { from: Polling, to: Completed } }
        fail { transition: { from: Polling, to: Failed } }
        cancel { transition: { from: Polling, to: Cancelled } }
    }
}

/// Where a single orchestrator run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobPhase {
    Idle,
    Submitting,
    Polling,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub enum PhaseEvent {
    Submit,
    Accept,
    Reject,
    Complete,
    Fail,
    Cancel,
}

fn idle() -> RenderMachine<(), Idle> {
    RenderMachine::new(())
}

fn submitting() -> Option<RenderMachine<(), Submitting>> {
    idle().submit().ok()
}

fn polling() -> Option<RenderMachine<(), Polling>> {
    submitting()?.accept().ok()
}

fn invalid_transition(phase: JobPhase, event: PhaseEvent) -> AppError {
    AppError::InternalError(format!(
        "invalid render transition: {phase:?} -> {event:?}"
    ))
}

pub fn advance(phase: JobPhase, event: PhaseEvent) -> Result<JobPhase, AppError> {
    let next = match (phase, event) {
        (JobPhase::Idle, PhaseEvent::Submit) => idle().submit().ok().map(|_| JobPhase::Submitting),
        (JobPhase::Submitting, PhaseEvent::Accept) => submitting()
            .and_then(|m| m.accept().ok())
            .map(|_| JobPhase::Polling),
        (JobPhase::Submitting, PhaseEvent::Reject) => submitting()
            .and_then(|m| m.reject().ok())
            .map(|_| JobPhase::Failed),
        (JobPhase::Polling, PhaseEvent::Complete) => polling()
            .and_then(|m| m.complete().ok())
            .map(|_| JobPhase::Completed),
        (JobPhase::Polling, PhaseEvent::Fail) => polling()
            .and_then(|m| m.fail().ok())
            .map(|_| JobPhase::Failed),
        (JobPhase::Polling, PhaseEvent::Cancel) => polling()
            .and_then(|m| m.cancel().ok())
            .map(|_| JobPhase::Cancelled),
        _ => None,
    };

    next.ok_or_else(|| invalid_transition(phase, event))
}
