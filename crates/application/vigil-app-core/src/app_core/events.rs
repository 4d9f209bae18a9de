use std::time::Duration;

use vigil_core::StatusEvent;
use vigil_pipeline::RunReport;

use crate::domain::RunId;

#[derive(Debug, Clone)]
pub enum DomainEvent {
    RunStarted {
        run_id: RunId,
        estimate: Option<Duration>,
        /// Next run of a replayed batch; errors of earlier runs are kept.
        continues_batch: bool,
    },
    Status {
        run_id: RunId,
        event: StatusEvent,
    },
    /// Wall-clock progress of the current run.
    Progress {
        run_id: RunId,
        elapsed: Duration,
    },
    RunFinished {
        run_id: RunId,
        report: RunReport,
    },

    // User-visible errors
    UserError(String),
}

impl DomainEvent {
    pub fn run_id(&self) -> Option<RunId> {
        match self {
            DomainEvent::RunStarted { run_id, .. }
            | DomainEvent::Status { run_id, .. }
            | DomainEvent::Progress { run_id, .. }
            | DomainEvent::RunFinished { run_id, .. } => Some(*run_id),
            DomainEvent::UserError(_) => None,
        }
    }
}
