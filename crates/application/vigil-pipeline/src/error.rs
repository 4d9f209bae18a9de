use thiserror::Error;
use vigil_core::protocol::ProtocolError;
use vigil_core::StatusEvent;
use vigil_infra::{GitError, MultiplexError, ProcessError};
use vigil_persistence::LedgerError;

/// Failure that ends a run. Each variant maps onto one terminal status event.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Argument(String),
    #[error("{0}")]
    Environment(String),
    #[error("{0}")]
    ProjectLoading(String),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("{0}")]
    Unhandled(String),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("version control: {0}")]
    Vcs(#[from] GitError),
    #[error("worker channel: {0}")]
    Channel(#[from] MultiplexError),
    #[error("canceled")]
    Canceled,
}

impl PipelineError {
    pub fn into_event(self) -> StatusEvent {
        let message = self.to_string();
        match self {
            PipelineError::Argument(_) => StatusEvent::ArgumentError { message },
            PipelineError::Environment(_) | PipelineError::Ledger(_) | PipelineError::Vcs(_) => {
                StatusEvent::MiscellaneousError { message }
            }
            PipelineError::ProjectLoading(_) => StatusEvent::ProjectLoadingError { message },
            PipelineError::Protocol(_) | PipelineError::Unhandled(_) | PipelineError::Channel(_) => {
                StatusEvent::UnhandledException { message }
            }
            PipelineError::Canceled => StatusEvent::Canceled,
        }
    }
}

impl From<ProcessError> for PipelineError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::Cancelled => PipelineError::Canceled,
            other => PipelineError::Environment(other.to_string()),
        }
    }
}
