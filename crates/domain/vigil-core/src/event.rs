/// Progress and outcome notifications produced while a work item runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Skipped {
        message: Option<String>,
    },
    BuildSuccess {
        project: String,
        built: usize,
        total: usize,
    },
    BuildError {
        project: String,
        message: String,
        built: usize,
        total: usize,
    },
    /// A worker finished with `passed` passing tests.
    TestSuccess {
        passed: u64,
    },
    TestError {
        message: String,
    },
    ArgumentError {
        message: String,
    },
    MiscellaneousError {
        message: String,
    },
    ProjectLoadingError {
        message: String,
    },
    UnhandledException {
        message: String,
    },
    Success {
        passed: u64,
    },
    ParentFailed {
        message: Option<String>,
    },
    Canceled,
}

impl StatusEvent {
    pub fn message(&self) -> Option<&str> {
        match self {
            StatusEvent::Skipped { message } | StatusEvent::ParentFailed { message } => {
                message.as_deref()
            }
            StatusEvent::BuildError { message, .. }
            | StatusEvent::TestError { message }
            | StatusEvent::ArgumentError { message }
            | StatusEvent::MiscellaneousError { message }
            | StatusEvent::ProjectLoadingError { message }
            | StatusEvent::UnhandledException { message } => Some(message),
            StatusEvent::BuildSuccess { .. }
            | StatusEvent::TestSuccess { .. }
            | StatusEvent::Success { .. }
            | StatusEvent::Canceled => None,
        }
    }

    /// Events that end a run. `TestError` is not terminal: per-test failures
    /// accumulate and the run closes when the worker stream is exhausted.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            StatusEvent::BuildSuccess { .. }
                | StatusEvent::TestSuccess { .. }
                | StatusEvent::TestError { .. }
        )
    }

    /// Errors that end the run and taint it.
    pub fn is_fatal_error(&self) -> bool {
        matches!(
            self,
            StatusEvent::BuildError { .. }
                | StatusEvent::ArgumentError { .. }
                | StatusEvent::MiscellaneousError { .. }
                | StatusEvent::ProjectLoadingError { .. }
                | StatusEvent::UnhandledException { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            StatusEvent::Skipped { .. } => "Skipped",
            StatusEvent::BuildSuccess { .. } => "BuildSuccess",
            StatusEvent::BuildError { .. } => "BuildError",
            StatusEvent::TestSuccess { .. } => "TestSuccess",
            StatusEvent::TestError { .. } => "TestError",
            StatusEvent::ArgumentError { .. } => "ArgumentError",
            StatusEvent::MiscellaneousError { .. } => "MiscellaneousError",
            StatusEvent::ProjectLoadingError { .. } => "ProjectLoadingError",
            StatusEvent::UnhandledException { .. } => "UnhandledException",
            StatusEvent::Success { .. } => "Success",
            StatusEvent::ParentFailed { .. } => "ParentFailed",
            StatusEvent::Canceled => "Canceled",
        }
    }
}
