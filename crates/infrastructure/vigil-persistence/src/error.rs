use vigil_core::CommitIdError;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger {0} is already open in this process")]
    AlreadyOpen(String),
    #[error("malformed ledger line {line}: {reason}")]
    Format { line: usize, reason: String },
    #[error("invalid commit id: {0}")]
    Commit(#[from] CommitIdError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerErrorKind {
    Busy,
    Format,
    InvalidPath,
    Io,
}

impl LedgerError {
    pub fn kind(&self) -> LedgerErrorKind {
        match self {
            LedgerError::AlreadyOpen(_) => LedgerErrorKind::Busy,
            LedgerError::Format { .. } | LedgerError::Commit(_) => LedgerErrorKind::Format,
            LedgerError::InvalidPath(_) => LedgerErrorKind::InvalidPath,
            LedgerError::Io(_) => LedgerErrorKind::Io,
        }
    }

    pub(crate) fn format(line: usize, reason: impl Into<String>) -> Self {
        LedgerError::Format {
            line,
            reason: reason.into(),
        }
    }
}
