use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub mod commit;
pub mod event;
pub mod protocol;

pub use commit::{CommitId, CommitIdError};
pub use event::StatusEvent;

/// One build-and-test request.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub solution: Utf8PathBuf,
    pub destination: Utf8PathBuf,
    /// Commit to test; HEAD of the source repository when `None`.
    pub commit: Option<String>,
    /// Run even if the ledger already records the commit.
    pub force: bool,
    pub ignore_parent_failure: bool,
    pub cancel: CancellationToken,
}

impl WorkItem {
    pub fn new(solution: impl Into<Utf8PathBuf>, destination: impl Into<Utf8PathBuf>) -> Self {
        Self {
            solution: solution.into(),
            destination: destination.into(),
            commit: None,
            force: false,
            ignore_parent_failure: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Copy used when deferred work is replayed: the parent check is bypassed
    /// and the copy gets a fresh cancellation token.
    pub fn for_replay(&self) -> Self {
        Self {
            ignore_parent_failure: true,
            cancel: CancellationToken::new(),
            ..self.clone()
        }
    }
}

/// Project graph loaded from a `.solution` manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Solution {
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub name: String,
    /// Names of projects that must build first.
    #[serde(default)]
    pub references: Vec<String>,
    /// Build command line, run from the mirrored root.
    pub build: String,
    /// Compiled test binary relative to the mirrored root. Test projects only.
    #[serde(default)]
    pub test_artifact: Option<Utf8PathBuf>,
}

impl Project {
    pub fn is_test_project(&self) -> bool {
        self.test_artifact.is_some()
    }
}

impl Solution {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn test_projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.iter().filter(|p| p.is_test_project())
    }
}
