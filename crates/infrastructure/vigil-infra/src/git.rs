//! Thin wrapper over the `git` command line.

use camino::Utf8Path;
use thiserror::Error;
use vigil_core::{CommitId, CommitIdError};

use crate::process::{run_captured, ProcessError};

#[derive(Debug, Error)]
pub enum GitError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("git {args} failed: {stderr}")]
    Failed { args: String, stderr: String },
    #[error(transparent)]
    Commit(#[from] CommitIdError),
    #[error("unexpected git output: {0:?}")]
    Output(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: CommitId,
    /// Subject line of the commit message.
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            binary: "git".to_string(),
        }
    }
}

impl GitCli {
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, repo: &Utf8Path, args: &[&str]) -> Result<String, GitError> {
        let mut argv = vec![self.binary.clone()];
        argv.extend(args.iter().map(|a| a.to_string()));

        let out = run_captured(&argv, repo, None, None).await?;
        if !out.success {
            return Err(GitError::Failed {
                args: args.join(" "),
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout)
    }

    pub async fn head(&self, repo: &Utf8Path) -> Result<CommitInfo, GitError> {
        self.commit_info(repo, "HEAD").await
    }

    pub async fn commit_info(&self, repo: &Utf8Path, rev: &str) -> Result<CommitInfo, GitError> {
        let out = self
            .run(repo, &["log", "-1", "--format=%H%n%s", rev, "--"])
            .await?;
        let mut lines = out.lines();
        let id = lines.next().ok_or_else(|| GitError::Output(out.clone()))?;
        Ok(CommitInfo {
            id: CommitId::parse(id)?,
            message: lines.next().unwrap_or_default().to_string(),
        })
    }

    /// First parent of `id`, or `None` for a root commit.
    pub async fn parent(&self, repo: &Utf8Path, id: &CommitId) -> Result<Option<CommitId>, GitError> {
        let out = self
            .run(repo, &["log", "-1", "--format=%P", id.as_str(), "--"])
            .await?;
        match out.split_whitespace().next() {
            Some(parent) => Ok(Some(CommitId::parse(parent)?)),
            None => Ok(None),
        }
    }

    pub async fn checkout(&self, repo: &Utf8Path, id: &CommitId) -> Result<(), GitError> {
        self.run(repo, &["checkout", "--quiet", "--detach", id.as_str()])
            .await?;
        Ok(())
    }
}
