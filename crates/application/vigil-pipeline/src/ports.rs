//! Seams to the outside world, each with one default implementation.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_core::{CommitId, Project};
use vigil_infra::process::{run_captured, split_command_line};
use vigil_infra::{CommitInfo, GitCli, ProcessError};

use crate::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub success: bool,
    pub diagnostics: String,
}

#[async_trait::async_trait]
pub trait BuildEngine: Send + Sync {
    /// Builds one project inside the mirrored `root`.
    async fn build(
        &self,
        root: &Utf8Path,
        project: &Project,
        cancel: &CancellationToken,
    ) -> Result<BuildReport, PipelineError>;
}

/// Runs each project's `build` command line from the mirrored root.
#[derive(Debug, Default, Clone)]
pub struct CommandBuildEngine;

#[async_trait::async_trait]
impl BuildEngine for CommandBuildEngine {
    async fn build(
        &self,
        root: &Utf8Path,
        project: &Project,
        cancel: &CancellationToken,
    ) -> Result<BuildReport, PipelineError> {
        let argv = match split_command_line(&project.build) {
            Ok(argv) => argv,
            Err(e) => {
                return Ok(BuildReport {
                    success: false,
                    diagnostics: format!("{}: {e}", project.name),
                })
            }
        };

        match run_captured(&argv, root, None, Some(cancel)).await {
            Ok(out) => Ok(BuildReport {
                success: out.success,
                diagnostics: out.diagnostics(),
            }),
            Err(ProcessError::Cancelled) => Err(PipelineError::Canceled),
            Err(e) => Ok(BuildReport {
                success: false,
                diagnostics: e.to_string(),
            }),
        }
    }
}

#[async_trait::async_trait]
pub trait VersionControl: Send + Sync {
    async fn head(&self, repo: &Utf8Path) -> Result<CommitInfo, PipelineError>;
    async fn commit_info(&self, repo: &Utf8Path, id: &CommitId)
        -> Result<CommitInfo, PipelineError>;
    async fn parent(&self, repo: &Utf8Path, id: &CommitId)
        -> Result<Option<CommitId>, PipelineError>;
    async fn checkout(&self, repo: &Utf8Path, id: &CommitId) -> Result<(), PipelineError>;
}

#[async_trait::async_trait]
impl VersionControl for GitCli {
    async fn head(&self, repo: &Utf8Path) -> Result<CommitInfo, PipelineError> {
        Ok(GitCli::head(self, repo).await?)
    }

    async fn commit_info(
        &self,
        repo: &Utf8Path,
        id: &CommitId,
    ) -> Result<CommitInfo, PipelineError> {
        Ok(GitCli::commit_info(self, repo, id.as_str()).await?)
    }

    async fn parent(
        &self,
        repo: &Utf8Path,
        id: &CommitId,
    ) -> Result<Option<CommitId>, PipelineError> {
        Ok(GitCli::parent(self, repo, id).await?)
    }

    async fn checkout(&self, repo: &Utf8Path, id: &CommitId) -> Result<(), PipelineError> {
        Ok(GitCli::checkout(self, repo, id).await?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    /// Overrides the worker's default timeout for this case.
    pub timeout: Option<Duration>,
    /// The case passes when the test fails.
    pub expect_failure: bool,
}

impl TestCase {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            expect_failure: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestVerdict {
    Passed,
    Failed(String),
    TimedOut(Duration),
}

#[async_trait::async_trait]
pub trait TestDiscovery: Send + Sync {
    async fn discover(&self, artifact: &Utf8Path) -> Result<Vec<TestCase>, PipelineError>;

    async fn execute(
        &self,
        artifact: &Utf8Path,
        case: &TestCase,
        timeout: Option<Duration>,
    ) -> Result<TestVerdict, PipelineError>;
}

/// Discovers and runs tests of a compiled libtest harness binary.
#[derive(Debug, Clone)]
pub struct LibtestDiscovery {
    working_dir: Utf8PathBuf,
}

impl LibtestDiscovery {
    pub fn new(working_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

/// Test names from `--list --format terse` output; benches are skipped.
pub fn parse_libtest_list(stdout: &str) -> Vec<TestCase> {
    stdout
        .lines()
        .filter_map(|line| line.trim_end().strip_suffix(": test"))
        .map(TestCase::named)
        .collect()
}

fn failure_summary(stdout: &str, stderr: &str, code: Option<i32>) -> String {
    stdout
        .lines()
        .chain(stderr.lines())
        .find(|l| l.contains("panicked at"))
        .map(|l| l.trim().to_string())
        .unwrap_or_else(|| match code {
            Some(code) => format!("exited with code {code}"),
            None => "terminated by signal".to_string(),
        })
}

#[async_trait::async_trait]
impl TestDiscovery for LibtestDiscovery {
    async fn discover(&self, artifact: &Utf8Path) -> Result<Vec<TestCase>, PipelineError> {
        let argv = vec![
            artifact.to_string(),
            "--list".to_string(),
            "--format".to_string(),
            "terse".to_string(),
        ];
        let out = run_captured(&argv, &self.working_dir, None, None).await?;
        if !out.success {
            return Err(PipelineError::Environment(format!(
                "listing tests of {artifact} failed: {}",
                out.diagnostics()
            )));
        }
        let cases = parse_libtest_list(&out.stdout);
        debug!("discovered {} test(s) in {}", cases.len(), artifact);
        Ok(cases)
    }

    async fn execute(
        &self,
        artifact: &Utf8Path,
        case: &TestCase,
        timeout: Option<Duration>,
    ) -> Result<TestVerdict, PipelineError> {
        let argv = vec![
            artifact.to_string(),
            "--exact".to_string(),
            case.name.clone(),
        ];
        match run_captured(&argv, &self.working_dir, timeout, None).await {
            Ok(out) if out.success => Ok(TestVerdict::Passed),
            Ok(out) => Ok(TestVerdict::Failed(failure_summary(
                &out.stdout,
                &out.stderr,
                out.code,
            ))),
            Err(ProcessError::TimedOut(limit)) => Ok(TestVerdict::TimedOut(limit)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Everything a worker process needs to run one test project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub project: String,
    pub socket: Utf8PathBuf,
    pub artifact: Utf8PathBuf,
    pub working_dir: Utf8PathBuf,
    pub timeout: Option<Duration>,
}

#[async_trait::async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Resolves once the worker has exited.
    async fn launch(&self, spec: &WorkerSpec, cancel: &CancellationToken)
        -> Result<(), PipelineError>;
}

/// Starts `<program> worker ...` child processes.
#[derive(Debug, Clone)]
pub struct ProcessWorkerLauncher {
    program: Utf8PathBuf,
}

impl ProcessWorkerLauncher {
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Launcher re-entering the running executable.
    pub fn current_exe() -> Result<Self, PipelineError> {
        let exe = std::env::current_exe()
            .map_err(|e| PipelineError::Environment(format!("current executable: {e}")))?;
        let exe = Utf8PathBuf::from_path_buf(exe).map_err(|p| {
            PipelineError::Environment(format!("non UTF-8 executable path {}", p.display()))
        })?;
        Ok(Self::new(exe))
    }

    pub fn command_line(&self, spec: &WorkerSpec) -> Vec<String> {
        let mut argv = vec![
            self.program.to_string(),
            "worker".to_string(),
            "--socket".to_string(),
            spec.socket.to_string(),
            "--artifact".to_string(),
            spec.artifact.to_string(),
        ];
        if let Some(timeout) = spec.timeout {
            argv.push("--timeout-ms".to_string());
            argv.push(timeout.as_millis().max(1).to_string());
        }
        argv
    }
}

#[async_trait::async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
    async fn launch(
        &self,
        spec: &WorkerSpec,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let argv = self.command_line(spec);
        let out = run_captured(&argv, &spec.working_dir, None, Some(cancel)).await?;
        if !out.success {
            warn!("worker for {} failed: {}", spec.project, out.stderr.trim());
            return Err(PipelineError::Unhandled(format!(
                "worker for {} exited with {:?}",
                spec.project, out.code
            )));
        }
        Ok(())
    }
}
