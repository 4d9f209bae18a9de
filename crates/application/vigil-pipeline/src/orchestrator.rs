//! Drives one work item from validation to a terminal status event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::{CommitId, Project, Solution, StatusEvent, WorkItem};
use vigil_infra::{ipc, ChannelMultiplexer, CommitInfo, GitCli, MultiplexerConfig, SpawnMode};
use vigil_persistence::{LedgerEntry, Outcome, ResultsLedger, TimingEstimator};

use crate::graph::build_order;
use crate::mirror::Mirror;
use crate::ports::{
    BuildEngine, CommandBuildEngine, ProcessWorkerLauncher, VersionControl, WorkerLauncher,
    WorkerSpec,
};
use crate::reducer::ResultReducer;
use crate::PipelineError;

pub type EventSink = mpsc::UnboundedSender<StatusEvent>;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub pool_size: usize,
    /// Default per-test timeout handed to every worker.
    pub test_timeout: Option<Duration>,
    pub spawn_mode: SpawnMode,
    pub channel_name: String,
    /// Overrides the socket path derived from `channel_name`.
    pub socket_path: Option<Utf8PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            pool_size: vigil_config::DEFAULT_POOL_SIZE,
            test_timeout: None,
            spawn_mode: SpawnMode::default(),
            channel_name: vigil_config::DEFAULT_CHANNEL_NAME.to_string(),
            socket_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Validating,
    Resolving,
    Copying,
    Building,
    Testing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
    Skipped,
    ParentFailed,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub passed: u64,
    pub elapsed: Duration,
}

/// How a run ended before anything was published.
struct Finish {
    outcome: RunOutcome,
    event: Option<StatusEvent>,
    record: Option<LedgerEntry>,
    passed: u64,
}

impl Finish {
    fn skipped(message: String) -> Self {
        Self {
            outcome: RunOutcome::Skipped,
            event: Some(StatusEvent::Skipped {
                message: Some(message),
            }),
            record: None,
            passed: 0,
        }
    }
}

/// Publishes events, refusing once the item was cancelled.
struct Emitter<'a> {
    tx: &'a EventSink,
    cancel: &'a CancellationToken,
}

impl Emitter<'_> {
    fn emit(&self, event: StatusEvent) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Canceled);
        }
        self.send(event);
        Ok(())
    }

    fn send(&self, event: StatusEvent) {
        debug!("event {}", event.name());
        if self.tx.send(event).is_err() {
            debug!("status consumer is gone");
        }
    }
}

fn check_cancel(item: &WorkItem) -> Result<(), PipelineError> {
    if item.cancel.is_cancelled() {
        return Err(PipelineError::Canceled);
    }
    Ok(())
}

pub struct RunOrchestrator {
    build: Arc<dyn BuildEngine>,
    vcs: Arc<dyn VersionControl>,
    launcher: Arc<dyn WorkerLauncher>,
    ledger: Arc<Mutex<ResultsLedger>>,
    estimator: Arc<std::sync::Mutex<TimingEstimator>>,
    options: PipelineOptions,
}

impl RunOrchestrator {
    /// Orchestrator with the command build engine, git and worker processes
    /// re-entering the current executable.
    pub fn new(ledger: ResultsLedger, options: PipelineOptions) -> Result<Self, PipelineError> {
        Ok(Self::with_components(
            ledger,
            options,
            Arc::new(CommandBuildEngine),
            Arc::new(GitCli::default()),
            Arc::new(ProcessWorkerLauncher::current_exe()?),
        ))
    }

    pub fn with_components(
        ledger: ResultsLedger,
        options: PipelineOptions,
        build: Arc<dyn BuildEngine>,
        vcs: Arc<dyn VersionControl>,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        let estimator = ledger.estimator();
        Self {
            build,
            vcs,
            launcher,
            ledger: Arc::new(Mutex::new(ledger)),
            estimator: Arc::new(std::sync::Mutex::new(estimator)),
            options,
        }
    }

    pub fn ledger(&self) -> Arc<Mutex<ResultsLedger>> {
        self.ledger.clone()
    }

    /// Expected duration of a successful run.
    pub fn estimate(&self) -> Option<Duration> {
        self.estimator.lock().expect("estimator poisoned").estimate()
    }

    /// Runs `item` to completion, publishing status events to `events`.
    /// Runs are serialized on the ledger.
    pub async fn run(&self, item: &WorkItem, events: &EventSink) -> RunReport {
        let started = Instant::now();
        let emitter = Emitter {
            tx: events,
            cancel: &item.cancel,
        };
        let mut ledger = self.ledger.lock().await;
        info!("run {} -> {}", item.solution, item.destination);

        let result = self.drive(item, &ledger, &emitter, started).await;

        let (outcome, passed) = if item.cancel.is_cancelled() {
            emitter.send(StatusEvent::Canceled);
            (RunOutcome::Canceled, 0)
        } else {
            match result {
                Ok(finish) => self.conclude(finish, &mut ledger, &emitter),
                Err(PipelineError::Canceled) => {
                    emitter.send(StatusEvent::Canceled);
                    (RunOutcome::Canceled, 0)
                }
                Err(e) => {
                    warn!("run failed: {}", e);
                    emitter.send(e.into_event());
                    (RunOutcome::Failed, 0)
                }
            }
        };

        let report = RunReport {
            outcome,
            passed,
            elapsed: started.elapsed(),
        };
        info!("run finished: {:?}", report);
        report
    }

    fn conclude(
        &self,
        finish: Finish,
        ledger: &mut ResultsLedger,
        emitter: &Emitter<'_>,
    ) -> (RunOutcome, u64) {
        if let Some(entry) = finish.record {
            let duration = entry.duration;
            let outcome = entry.outcome;
            if let Err(e) = ledger.append(entry) {
                let e = PipelineError::from(e);
                warn!("{}", e);
                emitter.send(e.into_event());
                return (RunOutcome::Failed, finish.passed);
            }
            if outcome == Outcome::Success {
                self.estimator
                    .lock()
                    .expect("estimator poisoned")
                    .record(duration);
            }
        }
        if let Some(event) = finish.event {
            emitter.send(event);
        }
        (finish.outcome, finish.passed)
    }

    async fn drive(
        &self,
        item: &WorkItem,
        ledger: &ResultsLedger,
        emitter: &Emitter<'_>,
        started: Instant,
    ) -> Result<Finish, PipelineError> {
        debug!("{:?}", RunStage::Validating);
        let (source_root, solution_name) = validate(item)?;

        debug!("{:?}", RunStage::Resolving);
        let commit = self.resolve(item, &source_root).await?;
        if source_root.join(vigil_config::DISABLE_FLAG_FILENAME).exists() {
            return Ok(Finish::skipped(format!(
                "disabled by {} in {}",
                vigil_config::DISABLE_FLAG_FILENAME,
                source_root
            )));
        }
        if !item.force && ledger.contains(&commit.id) {
            return Ok(Finish::skipped(format!(
                "{} was already tested",
                commit.id.short()
            )));
        }
        if !item.ignore_parent_failure {
            if let Some(parent) = self.vcs.parent(&source_root, &commit.id).await? {
                if ledger.outcome_of(&parent) == Some(Outcome::Failure) {
                    return Ok(Finish {
                        outcome: RunOutcome::ParentFailed,
                        event: Some(StatusEvent::ParentFailed {
                            message: Some(format!("parent {} failed", parent.short())),
                        }),
                        record: None,
                        passed: 0,
                    });
                }
            }
        }
        check_cancel(item)?;

        debug!("{:?}", RunStage::Copying);
        let mirror = Mirror::new(source_root.clone())
            .exclude_file(vigil_config::LEDGER_FILENAME)
            .exclude_file(ledger.path());
        let destination = item.destination.clone();
        tokio::task::spawn_blocking(move || mirror.copy_to(&destination))
            .await
            .map_err(|e| PipelineError::Unhandled(format!("mirror task: {e}")))?
            .map_err(|e| {
                PipelineError::Environment(format!("copying into {}: {e}", item.destination))
            })?;
        if item.commit.is_some() {
            self.vcs.checkout(&item.destination, &commit.id).await?;
        }
        check_cancel(item)?;

        debug!("{:?}", RunStage::Building);
        let solution = load_solution(&item.destination.join(&solution_name)).await?;
        let order = build_order(&solution).map_err(|e| PipelineError::ProjectLoading(e.to_string()))?;
        let total = order.len();
        for (built, project) in order.iter().enumerate() {
            check_cancel(item)?;
            let report = self
                .build
                .build(&item.destination, project, &item.cancel)
                .await?;
            if !report.success {
                return Ok(Finish {
                    outcome: RunOutcome::Failed,
                    event: Some(StatusEvent::BuildError {
                        project: project.name.clone(),
                        message: report.diagnostics,
                        built,
                        total,
                    }),
                    record: Some(self.entry(&commit, Outcome::Failure, started, 0)),
                    passed: 0,
                });
            }
            emitter.emit(StatusEvent::BuildSuccess {
                project: project.name.clone(),
                built: built + 1,
                total,
            })?;
        }

        debug!("{:?}", RunStage::Testing);
        let tests: Vec<&Project> = order.into_iter().filter(|p| p.is_test_project()).collect();
        let reducer = self.run_tests(item, &tests, emitter).await?;
        check_cancel(item)?;

        let passed = reducer.passed();
        Ok(match reducer.finish() {
            Some(event) => Finish {
                outcome: RunOutcome::Succeeded,
                event: Some(event),
                record: Some(self.entry(&commit, Outcome::Success, started, passed)),
                passed,
            },
            None => Finish {
                outcome: RunOutcome::Failed,
                event: None,
                record: Some(self.entry(&commit, Outcome::Failure, started, passed)),
                passed,
            },
        })
    }

    fn entry(
        &self,
        commit: &CommitInfo,
        outcome: Outcome,
        started: Instant,
        passed: u64,
    ) -> LedgerEntry {
        LedgerEntry::now(
            commit.id.clone(),
            commit.message.clone(),
            outcome,
            started.elapsed(),
            passed,
        )
    }

    async fn resolve(
        &self,
        item: &WorkItem,
        source_root: &Utf8Path,
    ) -> Result<CommitInfo, PipelineError> {
        match &item.commit {
            Some(raw) => {
                let id = CommitId::parse(raw)
                    .map_err(|e| PipelineError::Argument(e.to_string()))?;
                self.vcs.commit_info(source_root, &id).await
            }
            None => self.vcs.head(source_root).await,
        }
    }

    async fn run_tests(
        &self,
        item: &WorkItem,
        tests: &[&Project],
        emitter: &Emitter<'_>,
    ) -> Result<ResultReducer, PipelineError> {
        let mut reducer = ResultReducer::new();
        if tests.is_empty() {
            return Ok(reducer);
        }

        let socket = self
            .options
            .socket_path
            .clone()
            .unwrap_or_else(|| ipc::socket_path(&self.options.channel_name));
        let config =
            MultiplexerConfig::new(socket.clone(), tests.len()).with_mode(self.options.spawn_mode);
        let mux = ChannelMultiplexer::for_workers(config, Some(&item.cancel))?;
        let mut stream = mux.take_stream()?;

        let specs: Vec<WorkerSpec> = tests
            .iter()
            .filter_map(|p| {
                p.test_artifact.as_ref().map(|artifact| WorkerSpec {
                    project: p.name.clone(),
                    socket: socket.clone(),
                    artifact: item.destination.join(artifact),
                    working_dir: item.destination.clone(),
                    timeout: self.options.test_timeout,
                })
            })
            .collect();

        let pool = vigil_config::clamp_pool_size(self.options.pool_size);
        // Workers stop with the run, or early when their output is corrupt.
        let workers = item.cancel.child_token();
        let cancel = &workers;
        let mux_ref = &mux;

        let jobs: Vec<_> = specs
            .into_iter()
            .map(|spec| {
                let launcher = self.launcher.clone();
                let cancel = workers.clone();
                async move {
                    launcher
                        .launch(&spec, &cancel)
                        .await
                        .map_err(|e| format!("{}: {e}", spec.project))
                }
            })
            .collect();

        let launches = async move {
            let results: Vec<Result<(), String>> = futures::stream::iter(jobs)
                .buffer_unordered(pool)
                .collect()
                .await;

            // Workers that never connected leave the stream waiting.
            let grace = tokio::time::sleep(vigil_config::worker_exit_grace());
            tokio::pin!(grace);
            while !cancel.is_cancelled()
                && (mux_ref.alive() > 0 || mux_ref.expected_remaining() > 0)
            {
                tokio::select! {
                    _ = &mut grace => {
                        warn!(
                            "{} worker(s) still expected after all exited",
                            mux_ref.expected_remaining()
                        );
                        mux_ref.dispose();
                        break;
                    }
                    _ = tokio::time::sleep(mux_ref.poll_interval()) => {}
                }
            }
            results
        };
        let drained = async {
            let drained = reducer.drain(&mut stream, |event| emitter.emit(event)).await;
            if let Err(e) = &drained {
                warn!("stopping workers: {e}");
                cancel.cancel();
                mux_ref.dispose();
            }
            drained
        };

        let (launched, drained) = tokio::join!(launches, drained);
        check_cancel(item)?;
        drained?;

        let mut problems: Vec<String> = launched.into_iter().filter_map(Result::err).collect();
        problems.extend(mux.faults().iter().map(|f| f.to_string()));
        let missing = mux.expected_remaining();
        if missing > 0 {
            problems.push(format!("{missing} worker(s) never connected"));
        }
        if !problems.is_empty() {
            return Err(PipelineError::Unhandled(problems.join("; ")));
        }
        Ok(reducer)
    }
}

fn validate(item: &WorkItem) -> Result<(Utf8PathBuf, String), PipelineError> {
    let solution = &item.solution;
    if solution.extension() != Some(vigil_config::SOLUTION_EXTENSION) {
        return Err(PipelineError::Argument(format!(
            "{solution} is not a .{} file",
            vigil_config::SOLUTION_EXTENSION
        )));
    }
    if !solution.is_file() {
        return Err(PipelineError::Argument(format!("{solution} does not exist")));
    }
    if item.destination.exists() && !item.destination.is_dir() {
        return Err(PipelineError::Argument(format!(
            "{} is not a directory",
            item.destination
        )));
    }
    std::fs::create_dir_all(&item.destination).map_err(|e| {
        PipelineError::Argument(format!("cannot create {}: {e}", item.destination))
    })?;

    let solution = solution
        .canonicalize_utf8()
        .map_err(|e| PipelineError::Argument(format!("{solution}: {e}")))?;
    let (Some(root), Some(name)) = (solution.parent(), solution.file_name()) else {
        return Err(PipelineError::Argument(format!(
            "{solution} has no parent directory"
        )));
    };
    let destination = item
        .destination
        .canonicalize_utf8()
        .map_err(|e| PipelineError::Argument(format!("{}: {e}", item.destination)))?;
    if destination.as_path() == root {
        return Err(PipelineError::Argument(format!(
            "destination {destination} is the source tree"
        )));
    }
    Ok((root.to_owned(), name.to_string()))
}

async fn load_solution(path: &Utf8Path) -> Result<Solution, PipelineError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PipelineError::ProjectLoading(format!("reading {path}: {e}")))?;
    Solution::from_json(&text)
        .map_err(|e| PipelineError::ProjectLoading(format!("parsing {path}: {e}")))
}
