use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info};
use vigil_core::{StatusEvent, WorkItem};
use vigil_pipeline::{RunOutcome, RunReport};

use crate::app_core::{AppCommand, AppStore, DomainEvent};
use crate::domain::{RunId, UiAction};
use crate::ports::RunnerPort;
use crate::retry::RetryTracker;

struct ActiveRun {
    run_id: RunId,
    item: WorkItem,
    started: Instant,
    done: bool,
}

/// Single-threaded actor owning the status projection, the retry list and
/// the runner. Domain events arrive on one channel and are applied in `tick`.
pub struct Session<R> {
    pub store: AppStore,
    runner: Arc<R>,
    retry: Arc<RetryTracker>,
    active: Option<ActiveRun>,
    /// Replayed runs waiting for the active one to finish.
    queued: VecDeque<WorkItem>,
    exit_requested: bool,

    tx: mpsc::Sender<DomainEvent>,
    rx: mpsc::Receiver<DomainEvent>,
}

impl<R> Session<R>
where
    R: RunnerPort,
{
    pub fn new(store: AppStore, runner: Arc<R>, retry: Arc<RetryTracker>) -> Self {
        let (tx, rx) = mpsc::channel(100);
        Self {
            store,
            runner,
            retry,
            active: None,
            queued: VecDeque::new(),
            exit_requested: false,
            tx,
            rx,
        }
    }

    pub fn dispatch(&mut self, cmd: AppCommand) {
        match cmd {
            AppCommand::Submit(item) => {
                if self.is_running() {
                    self.store
                        .apply(DomainEvent::UserError("A run is already in progress".into()));
                    return;
                }
                self.start(item, false);
            }

            AppCommand::Cancel => {
                if !self.store.state().is_enabled(UiAction::Cancel) {
                    return;
                }
                self.queued.clear();
                if let Some(active) = &self.active {
                    info!("cancelling run {}", active.run_id);
                    active.item.cancel.cancel();
                }
            }

            AppCommand::DisregardParentFailure => {
                if !self
                    .store
                    .state()
                    .is_enabled(UiAction::DisregardParentFailure)
                {
                    return;
                }
                let replayed = self.retry.replay(|item| self.queued.push_back(item));
                if replayed == 0 {
                    self.store
                        .apply(DomainEvent::UserError("Deferred run expired".into()));
                    return;
                }
                info!("replaying {} deferred run(s)", replayed);
                if !self.is_running() {
                    if let Some(item) = self.queued.pop_front() {
                        self.start(item, false);
                    }
                }
            }

            AppCommand::Exit => {
                self.exit_requested = true;
                self.queued.clear();
                if let Some(active) = &self.active {
                    active.item.cancel.cancel();
                }
            }
        }
    }

    fn start(&mut self, item: WorkItem, continues_batch: bool) {
        let run_id: RunId = uuid::Uuid::new_v4();
        self.store.apply(DomainEvent::RunStarted {
            run_id,
            estimate: self.runner.estimate(),
            continues_batch,
        });
        self.active = Some(ActiveRun {
            run_id,
            item: item.clone(),
            started: Instant::now(),
            done: false,
        });

        let tx = self.tx.clone();
        let runner = self.runner.clone();
        let spawn_res = std::thread::Builder::new()
            .name("vigil-run".into())
            .spawn(move || {
                let rt = match crate::async_runtime::runtime() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = tx.blocking_send(DomainEvent::Status {
                            run_id,
                            event: StatusEvent::UnhandledException {
                                message: format!("Failed to start async runtime: {e}"),
                            },
                        });
                        let _ = tx.blocking_send(DomainEvent::RunFinished {
                            run_id,
                            report: failed_report(),
                        });
                        return;
                    }
                };

                rt.block_on(async move {
                    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
                    let run = async move { runner.run(&item, &events_tx).await };
                    let forward = async {
                        while let Some(event) = events_rx.recv().await {
                            let _ = tx.send(DomainEvent::Status { run_id, event }).await;
                        }
                    };
                    let (report, ()) = tokio::join!(run, forward);
                    let _ = tx.send(DomainEvent::RunFinished { run_id, report }).await;
                });
            });

        if let Err(e) = spawn_res {
            self.store.apply(DomainEvent::UserError(format!(
                "Failed to start run worker thread: {e}"
            )));
            self.store.apply(DomainEvent::RunFinished {
                run_id,
                report: failed_report(),
            });
            if let Some(active) = self.active.as_mut() {
                active.done = true;
            }
        }
    }

    pub fn tick(&mut self) {
        while let Ok(ev) = self.rx.try_recv() {
            if let Some(run_id) = ev.run_id() {
                let current = self.active.as_ref().map(|a| a.run_id);
                if current != Some(run_id) {
                    debug!("ignoring event of stale run {}", run_id);
                    continue;
                }
            }

            let mut finished = false;
            match &ev {
                DomainEvent::Status {
                    event: StatusEvent::ParentFailed { .. },
                    ..
                } => {
                    if let Some(active) = &self.active {
                        self.retry.add(active.item.clone());
                    }
                }
                DomainEvent::RunFinished { report, .. } => {
                    debug!("run finished: {:?}", report.outcome);
                    if let Some(active) = self.active.as_mut() {
                        active.done = true;
                    }
                    finished = true;
                }
                _ => {}
            }
            self.store.apply(ev);

            if finished && !self.exit_requested {
                if let Some(item) = self.queued.pop_front() {
                    self.start(item, true);
                }
            }
        }

        if let Some(active) = self.active.as_ref().filter(|a| !a.done) {
            self.store.apply(DomainEvent::Progress {
                run_id: active.run_id,
                elapsed: active.started.elapsed(),
            });
        }
    }

    pub fn sender(&self) -> mpsc::Sender<DomainEvent> {
        self.tx.clone()
    }

    pub fn retry(&self) -> &RetryTracker {
        &self.retry
    }

    pub fn current_run(&self) -> Option<RunId> {
        self.active.as_ref().map(|a| a.run_id)
    }

    pub fn is_running(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.done)
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }
}

fn failed_report() -> RunReport {
    RunReport {
        outcome: RunOutcome::Failed,
        passed: 0,
        elapsed: Duration::ZERO,
    }
}
