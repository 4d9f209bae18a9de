use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vigil_core::{CommitId, Project, StatusEvent, WorkItem};
use vigil_infra::CommitInfo;
use vigil_persistence::{LedgerEntry, Outcome, ResultsLedger};
use vigil_pipeline::{
    BuildEngine, BuildReport, PipelineError, PipelineOptions, RunOrchestrator, RunOutcome,
    RunReport, VersionControl, WorkerLauncher, WorkerSpec,
};

const HEAD: &str = "1111111111111111111111111111111111111111";
const PARENT: &str = "2222222222222222222222222222222222222222";

fn id(raw: &str) -> CommitId {
    CommitId::parse(raw).unwrap()
}

#[derive(Default)]
struct FakeVcs {
    checkouts: Mutex<Vec<CommitId>>,
}

#[async_trait::async_trait]
impl VersionControl for FakeVcs {
    async fn head(&self, _repo: &Utf8Path) -> Result<CommitInfo, PipelineError> {
        Ok(CommitInfo {
            id: id(HEAD),
            message: "add parser".into(),
        })
    }

    async fn commit_info(
        &self,
        _repo: &Utf8Path,
        commit: &CommitId,
    ) -> Result<CommitInfo, PipelineError> {
        Ok(CommitInfo {
            id: commit.clone(),
            message: "pinned".into(),
        })
    }

    async fn parent(
        &self,
        _repo: &Utf8Path,
        _commit: &CommitId,
    ) -> Result<Option<CommitId>, PipelineError> {
        Ok(Some(id(PARENT)))
    }

    async fn checkout(&self, _repo: &Utf8Path, commit: &CommitId) -> Result<(), PipelineError> {
        self.checkouts.lock().unwrap().push(commit.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeBuild {
    fail_on: Option<String>,
    cancel_on_build: Option<CancellationToken>,
    built: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl BuildEngine for FakeBuild {
    async fn build(
        &self,
        _root: &Utf8Path,
        project: &Project,
        _cancel: &CancellationToken,
    ) -> Result<BuildReport, PipelineError> {
        self.built.lock().unwrap().push(project.name.clone());
        if let Some(token) = &self.cancel_on_build {
            token.cancel();
        }
        let failed = self.fail_on.as_deref() == Some(project.name.as_str());
        Ok(BuildReport {
            success: !failed,
            diagnostics: if failed {
                format!("{} failed", project.name)
            } else {
                String::new()
            },
        })
    }
}

/// Writes canned protocol lines for each project, without a real worker.
#[derive(Default)]
struct ScriptedLauncher {
    scripts: HashMap<String, Vec<&'static str>>,
    silent: bool,
    launched: AtomicUsize,
}

#[async_trait::async_trait]
impl WorkerLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        spec: &WorkerSpec,
        _cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.launched.fetch_add(1, Ordering::SeqCst);
        if self.silent {
            return Ok(());
        }
        let mut stream = UnixStream::connect(spec.socket.as_std_path()).await.unwrap();
        for line in self.scripts.get(&spec.project).into_iter().flatten() {
            stream.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        }
        stream.shutdown().await.unwrap();
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    source: Utf8PathBuf,
    destination: Utf8PathBuf,
    socket: Utf8PathBuf,
}

impl Fixture {
    fn new(solution: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let source = base.join("source");
        std::fs::create_dir_all(source.join("src")).unwrap();
        std::fs::write(source.join("src/lib.rs"), "pub fn answer() -> u32 { 42 }").unwrap();
        std::fs::write(source.join("app.solution"), solution).unwrap();
        Self {
            _dir: dir,
            destination: base.join("mirror"),
            socket: base.join("workers.sock"),
            source,
        }
    }

    fn item(&self) -> WorkItem {
        WorkItem::new(self.source.join("app.solution"), &self.destination)
    }

    fn orchestrator(
        &self,
        build: Arc<FakeBuild>,
        vcs: Arc<FakeVcs>,
        launcher: Arc<ScriptedLauncher>,
    ) -> RunOrchestrator {
        let ledger =
            ResultsLedger::open(&self.source.join(vigil_config::LEDGER_FILENAME)).unwrap();
        let options = PipelineOptions {
            socket_path: Some(self.socket.clone()),
            ..PipelineOptions::default()
        };
        RunOrchestrator::with_components(ledger, options, build, vcs, launcher)
    }
}

async fn run(orchestrator: &RunOrchestrator, item: &WorkItem) -> (RunReport, Vec<StatusEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = tokio::time::timeout(Duration::from_secs(20), orchestrator.run(item, &tx))
        .await
        .expect("run did not finish");
    drop(tx);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (report, events)
}

const TWO_LIBS: &str = r#"{"projects": [
    {"name": "app", "references": ["core"], "build": "make app"},
    {"name": "core", "build": "make core"}
]}"#;

const LIB_AND_TESTS: &str = r#"{"projects": [
    {"name": "core", "build": "make core"},
    {"name": "core-tests", "references": ["core"], "build": "make tests",
     "test_artifact": "target/core-tests"}
]}"#;

const TWO_TEST_SUITES: &str = r#"{"projects": [
    {"name": "unit", "build": "make unit", "test_artifact": "target/unit"},
    {"name": "integration", "build": "make integration", "test_artifact": "target/integration"}
]}"#;

#[tokio::test]
async fn builds_without_tests_report_progress_then_success() {
    let fx = Fixture::new(TWO_LIBS);
    let build = Arc::new(FakeBuild::default());
    let orchestrator = fx.orchestrator(
        build.clone(),
        Arc::new(FakeVcs::default()),
        Arc::new(ScriptedLauncher::default()),
    );
    assert_eq!(orchestrator.estimate(), None);

    let (report, events) = run(&orchestrator, &fx.item()).await;

    assert_eq!(
        events,
        vec![
            StatusEvent::BuildSuccess {
                project: "core".into(),
                built: 1,
                total: 2
            },
            StatusEvent::BuildSuccess {
                project: "app".into(),
                built: 2,
                total: 2
            },
            StatusEvent::Success { passed: 0 },
        ]
    );
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(*build.built.lock().unwrap(), vec!["core", "app"]);
    assert_eq!(
        orchestrator.ledger().lock().await.outcome_of(&id(HEAD)),
        Some(Outcome::Success)
    );
    assert!(orchestrator.estimate().is_some());

    assert!(fx.destination.join("src/lib.rs").exists());
    assert!(!fx.destination.join(vigil_config::LEDGER_FILENAME).exists());
}

#[tokio::test]
async fn build_error_halts_before_any_test_work() {
    let fx = Fixture::new(LIB_AND_TESTS);
    let launcher = Arc::new(ScriptedLauncher::default());
    let orchestrator = fx.orchestrator(
        Arc::new(FakeBuild {
            fail_on: Some("core".into()),
            ..FakeBuild::default()
        }),
        Arc::new(FakeVcs::default()),
        launcher.clone(),
    );

    let (report, events) = run(&orchestrator, &fx.item()).await;

    assert_eq!(
        events,
        vec![StatusEvent::BuildError {
            project: "core".into(),
            message: "core failed".into(),
            built: 0,
            total: 2
        }]
    );
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(launcher.launched.load(Ordering::SeqCst), 0);
    assert_eq!(
        orchestrator.ledger().lock().await.outcome_of(&id(HEAD)),
        Some(Outcome::Failure)
    );
}

#[tokio::test]
async fn test_failures_accumulate_without_terminal_event() {
    let fx = Fixture::new(LIB_AND_TESTS);
    let launcher = Arc::new(ScriptedLauncher {
        scripts: HashMap::from([(
            "core-tests".to_string(),
            vec![
                "STARTEDparse_empty",
                "ERROREDparse_empty: assertion failed",
                "STARTEDparse_ok",
                "SUCCESSparse_ok",
                "STOPPED1",
            ],
        )]),
        ..ScriptedLauncher::default()
    });
    let orchestrator = fx.orchestrator(
        Arc::new(FakeBuild::default()),
        Arc::new(FakeVcs::default()),
        launcher,
    );

    let (report, events) = run(&orchestrator, &fx.item()).await;

    assert_eq!(
        events[2..],
        [
            StatusEvent::TestError {
                message: "parse_empty: assertion failed".into()
            },
            StatusEvent::TestSuccess { passed: 1 },
        ]
    );
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.passed, 1);
    assert_eq!(
        orchestrator.ledger().lock().await.outcome_of(&id(HEAD)),
        Some(Outcome::Failure)
    );
}

#[tokio::test]
async fn passing_workers_sum_into_success() {
    let fx = Fixture::new(TWO_TEST_SUITES);
    let launcher = Arc::new(ScriptedLauncher {
        scripts: HashMap::from([
            ("unit".to_string(), vec!["SUCCESSa", "SUCCESSb", "STOPPED2"]),
            (
                "integration".to_string(),
                vec!["SUCCESSc", "SUCCESSd", "SUCCESSe", "STOPPED3"],
            ),
        ]),
        ..ScriptedLauncher::default()
    });
    let orchestrator = fx.orchestrator(
        Arc::new(FakeBuild::default()),
        Arc::new(FakeVcs::default()),
        launcher.clone(),
    );

    let (report, events) = run(&orchestrator, &fx.item()).await;

    assert_eq!(events.last(), Some(&StatusEvent::Success { passed: 5 }));
    let worker_totals: Vec<&StatusEvent> = events
        .iter()
        .filter(|e| matches!(e, StatusEvent::TestSuccess { .. }))
        .collect();
    assert_eq!(worker_totals.len(), 2);
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(launcher.launched.load(Ordering::SeqCst), 2);
    let ledger = orchestrator.ledger();
    let ledger = ledger.lock().await;
    assert_eq!(ledger.entries()[0].test_count, 5);
}

#[tokio::test]
async fn recorded_commit_is_skipped_unless_forced() {
    let fx = Fixture::new(TWO_LIBS);
    let build = Arc::new(FakeBuild::default());
    let orchestrator = fx.orchestrator(
        build.clone(),
        Arc::new(FakeVcs::default()),
        Arc::new(ScriptedLauncher::default()),
    );
    orchestrator
        .ledger()
        .lock()
        .await
        .append(LedgerEntry::now(
            id(HEAD),
            "add parser",
            Outcome::Success,
            Duration::from_secs(3),
            0,
        ))
        .unwrap();

    let (report, events) = run(&orchestrator, &fx.item()).await;
    assert_eq!(report.outcome, RunOutcome::Skipped);
    assert!(matches!(events[..], [StatusEvent::Skipped { .. }]));
    assert!(build.built.lock().unwrap().is_empty());

    let (report, _) = run(&orchestrator, &fx.item().forced(true)).await;
    assert_eq!(report.outcome, RunOutcome::Succeeded);
}

#[tokio::test]
async fn failed_parent_defers_until_replayed() {
    let fx = Fixture::new(TWO_LIBS);
    let orchestrator = fx.orchestrator(
        Arc::new(FakeBuild::default()),
        Arc::new(FakeVcs::default()),
        Arc::new(ScriptedLauncher::default()),
    );
    orchestrator
        .ledger()
        .lock()
        .await
        .append(LedgerEntry::now(
            id(PARENT),
            "break things",
            Outcome::Failure,
            Duration::from_secs(1),
            0,
        ))
        .unwrap();

    let item = fx.item();
    let (report, events) = run(&orchestrator, &item).await;
    assert_eq!(report.outcome, RunOutcome::ParentFailed);
    assert!(matches!(events[..], [StatusEvent::ParentFailed { .. }]));

    let (report, events) = run(&orchestrator, &item.for_replay()).await;
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(events.last(), Some(&StatusEvent::Success { passed: 0 }));
}

#[tokio::test]
async fn disable_flag_skips_the_repository() {
    let fx = Fixture::new(TWO_LIBS);
    std::fs::write(fx.source.join(vigil_config::DISABLE_FLAG_FILENAME), "").unwrap();
    let orchestrator = fx.orchestrator(
        Arc::new(FakeBuild::default()),
        Arc::new(FakeVcs::default()),
        Arc::new(ScriptedLauncher::default()),
    );

    let (report, events) = run(&orchestrator, &fx.item()).await;
    assert_eq!(report.outcome, RunOutcome::Skipped);
    assert!(matches!(events[..], [StatusEvent::Skipped { .. }]));
}

#[tokio::test]
async fn cancelled_run_ends_canceled_without_ledger_entry() {
    let fx = Fixture::new(TWO_LIBS);
    let item = fx.item();
    let orchestrator = fx.orchestrator(
        Arc::new(FakeBuild {
            cancel_on_build: Some(item.cancel.clone()),
            ..FakeBuild::default()
        }),
        Arc::new(FakeVcs::default()),
        Arc::new(ScriptedLauncher::default()),
    );

    let (report, events) = run(&orchestrator, &item).await;

    assert_eq!(events, vec![StatusEvent::Canceled]);
    assert_eq!(report.outcome, RunOutcome::Canceled);
    assert!(orchestrator.ledger().lock().await.entries().is_empty());
}

#[tokio::test]
async fn wrong_extension_is_an_argument_error() {
    let fx = Fixture::new(TWO_LIBS);
    let orchestrator = fx.orchestrator(
        Arc::new(FakeBuild::default()),
        Arc::new(FakeVcs::default()),
        Arc::new(ScriptedLauncher::default()),
    );
    let item = WorkItem::new(fx.source.join("src/lib.rs"), &fx.destination);

    let (_, events) = run(&orchestrator, &item).await;
    assert!(matches!(events[..], [StatusEvent::ArgumentError { .. }]));
}

#[tokio::test]
async fn unparsable_commit_is_an_argument_error() {
    let fx = Fixture::new(TWO_LIBS);
    let orchestrator = fx.orchestrator(
        Arc::new(FakeBuild::default()),
        Arc::new(FakeVcs::default()),
        Arc::new(ScriptedLauncher::default()),
    );

    let (_, events) = run(&orchestrator, &fx.item().with_commit("not-a-hash")).await;
    assert!(matches!(events[..], [StatusEvent::ArgumentError { .. }]));
}

#[tokio::test]
async fn requested_commit_is_checked_out_in_the_mirror() {
    let fx = Fixture::new(TWO_LIBS);
    let vcs = Arc::new(FakeVcs::default());
    let orchestrator = fx.orchestrator(
        Arc::new(FakeBuild::default()),
        vcs.clone(),
        Arc::new(ScriptedLauncher::default()),
    );

    let (report, _) = run(&orchestrator, &fx.item().with_commit(HEAD)).await;
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(*vcs.checkouts.lock().unwrap(), vec![id(HEAD)]);
}

#[tokio::test]
async fn cyclic_solution_is_a_loading_error() {
    let fx = Fixture::new(
        r#"{"projects": [
            {"name": "a", "references": ["b"], "build": "make a"},
            {"name": "b", "references": ["a"], "build": "make b"}
        ]}"#,
    );
    let orchestrator = fx.orchestrator(
        Arc::new(FakeBuild::default()),
        Arc::new(FakeVcs::default()),
        Arc::new(ScriptedLauncher::default()),
    );

    let (_, events) = run(&orchestrator, &fx.item()).await;
    assert!(matches!(events[..], [StatusEvent::ProjectLoadingError { .. }]));
}

#[tokio::test]
async fn worker_without_stop_is_unhandled() {
    let fx = Fixture::new(LIB_AND_TESTS);
    let launcher = Arc::new(ScriptedLauncher {
        scripts: HashMap::from([("core-tests".to_string(), vec!["SUCCESSonly"])]),
        ..ScriptedLauncher::default()
    });
    let orchestrator = fx.orchestrator(
        Arc::new(FakeBuild::default()),
        Arc::new(FakeVcs::default()),
        launcher,
    );

    let (report, events) = run(&orchestrator, &fx.item()).await;

    assert!(matches!(
        events.last(),
        Some(StatusEvent::UnhandledException { .. })
    ));
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(orchestrator.ledger().lock().await.entries().is_empty());
}

#[tokio::test]
async fn worker_that_never_connects_is_unhandled() {
    let fx = Fixture::new(LIB_AND_TESTS);
    let orchestrator = fx.orchestrator(
        Arc::new(FakeBuild::default()),
        Arc::new(FakeVcs::default()),
        Arc::new(ScriptedLauncher {
            silent: true,
            ..ScriptedLauncher::default()
        }),
    );

    let (_, events) = run(&orchestrator, &fx.item()).await;

    match events.last() {
        Some(StatusEvent::UnhandledException { message }) => {
            assert!(message.contains("never connected"), "{message}")
        }
        other => panic!("unexpected {other:?}"),
    }
}

/// Connects, announces a test and then blocks until the run is cancelled.
struct HangingLauncher;

#[async_trait::async_trait]
impl WorkerLauncher for HangingLauncher {
    async fn launch(
        &self,
        spec: &WorkerSpec,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let mut stream = UnixStream::connect(spec.socket.as_std_path()).await.unwrap();
        stream.write_all(b"STARTEDslow_case\n").await.unwrap();
        cancel.cancelled().await;
        Err(PipelineError::Canceled)
    }
}

#[tokio::test]
async fn cancelling_with_connected_workers_ends_canceled_promptly() {
    let fx = Fixture::new(TWO_TEST_SUITES);
    let ledger = ResultsLedger::open(&fx.source.join(vigil_config::LEDGER_FILENAME)).unwrap();
    let options = PipelineOptions {
        socket_path: Some(fx.socket.clone()),
        ..PipelineOptions::default()
    };
    let orchestrator = RunOrchestrator::with_components(
        ledger,
        options,
        Arc::new(FakeBuild::default()),
        Arc::new(FakeVcs::default()),
        Arc::new(HangingLauncher),
    );
    let item = fx.item();

    let token = item.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        token.cancel();
    });

    let started = Instant::now();
    let (report, events) = run(&orchestrator, &item).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.outcome, RunOutcome::Canceled);
    assert_eq!(events.last(), Some(&StatusEvent::Canceled));
    assert!(!events.iter().any(|e| e.is_fatal_error()));
    assert!(orchestrator.ledger().lock().await.entries().is_empty());
}

#[tokio::test]
async fn run_can_be_driven_from_a_spawned_task() {
    let fx = Fixture::new(TWO_TEST_SUITES);
    let launcher = Arc::new(ScriptedLauncher {
        scripts: HashMap::from([
            ("unit".to_string(), vec!["SUCCESSa", "STOPPED1"]),
            ("integration".to_string(), vec!["SUCCESSb", "STOPPED1"]),
        ]),
        ..ScriptedLauncher::default()
    });
    let orchestrator = Arc::new(fx.orchestrator(
        Arc::new(FakeBuild::default()),
        Arc::new(FakeVcs::default()),
        launcher,
    ));
    let item = fx.item();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(&item, &tx).await })
    };
    let report = tokio::time::timeout(Duration::from_secs(20), task)
        .await
        .expect("run did not finish")
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Succeeded);
    let mut last = None;
    while let Some(event) = rx.recv().await {
        last = Some(event);
    }
    assert_eq!(last, Some(StatusEvent::Success { passed: 2 }));
}

/// `unit` writes a line with an unknown codon; every other worker stays
/// connected until it is told to stop.
struct CorruptingLauncher;

#[async_trait::async_trait]
impl WorkerLauncher for CorruptingLauncher {
    async fn launch(
        &self,
        spec: &WorkerSpec,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let Ok(mut stream) = UnixStream::connect(spec.socket.as_std_path()).await else {
            return Ok(());
        };
        if spec.project == "unit" {
            stream.write_all(b"XXgarbled\n").await.unwrap();
            stream.shutdown().await.unwrap();
            return Ok(());
        }
        let _ = stream.write_all(b"STARTEDslow_case\n").await;
        cancel.cancelled().await;
        Err(PipelineError::Canceled)
    }
}

#[tokio::test]
async fn corrupt_worker_output_stops_the_whole_run() {
    let fx = Fixture::new(TWO_TEST_SUITES);
    let ledger = ResultsLedger::open(&fx.source.join(vigil_config::LEDGER_FILENAME)).unwrap();
    let options = PipelineOptions {
        socket_path: Some(fx.socket.clone()),
        ..PipelineOptions::default()
    };
    let orchestrator = RunOrchestrator::with_components(
        ledger,
        options,
        Arc::new(FakeBuild::default()),
        Arc::new(FakeVcs::default()),
        Arc::new(CorruptingLauncher),
    );
    let item = fx.item();

    let started = Instant::now();
    let (report, events) = run(&orchestrator, &item).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!item.cancel.is_cancelled());
    match events.last() {
        Some(StatusEvent::UnhandledException { message }) => {
            assert!(message.contains("unknown codon"), "{message}")
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(orchestrator.ledger().lock().await.entries().is_empty());
}
