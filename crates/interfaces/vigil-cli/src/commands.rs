use std::io::{IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use vigil_app_core::{
    AppCommand, AppStore, FilePersistence, RetryTracker, RunnerPort, Session, Settings, UiAction,
    UiState, UiStatus,
};
use vigil_core::WorkItem;
use vigil_persistence::{LedgerEntry, Outcome, ResultsLedger};
use vigil_pipeline::{LibtestDiscovery, RunOrchestrator, WorkerRunner};

use crate::{ledger_path, RunArgs};

const BAR_LEN: u64 = 1000;

/// Stored settings, or the defaults when they cannot be read.
pub fn load_settings() -> Settings {
    match FilePersistence::new().load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            warn!("using default settings: {e:#}");
            Settings::default()
        }
    }
}

pub async fn cmd_run(args: RunArgs) -> Result<UiStatus> {
    let settings = args.apply(load_settings());
    let ledger_path = ledger_path(&settings, &args.solution);

    println!(":: Running {}", args.solution);
    println!("   Mirror: {}", args.destination);
    println!("   Ledger: {}", ledger_path);

    let ledger = ResultsLedger::open(&ledger_path)
        .with_context(|| format!("Failed to open ledger {ledger_path}"))?;
    let orchestrator = RunOrchestrator::new(ledger, settings.pipeline_options())?;
    let retry = Arc::new(RetryTracker::new(settings.retry_ttl()));
    let mut session = Session::new(AppStore::default(), Arc::new(orchestrator), retry);

    let mut item = WorkItem::new(args.solution.clone(), args.destination.clone()).forced(args.force);
    if let Some(commit) = &args.commit {
        item = item.with_commit(commit.clone());
    }
    item.ignore_parent_failure = args.ignore_parent_failure;

    session.dispatch(AppCommand::Submit(item));
    let mut state = drive(&mut session).await;

    if state.is_enabled(UiAction::DisregardParentFailure) {
        if confirm("   Parent commit failed. Test this commit anyway? [y/N] ")? {
            session.dispatch(AppCommand::DisregardParentFailure);
            state = drive(&mut session).await;
        } else {
            println!("   Re-run with --ignore-parent-failure to test it anyway.");
        }
    }

    println!("{}", summary(&state));
    Ok(state.status)
}

/// Ticks the session until the current run has finished, mapping Ctrl-C to
/// Cancel (or Exit when nothing is cancellable).
async fn drive<R: RunnerPort>(session: &mut Session<R>) -> UiState {
    let pb = progress_bar();
    let mut ticker = tokio::time::interval(vigil_config::poll_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut shown_errors = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                let cmd = if session.store.state().is_enabled(UiAction::Cancel) {
                    AppCommand::Cancel
                } else {
                    AppCommand::Exit
                };
                info!("interrupted, dispatching {:?}", cmd);
                session.dispatch(cmd);
            }
        }

        session.tick();
        let state = session.store.state();

        if state.errors.len() < shown_errors {
            shown_errors = 0;
        }
        for err in state.errors.iter().skip(shown_errors) {
            pb.println(format!("   error: {err}"));
        }
        shown_errors = state.errors.len();

        pb.set_position((state.percentage * BAR_LEN as f64).round() as u64);
        pb.set_message(state.label.clone());

        if !session.is_running() {
            pb.finish();
            return state;
        }
    }
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(BAR_LEN);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn confirm(prompt: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Ok(false);
    }
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

pub fn summary(state: &UiState) -> String {
    let verdict = match state.status {
        UiStatus::Ok => "Passed",
        UiStatus::Bad => "Failed",
        UiStatus::BadParent => "Deferred (parent commit failed)",
        UiStatus::Working => "Interrupted",
        UiStatus::Default => "Not run",
    };
    if state.label.is_empty() {
        format!("\n:: {verdict}")
    } else {
        format!("\n:: {verdict}: {}", state.label)
    }
}

pub async fn cmd_worker(
    socket: Utf8PathBuf,
    artifact: Utf8PathBuf,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| anyhow::anyhow!("non UTF-8 working directory {}", p.display()))?;

    let runner = WorkerRunner::new(
        Arc::new(LibtestDiscovery::new(cwd)),
        timeout_ms.map(Duration::from_millis),
    );
    runner.run(&socket, &artifact).await?;
    Ok(())
}

pub fn cmd_history(solution: Option<Utf8PathBuf>, ledger: Option<Utf8PathBuf>) -> Result<()> {
    let path = match (ledger, solution) {
        (Some(path), _) => path,
        (None, Some(solution)) => ledger_path(&load_settings(), &solution),
        (None, None) => anyhow::bail!("either a solution or --ledger is required"),
    };

    if !path.exists() {
        println!(":: No runs recorded at {path}");
        return Ok(());
    }

    let ledger =
        ResultsLedger::open(&path).with_context(|| format!("Failed to open ledger {path}"))?;
    println!(":: {} runs recorded in {}", ledger.entries().len(), path);
    for line in history_lines(&ledger) {
        println!("   {line}");
    }
    match ledger.estimator().estimate() {
        Some(d) => println!("\n   Estimated run time: {:.1}s", d.as_secs_f64()),
        None => println!("\n   Estimated run time: unknown"),
    }
    Ok(())
}

/// Ledger entries, newest first.
pub fn history_lines(ledger: &ResultsLedger) -> Vec<String> {
    ledger.entries().iter().rev().map(format_entry).collect()
}

pub fn format_entry(entry: &LedgerEntry) -> String {
    let outcome = match entry.outcome {
        Outcome::Success => "ok",
        Outcome::Failure => "FAILED",
        Outcome::Ignored => "ignored",
    };
    format!(
        "{}  {}  {:<6}  {:>7.1}s  {:>4} tests  {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.commit.short(),
        outcome,
        entry.duration.as_secs_f64(),
        entry.test_count,
        entry.message
    )
}
