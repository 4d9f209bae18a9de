use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use tempfile::tempdir;
use vigil_app_core::{Settings, UiState, UiStatus};
use vigil_cli::{commands, exit_code, ledger_path, Cli, Commands};
use vigil_core::CommitId;
use vigil_persistence::{LedgerEntry, Outcome, ResultsLedger};

fn run_args(argv: &[&str]) -> vigil_cli::RunArgs {
    let cli = Cli::try_parse_from(argv).expect("parse");
    match cli.command {
        Commands::Run(args) => args,
        other => panic!("expected run, got {other:?}"),
    }
}

#[test]
fn run_flags_override_only_what_they_name() {
    let args = run_args(&[
        "vigil-cli",
        "run",
        "repo/app.solution",
        "/tmp/mirror",
        "--pool-size",
        "64",
        "--lazy",
    ]);
    let stored = Settings {
        test_timeout_secs: Some(30),
        ..Settings::default()
    };

    let settings = args.apply(stored);
    assert_eq!(settings.pool_size, vigil_config::MAX_POOL_SIZE);
    assert!(settings.lazy_spawn);
    assert_eq!(settings.test_timeout_secs, Some(30));
    assert_eq!(settings.ledger_path, None);
    assert!(!args.force);
    assert!(args.commit.is_none());
}

#[test]
fn worker_subcommand_parses_but_is_hidden() {
    let cli = Cli::try_parse_from([
        "vigil-cli",
        "worker",
        "--socket",
        "/tmp/vigil/workers.sock",
        "--artifact",
        "target/core-tests",
        "--timeout-ms",
        "1500",
    ])
    .expect("parse");
    match cli.command {
        Commands::Worker {
            socket,
            artifact,
            timeout_ms,
        } => {
            assert_eq!(socket, Utf8PathBuf::from("/tmp/vigil/workers.sock"));
            assert_eq!(artifact, Utf8PathBuf::from("target/core-tests"));
            assert_eq!(timeout_ms, Some(1500));
        }
        other => panic!("expected worker, got {other:?}"),
    }

    let mut help = Vec::new();
    <Cli as clap::CommandFactory>::command()
        .write_long_help(&mut help)
        .expect("help");
    let help = String::from_utf8(help).expect("utf8");
    assert!(help.contains("history"));
    assert!(!help.contains("worker"));
}

#[test]
fn history_needs_a_solution_or_a_ledger() {
    assert!(Cli::try_parse_from(["vigil-cli", "history"]).is_err());
    assert!(Cli::try_parse_from(["vigil-cli", "history", "--ledger", "results.log"]).is_ok());
}

#[test]
fn ledger_sits_next_to_the_solution_unless_configured() {
    let solution = Utf8Path::new("/work/repo/app.solution");
    let settings = Settings::default();
    assert_eq!(
        ledger_path(&settings, solution),
        Utf8PathBuf::from("/work/repo").join(vigil_config::LEDGER_FILENAME)
    );

    let settings = Settings {
        ledger_path: Some("/var/lib/vigil/results.log".into()),
        ..Settings::default()
    };
    assert_eq!(
        ledger_path(&settings, solution),
        Utf8PathBuf::from("/var/lib/vigil/results.log")
    );
}

#[test]
fn failing_statuses_exit_non_zero() {
    assert_eq!(exit_code(UiStatus::Ok), 0);
    assert_eq!(exit_code(UiStatus::Default), 0);
    assert_ne!(exit_code(UiStatus::Bad), 0);
    assert_ne!(exit_code(UiStatus::BadParent), 0);
}

#[test]
fn history_lists_newest_first() {
    let dir = tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("results.log")).unwrap();
    let mut ledger = ResultsLedger::open(&path).unwrap();
    ledger
        .append(LedgerEntry::now(
            CommitId::parse(&"a".repeat(40)).unwrap(),
            "first",
            Outcome::Success,
            Duration::from_secs(12),
            3,
        ))
        .unwrap();
    ledger
        .append(LedgerEntry::now(
            CommitId::parse(&"b".repeat(40)).unwrap(),
            "second",
            Outcome::Failure,
            Duration::from_millis(1500),
            4,
        ))
        .unwrap();

    let lines = commands::history_lines(&ledger);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("bbbbbbb"));
    assert!(lines[0].contains("FAILED"));
    assert!(lines[0].ends_with("second"));
    assert!(lines[1].contains("aaaaaaa"));
    assert!(lines[1].contains("ok"));
    assert!(lines[1].contains("12.0s"));
}

#[test]
fn summary_names_the_verdict_and_label() {
    let state = UiState {
        status: UiStatus::Ok,
        label: "12 tests passed".into(),
        ..UiState::default()
    };
    assert_eq!(commands::summary(&state), "\n:: Passed: 12 tests passed");
    assert_eq!(commands::summary(&UiState::default()), "\n:: Not run");
}
