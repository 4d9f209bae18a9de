use vigil_core::{Solution, StatusEvent, WorkItem};

#[test]
fn parses_solution_manifest() {
    let raw = r#"{
        "projects": [
            { "name": "core", "build": "cargo build -p core" },
            {
                "name": "core-tests",
                "references": ["core"],
                "build": "cargo test -p core --no-run",
                "test_artifact": "target/debug/core-tests"
            }
        ]
    }"#;

    let solution = Solution::from_json(raw).expect("parse solution");
    assert_eq!(solution.projects.len(), 2);
    assert!(solution.projects[0].references.is_empty());
    assert_eq!(solution.test_projects().count(), 1);
    assert_eq!(
        solution.projects[1].test_artifact.as_deref().map(|p| p.as_str()),
        Some("target/debug/core-tests")
    );
}

#[test]
fn test_errors_are_not_terminal() {
    assert!(!StatusEvent::TestError {
        message: "boom".into()
    }
    .is_terminal());
    assert!(StatusEvent::Canceled.is_terminal());
    assert!(StatusEvent::Success { passed: 0 }.is_terminal());
}

#[test]
fn replay_copy_bypasses_parent_check_with_fresh_token() {
    let item = WorkItem::new("/src/app.solution", "/tmp/out").with_commit("abc");
    item.cancel.cancel();

    let replay = item.for_replay();
    assert!(replay.ignore_parent_failure);
    assert!(!replay.cancel.is_cancelled());
    assert_eq!(replay.commit.as_deref(), Some("abc"));
}
