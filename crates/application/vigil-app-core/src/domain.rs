use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use vigil_infra::SpawnMode;
use vigil_pipeline::PipelineOptions;

pub type RunId = uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiStatus {
    #[default]
    Default,
    Working,
    Ok,
    Bad,
    BadParent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UiAction {
    Exit,
    Cancel,
    DisregardParentFailure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UiState {
    pub status: UiStatus,
    /// Progress of the current run in `[0, 1]`.
    pub percentage: f64,
    pub label: String,
    /// Every error reported during the current run, oldest first.
    pub errors: Vec<String>,
    pub actions: Vec<UiAction>,
    pub run_id: Option<RunId>,
    pub estimate: Option<Duration>,
    /// The current run has ended and its percentage reached 1.
    pub finished: bool,
    /// An earlier run of the current replay batch failed.
    pub carried_failure: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            status: UiStatus::Default,
            percentage: 0.0,
            label: String::new(),
            errors: Vec::new(),
            actions: vec![UiAction::Exit],
            run_id: None,
            estimate: None,
            finished: false,
            carried_failure: false,
        }
    }
}

impl UiState {
    pub fn is_enabled(&self, action: UiAction) -> bool {
        self.actions.contains(&action)
    }

    pub(crate) fn refresh_actions(&mut self) {
        let mut actions = vec![UiAction::Exit];
        match self.status {
            UiStatus::Working => actions.push(UiAction::Cancel),
            UiStatus::BadParent => actions.push(UiAction::DisregardParentFailure),
            _ => {}
        }
        self.actions = actions;
    }
}

fn default_pool_size() -> usize {
    vigil_config::DEFAULT_POOL_SIZE
}

fn default_retry_ttl_secs() -> u64 {
    vigil_config::DEFAULT_RETRY_TTL_SECS
}

/// User settings persisted as `settings.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_retry_ttl_secs")]
    pub retry_ttl_secs: u64,
    #[serde(default)]
    pub test_timeout_secs: Option<u64>,
    /// Open worker endpoints one at a time.
    #[serde(default)]
    pub lazy_spawn: bool,
    #[serde(default)]
    pub ledger_path: Option<Utf8PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            retry_ttl_secs: default_retry_ttl_secs(),
            test_timeout_secs: None,
            lazy_spawn: false,
            ledger_path: None,
        }
    }
}

impl Settings {
    pub fn retry_ttl(&self) -> Duration {
        Duration::from_secs(self.retry_ttl_secs)
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            pool_size: vigil_config::clamp_pool_size(self.pool_size),
            test_timeout: self.test_timeout_secs.map(Duration::from_secs),
            spawn_mode: if self.lazy_spawn {
                SpawnMode::Lazy
            } else {
                SpawnMode::Eager
            },
            ..PipelineOptions::default()
        }
    }
}
