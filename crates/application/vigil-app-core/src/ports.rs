use std::time::Duration;

use vigil_core::WorkItem;
use vigil_pipeline::{EventSink, RunOrchestrator, RunReport};

use crate::domain::Settings;

pub trait SettingsRepo: Send + Sync + 'static {
    fn load(&self) -> anyhow::Result<Settings>;
    fn save(&self, settings: &Settings) -> anyhow::Result<()>;
}

/// Executes work items for the session.
#[async_trait::async_trait]
pub trait RunnerPort: Send + Sync + 'static {
    async fn run(&self, item: &WorkItem, events: &EventSink) -> RunReport;
    fn estimate(&self) -> Option<Duration>;
}

#[async_trait::async_trait]
impl RunnerPort for RunOrchestrator {
    async fn run(&self, item: &WorkItem, events: &EventSink) -> RunReport {
        RunOrchestrator::run(self, item, events).await
    }

    fn estimate(&self) -> Option<Duration> {
        RunOrchestrator::estimate(self)
    }
}
