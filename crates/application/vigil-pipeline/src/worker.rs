//! Worker side of the protocol: runs one test project and reports each case.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use tracing::{info, warn};
use vigil_core::protocol::WorkerMessage;
use vigil_infra::WorkerClient;

use crate::ports::{TestDiscovery, TestVerdict};
use crate::PipelineError;

/// Passed and failed counts of one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub passed: u64,
    pub failed: u64,
}

pub struct WorkerRunner {
    discovery: Arc<dyn TestDiscovery>,
    default_timeout: Option<Duration>,
}

impl WorkerRunner {
    pub fn new(discovery: Arc<dyn TestDiscovery>, default_timeout: Option<Duration>) -> Self {
        Self {
            discovery,
            default_timeout,
        }
    }

    /// Connects to the orchestrator, runs every discovered test of
    /// `artifact` and always finishes with a `STOPPED` line.
    pub async fn run(
        &self,
        socket: &Utf8Path,
        artifact: &Utf8Path,
    ) -> Result<WorkerSummary, PipelineError> {
        let mut client = WorkerClient::connect(socket).await?;
        let summary = self.run_cases(&mut client, artifact).await;
        client
            .stop(summary.passed)
            .await
            .map_err(|e| PipelineError::Environment(format!("sending stop: {e}")))?;
        info!(
            "{}: {} passed, {} failed",
            artifact, summary.passed, summary.failed
        );
        Ok(summary)
    }

    async fn run_cases(&self, client: &mut WorkerClient, artifact: &Utf8Path) -> WorkerSummary {
        let mut summary = WorkerSummary::default();

        let cases = match self.discovery.discover(artifact).await {
            Ok(cases) => cases,
            Err(e) => {
                summary.failed += 1;
                send(client, WorkerMessage::Error(format!("{artifact}: {e}"))).await;
                return summary;
            }
        };

        for case in cases {
            send(client, WorkerMessage::Started(case.name.clone())).await;

            let timeout = case.timeout.or(self.default_timeout);
            let verdict = match self.discovery.execute(artifact, &case, timeout).await {
                Ok(verdict) => verdict,
                Err(e) => TestVerdict::Failed(e.to_string()),
            };

            let message = match (verdict, case.expect_failure) {
                (TestVerdict::Passed, false) | (TestVerdict::Failed(_), true) => {
                    summary.passed += 1;
                    WorkerMessage::Success(case.name)
                }
                (TestVerdict::Passed, true) => {
                    summary.failed += 1;
                    WorkerMessage::Error(format!("{}: expected failure but passed", case.name))
                }
                (TestVerdict::Failed(reason), false) => {
                    summary.failed += 1;
                    WorkerMessage::Error(format!("{}: {reason}", case.name))
                }
                (TestVerdict::TimedOut(limit), _) => {
                    summary.failed += 1;
                    WorkerMessage::Error(format!(
                        "{}: timed out after {}s",
                        case.name,
                        limit.as_secs()
                    ))
                }
            };
            send(client, message).await;
        }
        summary
    }
}

async fn send(client: &mut WorkerClient, message: WorkerMessage) {
    // A broken channel surfaces on the final stop.
    if let Err(e) = client.send(&message).await {
        warn!("failed to send {:?}: {}", message.codon(), e);
    }
}
