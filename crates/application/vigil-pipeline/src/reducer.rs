//! Folds the merged worker line stream into status events.

use tracing::debug;
use vigil_core::protocol::{ProtocolError, WorkerMessage};
use vigil_core::StatusEvent;
use vigil_infra::LineStream;

use crate::PipelineError;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResultReducer {
    passed: u64,
    errors: usize,
    stops: usize,
}

impl ResultReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one protocol line, returning the event it produces, if any.
    pub fn apply(&mut self, line: &str) -> Result<Option<StatusEvent>, ProtocolError> {
        match WorkerMessage::decode(line)? {
            WorkerMessage::Success(name) => {
                debug!("passed: {}", name);
                Ok(None)
            }
            WorkerMessage::Started(name) => {
                debug!("started: {}", name);
                Ok(None)
            }
            WorkerMessage::Error(message) => {
                self.errors += 1;
                Ok(Some(StatusEvent::TestError { message }))
            }
            WorkerMessage::Stop(0) => {
                self.stops += 1;
                Ok(None)
            }
            WorkerMessage::Stop(passed) => {
                self.stops += 1;
                self.passed += passed;
                Ok(Some(StatusEvent::TestSuccess { passed }))
            }
        }
    }

    /// Drains `stream`, handing every produced event to `emit`. Stops at the
    /// first protocol violation or when `emit` fails.
    pub async fn drain<F>(&mut self, stream: &mut LineStream, mut emit: F) -> Result<(), PipelineError>
    where
        F: FnMut(StatusEvent) -> Result<(), PipelineError>,
    {
        while let Some(line) = stream.next_line().await {
            if let Some(event) = self.apply(&line)? {
                emit(event)?;
            }
        }
        Ok(())
    }

    /// Closing event once the stream is exhausted: `Success` with the total
    /// passed count, or nothing when any test failed.
    pub fn finish(&self) -> Option<StatusEvent> {
        (self.errors == 0).then_some(StatusEvent::Success {
            passed: self.passed,
        })
    }

    pub fn passed(&self) -> u64 {
        self.passed
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    /// Number of workers that reported their final line.
    pub fn stops(&self) -> usize {
        self.stops
    }
}
