mod error;
pub mod graph;
pub mod mirror;
pub mod orchestrator;
pub mod ports;
pub mod reducer;
pub mod worker;

pub use error::PipelineError;
pub use orchestrator::{
    EventSink, PipelineOptions, RunOrchestrator, RunOutcome, RunReport, RunStage,
};
pub use ports::{
    BuildEngine, BuildReport, CommandBuildEngine, LibtestDiscovery, ProcessWorkerLauncher,
    TestCase, TestDiscovery, TestVerdict, VersionControl, WorkerLauncher, WorkerSpec,
};
pub use reducer::ResultReducer;
pub use worker::{WorkerRunner, WorkerSummary};
