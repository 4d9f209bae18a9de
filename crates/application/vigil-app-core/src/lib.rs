pub mod app_core;
mod async_runtime;
pub mod domain;
pub mod kernel;
pub mod persistence;
pub mod ports;
pub mod retry;

pub use app_core::*;
pub use domain::{RunId, Settings, UiAction, UiState, UiStatus};
pub use kernel::Session;
pub use persistence::FilePersistence;
pub use ports::*;
pub use retry::{RetryEntry, RetryTracker};
