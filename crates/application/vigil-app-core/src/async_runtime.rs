use std::sync::OnceLock;

use anyhow::Result;
use tokio::runtime::{Builder, Runtime};

static PIPELINE_RUNTIME: OnceLock<std::result::Result<Runtime, String>> = OnceLock::new();

/// Process-wide runtime that drives pipeline runs off the session thread.
pub(crate) fn runtime() -> Result<&'static Runtime> {
    PIPELINE_RUNTIME
        .get_or_init(|| {
            Builder::new_multi_thread()
                .thread_name("vigil-pipeline")
                .enable_all()
                .build()
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|message| anyhow::anyhow!("pipeline runtime unavailable: {message}"))
}
