//! Worker transport over Unix domain sockets.

use camino::Utf8PathBuf;

mod client;
mod multiplexer;

pub use client::WorkerClient;
pub use multiplexer::{
    ChannelFault, ChannelMultiplexer, ChannelState, LineStream, MultiplexError, MultiplexerConfig,
    SpawnMode,
};

/// Socket path for a channel name, scoped to this process.
///
/// Priority:
/// 1. `XDG_RUNTIME_DIR/vigil/<name>-<pid>.sock` if `XDG_RUNTIME_DIR` is set
/// 2. `/tmp/vigil/<name>-<pid>.sock` as fallback
pub fn socket_path(channel_name: &str) -> Utf8PathBuf {
    let base = std::env::var("XDG_RUNTIME_DIR")
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
    base.join(vigil_config::RUNTIME_SUBDIR)
        .join(format!("{channel_name}-{}.sock", std::process::id()))
}
