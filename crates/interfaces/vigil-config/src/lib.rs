//! Central configuration constants for runtime limits and defaults.

use std::time::Duration;

/// Default number of test projects executed concurrently.
pub const DEFAULT_POOL_SIZE: usize = 2;

/// Minimum allowed worker pool size.
pub const MIN_POOL_SIZE: usize = 1;

/// Maximum allowed worker pool size.
pub const MAX_POOL_SIZE: usize = 16;

/// Deferred work older than this is dropped on replay.
pub const DEFAULT_RETRY_TTL_SECS: u64 = 60;

/// Backoff between polls of an empty merged queue.
pub const POLL_INTERVAL_MS: u64 = 25;

/// Upper bound on endpoints accepting at the same time in eager mode.
pub const MAX_PENDING_ENDPOINTS: usize = 16;

/// How long connected workers get to drain after every launched worker
/// process has exited.
pub const WORKER_EXIT_GRACE_MS: u64 = 2_000;

/// Process-wide base name of the worker channel socket.
pub const DEFAULT_CHANNEL_NAME: &str = "workers";

/// Subdirectory of the runtime dir holding worker sockets.
pub const RUNTIME_SUBDIR: &str = "vigil";

/// Results ledger file, kept in the repository root.
pub const LEDGER_FILENAME: &str = "vigil-results.log";

/// Presence of this file in a repository root disables runs for it.
pub const DISABLE_FLAG_FILENAME: &str = ".vigil-disabled";

/// Extension a solution manifest must carry.
pub const SOLUTION_EXTENSION: &str = "solution";

/// Build output directories never mirrored into the destination.
pub const BUILD_OUTPUT_DIRS: &[&str] = &["target", "bin", "obj"];

/// Tool cache directories never mirrored into the destination.
pub const TOOL_CACHE_DIRS: &[&str] = &[".vs", ".idea", ".vigil"];

/// Convenience function to clamp a pool size into the allowed range.
pub fn clamp_pool_size(v: usize) -> usize {
    v.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE)
}

pub fn poll_interval() -> Duration {
    Duration::from_millis(POLL_INTERVAL_MS)
}

pub fn worker_exit_grace() -> Duration {
    Duration::from_millis(WORKER_EXIT_GRACE_MS)
}

pub fn default_retry_ttl() -> Duration {
    Duration::from_secs(DEFAULT_RETRY_TTL_SECS)
}

/// True when a path component names a directory excluded from mirroring.
pub fn is_excluded_dir(name: &str) -> bool {
    BUILD_OUTPUT_DIRS.contains(&name) || TOOL_CACHE_DIRS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_is_clamped() {
        assert_eq!(clamp_pool_size(0), MIN_POOL_SIZE);
        assert_eq!(clamp_pool_size(3), 3);
        assert_eq!(clamp_pool_size(1000), MAX_POOL_SIZE);
    }

    #[test]
    fn excluded_dirs_cover_outputs_and_caches() {
        assert!(is_excluded_dir("target"));
        assert!(is_excluded_dir(".vs"));
        assert!(!is_excluded_dir("src"));
    }
}
