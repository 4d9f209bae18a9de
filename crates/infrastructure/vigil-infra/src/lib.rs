pub mod git;
pub mod ipc;
pub mod process;

// Re-exports for convenience
pub use git::{CommitInfo, GitCli, GitError};
pub use ipc::{
    ChannelFault, ChannelMultiplexer, ChannelState, LineStream, MultiplexError, MultiplexerConfig,
    SpawnMode, WorkerClient,
};
pub use process::{CommandOutput, ProcessError};
