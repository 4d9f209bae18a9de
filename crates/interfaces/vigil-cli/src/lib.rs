pub mod commands;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use vigil_app_core::{Settings, UiStatus};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mirror, build and test a solution, recording the result
    Run(RunArgs),
    /// Worker process entry, launched by `run`
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        socket: Utf8PathBuf,
        #[arg(long)]
        artifact: Utf8PathBuf,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print recorded runs and the current duration estimate
    History {
        #[arg(required_unless_present = "ledger")]
        solution: Option<Utf8PathBuf>,
        #[arg(long)]
        ledger: Option<Utf8PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    pub solution: Utf8PathBuf,
    pub destination: Utf8PathBuf,
    /// Commit to test instead of HEAD
    #[arg(long)]
    pub commit: Option<String>,
    /// Run even if the commit is already recorded
    #[arg(short, long)]
    pub force: bool,
    /// Run even if the parent commit failed
    #[arg(long)]
    pub ignore_parent_failure: bool,
    #[arg(short, long, env = "VIGIL_POOL_SIZE")]
    pub pool_size: Option<usize>,
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    /// Open worker endpoints one at a time
    #[arg(long)]
    pub lazy: bool,
    #[arg(long)]
    pub ledger: Option<Utf8PathBuf>,
}

impl RunArgs {
    /// Settings with every flag given on the command line applied on top.
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(n) = self.pool_size {
            settings.pool_size = vigil_config::clamp_pool_size(n);
        }
        if let Some(secs) = self.timeout_secs {
            settings.test_timeout_secs = Some(secs);
        }
        if self.lazy {
            settings.lazy_spawn = true;
        }
        if let Some(path) = &self.ledger {
            settings.ledger_path = Some(path.clone());
        }
        settings
    }
}

/// Ledger location: explicit setting, else next to the solution.
pub fn ledger_path(settings: &Settings, solution: &Utf8Path) -> Utf8PathBuf {
    if let Some(path) = &settings.ledger_path {
        return path.clone();
    }
    solution
        .parent()
        .unwrap_or_else(|| Utf8Path::new("."))
        .join(vigil_config::LEDGER_FILENAME)
}

pub fn exit_code(status: UiStatus) -> u8 {
    match status {
        UiStatus::Bad => 1,
        UiStatus::BadParent => 2,
        UiStatus::Default | UiStatus::Working | UiStatus::Ok => 0,
    }
}
