mod error;
mod format;
mod ledger;
mod timing;

pub use error::*;
pub use format::{decode_entry, encode_entry};
pub use ledger::{LedgerEntry, Outcome, ResultsLedger};
pub use timing::TimingEstimator;
