//! Text encoding of ledger lines:
//!
//! `timestamp - shortHash - STATUS - commitMessage - (fullHash) - Ns - testCount`

use std::time::Duration;

use chrono::NaiveDateTime;
use vigil_core::CommitId;

use crate::ledger::{LedgerEntry, Outcome};
use crate::LedgerError;

const SEPARATOR: &str = " - ";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const STATUS_OK: &str = "OK  ";
const STATUS_FAIL: &str = "FAIL";

/// Encodes a persisted entry. `Ignored` entries have no encoding.
pub fn encode_entry(entry: &LedgerEntry) -> Option<String> {
    let status = match entry.outcome {
        Outcome::Success => STATUS_OK,
        Outcome::Failure => STATUS_FAIL,
        Outcome::Ignored => return None,
    };
    let message = entry.message.replace(['\n', '\r'], " ");
    Some(format!(
        "{ts}{SEPARATOR}{short}{SEPARATOR}{status}{SEPARATOR}{message}{SEPARATOR}({full}){SEPARATOR}{secs}s{SEPARATOR}{count}",
        ts = entry.timestamp.format(TIMESTAMP_FORMAT),
        short = entry.commit.short(),
        full = entry.commit,
        secs = entry.duration.as_secs(),
        count = entry.test_count,
    ))
}

/// Decodes one ledger line. `line_no` is 1-based and only used for errors.
pub fn decode_entry(line_no: usize, line: &str) -> Result<LedgerEntry, LedgerError> {
    let mut head = line.splitn(4, SEPARATOR);
    let (Some(ts), Some(short), Some(status), Some(rest)) =
        (head.next(), head.next(), head.next(), head.next())
    else {
        return Err(LedgerError::format(line_no, "missing leading fields"));
    };

    // The message may itself contain the separator, so the trailing fields are
    // split from the end.
    let mut tail = rest.rsplitn(4, SEPARATOR);
    let (Some(count), Some(secs), Some(full), Some(message)) =
        (tail.next(), tail.next(), tail.next(), tail.next())
    else {
        return Err(LedgerError::format(line_no, "missing trailing fields"));
    };

    let timestamp = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
        .map_err(|e| LedgerError::format(line_no, format!("timestamp {ts:?}: {e}")))?
        .and_utc();

    let outcome = match status {
        STATUS_OK => Outcome::Success,
        STATUS_FAIL => Outcome::Failure,
        other => return Err(LedgerError::format(line_no, format!("status {other:?}"))),
    };

    let full = full
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| LedgerError::format(line_no, format!("hash {full:?} not parenthesized")))?;
    let commit = CommitId::parse(full)?;
    if commit.short() != short.to_ascii_lowercase() {
        return Err(LedgerError::format(
            line_no,
            format!("short hash {short:?} does not match {commit}"),
        ));
    }

    let secs: u64 = secs
        .strip_suffix('s')
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| LedgerError::format(line_no, format!("duration {secs:?}")))?;
    let test_count: u64 = count
        .trim()
        .parse()
        .map_err(|_| LedgerError::format(line_no, format!("test count {count:?}")))?;

    Ok(LedgerEntry {
        timestamp,
        commit,
        message: message.to_string(),
        outcome,
        duration: Duration::from_secs(secs),
        test_count,
    })
}
