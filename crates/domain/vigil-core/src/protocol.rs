//! Line protocol spoken by workers.
//!
//! Every message is a single line made of a fixed-width codon followed by a
//! payload. Payload line breaks are replaced by `-` so a message never spans
//! lines. The last message a worker writes is always a `STOPPED` line carrying
//! its count of passing tests.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("codons have unequal widths: {0:?}")]
    UnequalCodonWidths(Vec<String>),
    #[error("unknown codon in line {0:?}")]
    UnknownCodon(String),
    #[error("invalid stop count {0:?}")]
    InvalidStopCount(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codon {
    Success,
    Error,
    Stop,
    Started,
}

impl Codon {
    pub const ALL: [Codon; 4] = [Codon::Success, Codon::Error, Codon::Stop, Codon::Started];

    pub const fn as_str(self) -> &'static str {
        match self {
            Codon::Success => "SUCCESS",
            Codon::Error => "ERRORED",
            Codon::Stop => "STOPPED",
            Codon::Started => "STARTED",
        }
    }

    /// Width shared by every codon.
    pub const fn width() -> usize {
        Codon::Success.as_str().len()
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Codon::ALL.into_iter().find(|c| c.as_str() == prefix)
    }
}

/// Checks that every codon has the same byte length. Called by both ends of
/// the channel before any message is exchanged.
pub fn verify_codon_widths() -> Result<usize, ProtocolError> {
    check_widths(Codon::ALL.iter().map(|c| c.as_str()))
}

fn check_widths<'a>(codons: impl IntoIterator<Item = &'a str>) -> Result<usize, ProtocolError> {
    let codons: Vec<&str> = codons.into_iter().collect();
    let width = codons.first().map(|c| c.len()).unwrap_or(0);
    if codons.iter().any(|c| c.len() != width) {
        return Err(ProtocolError::UnequalCodonWidths(
            codons.iter().map(|c| c.to_string()).collect(),
        ));
    }
    Ok(width)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// Name of a test that passed.
    Success(String),
    Error(String),
    /// Number of passing tests in this worker.
    Stop(u64),
    /// Name of a test about to run.
    Started(String),
}

impl WorkerMessage {
    pub fn codon(&self) -> Codon {
        match self {
            WorkerMessage::Success(_) => Codon::Success,
            WorkerMessage::Error(_) => Codon::Error,
            WorkerMessage::Stop(_) => Codon::Stop,
            WorkerMessage::Started(_) => Codon::Started,
        }
    }

    /// Encodes the message as one line, without the trailing newline.
    pub fn encode(&self) -> String {
        let payload = match self {
            WorkerMessage::Success(s) | WorkerMessage::Error(s) | WorkerMessage::Started(s) => {
                flatten(s)
            }
            WorkerMessage::Stop(n) => n.to_string(),
        };
        format!("{}{}", self.codon().as_str(), payload)
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let width = Codon::width();
        if line.len() < width || !line.is_char_boundary(width) {
            return Err(ProtocolError::UnknownCodon(line.to_string()));
        }
        let (prefix, payload) = line.split_at(width);
        let codon =
            Codon::from_prefix(prefix).ok_or_else(|| ProtocolError::UnknownCodon(line.to_string()))?;

        Ok(match codon {
            Codon::Success => WorkerMessage::Success(payload.to_string()),
            Codon::Error => WorkerMessage::Error(payload.to_string()),
            Codon::Started => WorkerMessage::Started(payload.to_string()),
            Codon::Stop => WorkerMessage::Stop(
                payload
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::InvalidStopCount(payload.to_string()))?,
            ),
        })
    }
}

/// Default quit-signal predicate: the line is a worker's final `STOPPED`.
pub fn is_stop_line(line: &str) -> bool {
    line.starts_with(Codon::Stop.as_str())
}

fn flatten(payload: &str) -> String {
    payload.replace(['\n', '\r'], "-")
}
