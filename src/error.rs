use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why a single part failed to transfer.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("no data received for {0:?}")]
    Stalled(Duration),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            TransferError::Status(status.as_u16())
        } else {
            TransferError::Network(error_chain(&err))
        }
    }
}

/// Renders an error with its sources, e.g. `error sending request: dns error: ...`.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// User-facing number of the part at zero-based `index`, matching `<output>.part<N>`.
pub fn part_number(index: u32) -> u32 {
    index + 1
}

/// A failed part, keyed by its index in the plan.
#[derive(Debug)]
pub struct PartFailure {
    pub index: u32,
    pub temp_path: PathBuf,
    pub cause: TransferError,
}

impl fmt::Display for PartFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "part {} ({}): {}",
            part_number(self.index),
            self.temp_path.display(),
            self.cause
        )
    }
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("invalid url `{url}`: {reason}")]
    UrlParse { url: String, reason: String },

    #[error("size probe failed: {0}")]
    Probe(String),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("{} part(s) failed [{}]: {}", .failures.len(), failure_numbers(.failures), describe(.failures))]
    PartsFailed { failures: Vec<PartFailure> },

    #[error("cannot merge, parts [{}] did not succeed", numbers(.indices))]
    Unmerged { indices: Vec<u32> },

    #[error("merge into {} failed: {source}", .path.display())]
    Merge {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("download cancelled{}", interrupted_suffix(.interrupted))]
    Cancelled { interrupted: Vec<u32> },
}

impl DownloadError {
    /// Indices of the failed parts, empty for job-level errors.
    pub fn failed_indices(&self) -> Vec<u32> {
        match self {
            DownloadError::PartsFailed { failures } => failures.iter().map(|f| f.index).collect(),
            DownloadError::Unmerged { indices } => indices.clone(),
            DownloadError::Cancelled { interrupted } => interrupted.clone(),
            _ => Vec::new(),
        }
    }
}

/// Comma-separated one-based part numbers.
fn numbers(indices: &[u32]) -> String {
    indices
        .iter()
        .map(|&i| part_number(i).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn failure_numbers(failures: &[PartFailure]) -> String {
    let indices: Vec<u32> = failures.iter().map(|f| f.index).collect();
    numbers(&indices)
}

fn interrupted_suffix(interrupted: &[u32]) -> String {
    if interrupted.is_empty() {
        String::new()
    } else {
        format!(", parts [{}] interrupted", numbers(interrupted))
    }
}

fn describe(failures: &[PartFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
