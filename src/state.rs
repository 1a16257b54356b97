use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::utils::part_path;

/// Inclusive byte interval of the remote resource.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PartStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl PartStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PartStatus::Pending,
            1 => PartStatus::InProgress,
            2 => PartStatus::Succeeded,
            _ => PartStatus::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PartStatus::Succeeded | PartStatus::Failed)
    }
}

/// Progress of one part.
///
/// Only the owning worker writes `downloaded` and `status`; the monitor and,
/// after the join barrier, the orchestrator read them.
#[derive(Debug)]
pub struct PartState {
    pub index: u32,
    pub range: ByteRange,
    pub temp_path: PathBuf,
    downloaded: AtomicU64,
    status: AtomicU8,
}

impl PartState {
    pub fn new(index: u32, range: ByteRange, temp_path: PathBuf) -> Self {
        Self {
            index,
            range,
            temp_path,
            downloaded: AtomicU64::new(0),
            status: AtomicU8::new(PartStatus::Pending as u8),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.range.len()
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub fn status(&self) -> PartStatus {
        PartStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Records the cumulative byte count, clamped to `total_bytes` and never
    /// moving backwards.
    pub fn record_progress(&self, downloaded: u64) {
        let clamped = downloaded.min(self.total_bytes());
        self.downloaded.fetch_max(clamped, Ordering::AcqRel);
    }

    /// Pending -> InProgress. Returns false if the part was already started.
    pub fn begin(&self) -> bool {
        self.transition(PartStatus::Pending, PartStatus::InProgress)
    }

    /// InProgress -> Succeeded | Failed. Returns false if the part was not running.
    pub fn finish(&self, outcome: PartStatus) -> bool {
        debug_assert!(outcome.is_terminal());
        self.transition(PartStatus::InProgress, outcome)
    }

    fn transition(&self, from: PartStatus, to: PartStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn snapshot(&self) -> PartSnapshot {
        PartSnapshot {
            index: self.index,
            range: self.range,
            temp_path: self.temp_path.clone(),
            downloaded_bytes: self.downloaded_bytes(),
            total_bytes: self.total_bytes(),
            status: self.status(),
            error: None,
        }
    }
}

/// Point-in-time copy of a part, written to the failure manifest.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PartSnapshot {
    pub index: u32,
    pub range: ByteRange,
    pub temp_path: PathBuf,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub status: PartStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The parts of one job, in plan order.
#[derive(Debug, Clone)]
pub struct PartTable {
    parts: Vec<Arc<PartState>>,
}

impl PartTable {
    pub fn new(ranges: &[ByteRange], destination: &Path) -> Self {
        let parts = ranges
            .iter()
            .zip(0u32..)
            .map(|(range, index)| Arc::new(PartState::new(index, *range, part_path(destination, index))))
            .collect();
        Self { parts }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PartState>> {
        self.parts.iter()
    }

    pub fn get(&self, index: u32) -> Option<&Arc<PartState>> {
        self.parts.get(index as usize)
    }

    pub fn all_succeeded(&self) -> bool {
        self.parts.iter().all(|p| p.status() == PartStatus::Succeeded)
    }

    /// Parts that have not reached `Succeeded`, in index order.
    pub fn unfinished_indices(&self) -> Vec<u32> {
        self.parts
            .iter()
            .filter(|p| p.status() != PartStatus::Succeeded)
            .map(|p| p.index)
            .collect()
    }

    pub fn snapshot(&self) -> Vec<PartSnapshot> {
        self.parts.iter().map(|p| p.snapshot()).collect()
    }
}
