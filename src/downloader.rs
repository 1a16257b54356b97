use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::JobConfig;
use crate::error::{part_number, DownloadError, PartFailure, TransferError};
use crate::merger::merge_parts;
use crate::monitor::ProgressMonitor;
use crate::planner::plan_ranges;
use crate::state::{PartSnapshot, PartTable};
use crate::transport::{RangeFetcher, SizeProbe, Transport};
use crate::worker::DownloadWorker;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Created,
    Planning,
    Fetching,
    Merging,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn can_enter(self, next: JobPhase) -> bool {
        use JobPhase::*;
        matches!(
            (self, next),
            (Created, Planning)
                | (Planning, Fetching)
                | (Fetching, Merging)
                | (Merging, Completed)
                | (Planning | Fetching | Merging, Failed)
        )
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPhase::Created => "created",
            JobPhase::Planning => "planning",
            JobPhase::Fetching => "fetching",
            JobPhase::Merging => "merging",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct JobSummary {
    pub destination: PathBuf,
    pub total_bytes: u64,
    pub parts: Vec<PartSnapshot>,
    pub elapsed: Duration,
}

/// A job that ended in `Failed`.
///
/// `parts` is empty when the job failed before any worker started; otherwise
/// it describes every part and the temp files left on disk.
#[derive(Error, Debug)]
#[error("{failed_in} failed")]
pub struct JobFailure {
    pub failed_in: JobPhase,
    #[source]
    pub error: DownloadError,
    pub parts: Vec<PartSnapshot>,
}

/// Drives one segmented download from size probe to merged file.
pub struct DownloadJob {
    config: JobConfig,
    probe: Arc<dyn SizeProbe>,
    fetcher: Arc<dyn RangeFetcher>,
    cancel: CancellationToken,
    draw_progress: bool,
    phase: JobPhase,
}

impl DownloadJob {
    pub fn new<T: Transport + 'static>(config: JobConfig, transport: Arc<T>) -> Self {
        Self {
            config,
            probe: transport.clone(),
            fetcher: transport,
            cancel: CancellationToken::new(),
            draw_progress: false,
            phase: JobPhase::Created,
        }
    }

    pub fn with_progress(mut self, draw: bool) -> Self {
        self.draw_progress = draw;
        self
    }

    /// Token that cancels every worker of this job.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn enter(&mut self, next: JobPhase) {
        debug_assert!(self.phase.can_enter(next), "{} -> {}", self.phase, next);
        debug!(from = %self.phase, to = %next, "job phase");
        self.phase = next;
    }

    fn fail(&mut self, error: DownloadError, parts: Vec<PartSnapshot>) -> JobFailure {
        let failed_in = self.phase;
        self.enter(JobPhase::Failed);
        JobFailure {
            failed_in,
            error,
            parts,
        }
    }

    /// Runs the job to a terminal phase. Consumes the job; it cannot be rerun.
    pub async fn run(mut self) -> Result<JobSummary, JobFailure> {
        let started = Instant::now();
        let url = self.config.url.clone();
        let destination = self.config.destination.clone();

        self.enter(JobPhase::Planning);
        let stall_timeout = self.config.stall_timeout;
        let probed = tokio::select! {
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled { interrupted: Vec::new() }),
            res = tokio::time::timeout(stall_timeout, self.probe.probe_size(&url)) => match res {
                Ok(res) => res,
                Err(_) => Err(DownloadError::Probe(format!("no response within {:?}", stall_timeout))),
            },
        };
        let total_bytes = match probed {
            Ok(total) => total,
            Err(e) => return Err(self.fail(e, Vec::new())),
        };
        let ranges = match plan_ranges(total_bytes, self.config.part_count) {
            Ok(ranges) => ranges,
            Err(e) => return Err(self.fail(e, Vec::new())),
        };
        if ranges.len() < self.config.part_count as usize {
            info!(
                requested = self.config.part_count,
                parts = ranges.len(),
                "resource smaller than part count, using fewer parts"
            );
        }
        info!(%url, bytes = total_bytes, parts = ranges.len(), "starting download");

        let table = PartTable::new(&ranges, &destination);
        self.enter(JobPhase::Fetching);

        let monitor = ProgressMonitor::new(
            table.clone(),
            self.config.refresh_interval,
            self.draw_progress,
        )
        .spawn();

        let mut handles = Vec::with_capacity(table.len());
        for part in table.iter() {
            let worker = DownloadWorker::new(
                self.fetcher.clone(),
                url.clone(),
                part.clone(),
                self.config.stall_timeout,
                self.cancel.clone(),
            );
            handles.push((part.index, tokio::spawn(worker.run())));
        }

        // Join barrier: every worker finishes, even after a sibling has failed.
        let mut failures = Vec::new();
        for (index, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(TransferError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    format!("worker task ended abnormally: {}", e),
                ))),
            };
            if let Err(cause) = result {
                let temp_path = table
                    .get(index)
                    .map(|p| p.temp_path.clone())
                    .unwrap_or_default();
                failures.push(PartFailure {
                    index,
                    temp_path,
                    cause,
                });
            }
        }
        monitor.stop().await;

        if !failures.is_empty() {
            let parts = snapshot_with_errors(&table, &failures);
            let error = if self.cancel.is_cancelled() {
                DownloadError::Cancelled {
                    interrupted: failures.iter().map(|f| f.index).collect(),
                }
            } else {
                DownloadError::PartsFailed { failures }
            };
            warn!(
                parts = ?error.failed_indices().into_iter().map(part_number).collect::<Vec<_>>(),
                cancelled = self.cancel.is_cancelled(),
                "download failed, part files kept for inspection"
            );
            return Err(self.fail(error, parts));
        }

        self.enter(JobPhase::Merging);
        let parts = table.snapshot();
        if let Err(e) = merge_parts(&table, &destination).await {
            return Err(self.fail(e, parts));
        }

        self.enter(JobPhase::Completed);
        Ok(JobSummary {
            destination,
            total_bytes,
            parts,
            elapsed: started.elapsed(),
        })
    }
}

fn snapshot_with_errors(table: &PartTable, failures: &[PartFailure]) -> Vec<PartSnapshot> {
    let causes: HashMap<u32, String> = failures
        .iter()
        .map(|f| (f.index, f.cause.to_string()))
        .collect();
    table
        .snapshot()
        .into_iter()
        .map(|mut snapshot| {
            snapshot.error = causes.get(&snapshot.index).cloned();
            snapshot
        })
        .collect()
}
