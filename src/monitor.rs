use std::time::Duration;

use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::part_number;
use crate::state::PartTable;

/// Completion of `downloaded` out of `total`, clamped to `[0, 100]`.
///
/// Only reaches 100 when every byte is in; an empty part reads as 0.
pub fn completion_percent(downloaded: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    let downloaded = downloaded.min(total);
    (u128::from(downloaded) * 100 / u128::from(total)) as u64
}

/// What one bar shows, read once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartProgress {
    pub downloaded: u64,
    pub total: u64,
    pub percent: u64,
}

/// One rendered frame: every part's progress, in index order.
pub fn frame(table: &PartTable) -> Vec<PartProgress> {
    table
        .iter()
        .map(|p| {
            let downloaded = p.downloaded_bytes();
            let total = p.total_bytes();
            PartProgress {
                downloaded,
                total,
                percent: completion_percent(downloaded, total),
            }
        })
        .collect()
}

/// Periodically renders per-part progress until stopped.
pub struct ProgressMonitor {
    table: PartTable,
    interval: Duration,
    multi_progress: MultiProgress,
}

impl ProgressMonitor {
    pub fn new(table: PartTable, interval: Duration, draw: bool) -> Self {
        let multi_progress = MultiProgress::new();
        if draw {
            let hz = (1000 / interval.as_millis().max(1)).clamp(1, 20) as u8;
            multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(hz));
        } else {
            multi_progress.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self {
            table,
            interval,
            multi_progress,
        }
    }

    /// Starts the render loop on its own task.
    pub fn spawn(self) -> MonitorHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(stop_rx));
        MonitorHandle { stop_tx, task }
    }

    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let style = ProgressStyle::default_bar()
            .template("{prefix:>8} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");

        let bars: Vec<ProgressBar> = self
            .table
            .iter()
            .map(|part| {
                let pb = self.multi_progress.add(ProgressBar::new(100));
                pb.set_style(style.clone());
                pb.set_prefix(format!("part {}", part_number(part.index)));
                pb
            })
            .collect();

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    for (pb, progress) in bars.iter().zip(frame(&self.table)) {
                        render(pb, progress);
                    }
                }
            }
        }

        // Closing frame: every bar at 100% regardless of outcome.
        for (pb, part) in bars.iter().zip(self.table.iter()) {
            pb.set_position(100);
            pb.finish_with_message(format!(
                "{} / {} {:?}",
                HumanBytes(part.downloaded_bytes()),
                HumanBytes(part.total_bytes()),
                part.status()
            ));
        }
        debug!("progress monitor stopped");
    }
}

fn render(pb: &ProgressBar, progress: PartProgress) {
    pb.set_position(progress.percent);
    pb.set_message(format!(
        "{} / {}",
        HumanBytes(progress.downloaded),
        HumanBytes(progress.total)
    ));
}

pub struct MonitorHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signals the monitor and waits for its closing frame.
    pub async fn stop(self) {
        // The receiver is gone only if the task already exited.
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            debug!(error = %e, "progress monitor task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ByteRange;
    use std::path::Path;

    #[test]
    fn test_percent_bounds() {
        assert_eq!(completion_percent(0, 0), 0);
        assert_eq!(completion_percent(5, 0), 0);
        assert_eq!(completion_percent(0, 10), 0);
        assert_eq!(completion_percent(10, 10), 100);
        assert_eq!(completion_percent(20, 10), 100);
    }

    #[test]
    fn test_percent_hits_100_only_when_complete() {
        let total = 1_000_001;
        assert_eq!(completion_percent(total - 1, total), 99);
        assert_eq!(completion_percent(total, total), 100);
        assert_eq!(completion_percent(u64::MAX - 1, u64::MAX), 99);
    }

    #[test]
    fn test_percent_is_monotonic() {
        let total = 333;
        let mut last = 0;
        for downloaded in 0..=total {
            let pct = completion_percent(downloaded, total);
            assert!(pct >= last);
            assert!(pct <= 100);
            last = pct;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_frame_reads_every_part() {
        let ranges = [ByteRange { start: 0, end: 99 }, ByteRange { start: 100, end: 199 }];
        let table = PartTable::new(&ranges, Path::new("out.bin"));
        table.get(0).unwrap().record_progress(50);
        table.get(1).unwrap().record_progress(100);

        let percents: Vec<u64> = frame(&table).iter().map(|p| p.percent).collect();
        assert_eq!(percents, vec![50, 100]);
        assert_eq!(
            frame(&table)[0],
            PartProgress {
                downloaded: 50,
                total: 100,
                percent: 50
            }
        );
    }

    #[tokio::test]
    async fn test_monitor_stops_on_signal() {
        let ranges = [ByteRange { start: 0, end: 9 }];
        let table = PartTable::new(&ranges, Path::new("out.bin"));
        let handle = ProgressMonitor::new(table.clone(), Duration::from_millis(5), false).spawn();

        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .unwrap();
        assert_eq!(table.get(0).unwrap().downloaded_bytes(), 0);
    }
}
