use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::{part_number, TransferError};
use crate::state::{PartState, PartStatus};
use crate::transport::RangeFetcher;

/// Downloads one part into its temp file.
pub struct DownloadWorker {
    fetcher: Arc<dyn RangeFetcher>,
    url: Url,
    part: Arc<PartState>,
    stall_timeout: Duration,
    cancel: CancellationToken,
}

impl DownloadWorker {
    pub fn new(
        fetcher: Arc<dyn RangeFetcher>,
        url: Url,
        part: Arc<PartState>,
        stall_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            url,
            part,
            stall_timeout,
            cancel,
        }
    }

    /// Runs the transfer and leaves the part in a terminal status.
    ///
    /// A failed part keeps whatever it already wrote to its temp file.
    pub async fn run(self) -> Result<(), TransferError> {
        let part = self.part.clone();
        if !part.begin() {
            warn!(part = part_number(part.index), "worker started twice, ignoring");
            return Ok(());
        }

        let result = self.transfer().await;
        match &result {
            Ok(()) => {
                part.finish(PartStatus::Succeeded);
                debug!(part = part_number(part.index), bytes = part.total_bytes(), "part complete");
            }
            Err(e) => {
                part.finish(PartStatus::Failed);
                warn!(part = part_number(part.index), bytes = part.downloaded_bytes(), error = %e, "part failed");
            }
        }
        result
    }

    async fn transfer(&self) -> Result<(), TransferError> {
        let part = &self.part;
        let expected = part.total_bytes();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&part.temp_path)
            .await?;

        // Bounded like a body chunk: a server that accepts and never answers is a stall.
        let mut stream = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            res = tokio::time::timeout(self.stall_timeout, self.fetcher.fetch_range(&self.url, part.range)) => {
                res.map_err(|_| TransferError::Stalled(self.stall_timeout))??
            }
        };

        let mut received: u64 = 0;
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    flush_quietly(&mut file).await;
                    return Err(TransferError::Cancelled);
                }
                next = tokio::time::timeout(self.stall_timeout, stream.next()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    flush_quietly(&mut file).await;
                    return Err(TransferError::Stalled(self.stall_timeout));
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    flush_quietly(&mut file).await;
                    return Err(e);
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            let len = chunk.len() as u64;
            if received + len > expected {
                // Server sent more than the range; most likely it ignored the Range header.
                flush_quietly(&mut file).await;
                return Err(TransferError::LengthMismatch {
                    expected,
                    actual: received + len,
                });
            }

            file.write_all(&chunk).await?;
            received += len;
            part.record_progress(received);
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if received != expected {
            return Err(TransferError::LengthMismatch {
                expected,
                actual: received,
            });
        }

        let written = fs::metadata(&part.temp_path).await?.len();
        if written != expected {
            return Err(TransferError::LengthMismatch {
                expected,
                actual: written,
            });
        }

        Ok(())
    }
}

async fn flush_quietly(file: &mut File) {
    if let Err(e) = file.flush().await {
        debug!(error = %e, "flush of partial part file failed");
    }
}
