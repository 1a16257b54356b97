use std::path::Path;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{self, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::error::{part_number, DownloadError};
use crate::state::PartTable;
use crate::utils::staging_path;

/// Concatenates finished parts into the destination.
///
/// Refuses to touch the destination unless every part succeeded. Parts are
/// written in plan order into a staging file that is renamed over the
/// destination once flushed, so a failed merge never leaves a half-written
/// destination behind. Part files are removed only after the rename.
pub async fn merge_parts(table: &PartTable, destination: &Path) -> Result<u64, DownloadError> {
    if !table.all_succeeded() {
        return Err(DownloadError::Unmerged {
            indices: table.unfinished_indices(),
        });
    }

    let staging = staging_path(destination);
    let written = match concatenate(table, &staging).await {
        Ok(written) => written,
        Err(source) => {
            discard_staging(&staging).await;
            return Err(DownloadError::Merge {
                path: destination.to_path_buf(),
                source,
            });
        }
    };

    if let Err(source) = fs::rename(&staging, destination).await {
        discard_staging(&staging).await;
        return Err(DownloadError::Merge {
            path: destination.to_path_buf(),
            source,
        });
    }
    info!(path = %destination.display(), bytes = written, "merged parts");

    for part in table.iter() {
        if let Err(e) = fs::remove_file(&part.temp_path).await {
            warn!(path = %part.temp_path.display(), error = %e, "could not remove part file");
        }
    }

    Ok(written)
}

async fn concatenate(table: &PartTable, staging: &Path) -> io::Result<u64> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(staging)
        .await?;
    let mut writer = BufWriter::new(file);
    let mut written = 0u64;

    for part in table.iter() {
        let mut source = File::open(&part.temp_path).await?;
        let copied = io::copy(&mut source, &mut writer).await?;
        if copied != part.total_bytes() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{} holds {} bytes, expected {}",
                    part.temp_path.display(),
                    copied,
                    part.total_bytes()
                ),
            ));
        }
        debug!(part = part_number(part.index), bytes = copied, "appended part");
        written += copied;
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(written)
}

async fn discard_staging(staging: &Path) {
    if let Err(e) = fs::remove_file(staging).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %staging.display(), error = %e, "could not remove staging file");
        }
    }
}
