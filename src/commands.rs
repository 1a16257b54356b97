use anyhow::{Context, Result};
use indicatif::HumanBytes;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

use crate::cli::ProgressMode;
use crate::config::JobConfig;
use crate::downloader::{DownloadJob, JobFailure, JobPhase};
use crate::error::error_chain;
use crate::state::PartSnapshot;
use crate::transport::HttpTransport;
use crate::utils::manifest_path;

/// What a failed run leaves next to its part files.
#[derive(Serialize)]
struct FailureManifest<'a> {
    url: &'a str,
    destination: &'a Path,
    failed_in: JobPhase,
    error: String,
    parts: &'a [PartSnapshot],
}

pub async fn run_single_download(config: JobConfig, progress: ProgressMode) -> Result<()> {
    info!(
        host = config.url.host_str().unwrap_or_default(),
        path = config.url.path(),
        "parsed source url"
    );

    if let Some(parent) = config.destination.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create output directory")?;
        }
    }

    let transport = Arc::new(HttpTransport::new(&config).context("Failed to build HTTP client")?);
    let job = DownloadJob::new(config.clone(), transport).with_progress(progress.should_draw());

    let cancel = job.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling download");
            cancel.cancel();
        }
    });

    let outcome = job.run().await;
    ctrl_c.abort();

    let manifest = manifest_path(&config.destination);
    match outcome {
        Ok(summary) => {
            if manifest.exists() {
                if let Err(e) = fs::remove_file(&manifest).await {
                    warn!(path = %manifest.display(), error = %e, "could not remove stale manifest");
                }
            }
            println!(
                "File downloaded: {} ({}, {} parts in {:.1?})",
                summary.destination.display(),
                HumanBytes(summary.total_bytes),
                summary.parts.len(),
                summary.elapsed
            );
            Ok(())
        }
        Err(failure) => {
            if !failure.parts.is_empty() {
                match write_manifest(&config, &failure, &manifest).await {
                    Ok(()) => eprintln!(
                        "Part files kept for inspection, details in {}",
                        manifest.display()
                    ),
                    Err(e) => warn!(error = %e, "could not write failure manifest"),
                }
            }
            Err(failure.into())
        }
    }
}

async fn write_manifest(config: &JobConfig, failure: &JobFailure, path: &Path) -> Result<()> {
    let manifest = FailureManifest {
        url: config.url.as_str(),
        destination: &config.destination,
        failed_in: failure.failed_in,
        error: error_chain(&failure.error),
        parts: &failure.parts,
    };
    let content = serde_json::to_string_pretty(&manifest)?;
    fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DownloadError;
    use crate::state::{ByteRange, PartStatus};

    #[tokio::test]
    async fn test_manifest_lists_every_part() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let config = JobConfig::new("http://example.com/file.bin", &dest, 2).unwrap();
        let failure = JobFailure {
            failed_in: JobPhase::Fetching,
            error: DownloadError::Cancelled {
                interrupted: vec![1],
            },
            parts: vec![
                PartSnapshot {
                    index: 0,
                    range: ByteRange { start: 0, end: 4 },
                    temp_path: dir.path().join("file.bin.part1"),
                    downloaded_bytes: 5,
                    total_bytes: 5,
                    status: PartStatus::Succeeded,
                    error: None,
                },
                PartSnapshot {
                    index: 1,
                    range: ByteRange { start: 5, end: 9 },
                    temp_path: dir.path().join("file.bin.part2"),
                    downloaded_bytes: 2,
                    total_bytes: 5,
                    status: PartStatus::Failed,
                    error: Some("cancelled".to_string()),
                },
            ],
        };
        let path = manifest_path(&dest);

        write_manifest(&config, &failure, &path).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["failed_in"], "fetching");
        assert_eq!(json["error"], "download cancelled, parts [2] interrupted");
        assert_eq!(json["parts"].as_array().unwrap().len(), 2);
        assert_eq!(json["parts"][1]["status"], "failed");
        assert_eq!(json["parts"][1]["range"]["start"], 5);
        assert_eq!(json["parts"][1]["error"], "cancelled");
        assert!(json["parts"][0].get("error").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_host_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("file.bin");
        let config = JobConfig::new("http://127.0.0.1:9/file.bin", &dest, 2)
            .unwrap()
            .with_connect_timeout(std::time::Duration::from_secs(2));

        let err = run_single_download(config, ProgressMode::Never).await.unwrap_err();

        let failure = err.downcast_ref::<JobFailure>().unwrap();
        assert_eq!(failure.failed_in, JobPhase::Planning);
        assert!(matches!(failure.error, DownloadError::Probe(_)));
        assert!(!dest.exists());
        assert!(!manifest_path(&dest).exists());
    }
}
