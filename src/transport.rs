use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::{header, Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::config::JobConfig;
use crate::error::{error_chain, DownloadError, TransferError};
use crate::state::ByteRange;

pub type ByteStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Looks up a resource's total length without downloading its body.
#[async_trait]
pub trait SizeProbe: Send + Sync {
    async fn probe_size(&self, url: &Url) -> Result<u64, DownloadError>;
}

/// Streams the body bytes of one inclusive byte range.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    async fn fetch_range(&self, url: &Url, range: ByteRange) -> Result<ByteStream, TransferError>;
}

pub trait Transport: SizeProbe + RangeFetcher {}

impl<T: SizeProbe + RangeFetcher> Transport for T {}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &JobConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn probe_with_range(&self, url: &Url) -> Result<u64, DownloadError> {
        let response = self
            .client
            .get(url.clone())
            .header(header::RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|e| DownloadError::Probe(error_chain(&e)))?;

        let status = response.status();
        let total = match status {
            StatusCode::PARTIAL_CONTENT => response
                .headers()
                .get(header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total),
            StatusCode::OK => header_u64(response.headers(), header::CONTENT_LENGTH),
            _ => return Err(DownloadError::Probe(format!("server returned {}", status))),
        };
        total.ok_or_else(|| DownloadError::Probe("server did not report a length".to_string()))
    }
}

#[async_trait]
impl SizeProbe for HttpTransport {
    async fn probe_size(&self, url: &Url) -> Result<u64, DownloadError> {
        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(|e| DownloadError::Probe(error_chain(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Probe(format!("server returned {}", status)));
        }

        let total = match header_u64(response.headers(), header::CONTENT_LENGTH) {
            Some(len) if len > 0 => len,
            _ => {
                debug!(%url, "HEAD carried no length, probing with a one-byte range");
                self.probe_with_range(url).await?
            }
        };

        if total == 0 {
            return Err(DownloadError::Probe("resource has zero length".to_string()));
        }
        Ok(total)
    }
}

#[async_trait]
impl RangeFetcher for HttpTransport {
    async fn fetch_range(&self, url: &Url, range: ByteRange) -> Result<ByteStream, TransferError> {
        let response = self
            .client
            .get(url.clone())
            .header(header::RANGE, range.header_value())
            .send()
            .await?;

        // 200 means the range was ignored; the worker's length check rejects it
        // unless the whole resource is this one range.
        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT && status != StatusCode::OK {
            return Err(TransferError::Status(status.as_u16()));
        }

        Ok(response
            .bytes_stream()
            .map(|item| item.map_err(TransferError::from))
            .boxed())
    }
}

fn header_u64(headers: &header::HeaderMap, name: header::HeaderName) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Total length from `Content-Range: bytes 0-0/1234`. `*` yields None.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}



#[cfg(test)]
mod tests {
    use super::loopback::{serve, Behavior};
    use super::*;
    use crate::state::{PartState, PartStatus};
    use crate::worker::DownloadWorker;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 241) as u8).collect()
    }

    fn transport(url: &Url) -> HttpTransport {
        let config = JobConfig::new(url.as_str(), "file.bin", 1).unwrap();
        HttpTransport::new(&config).unwrap()
    }

    async fn fetch_part(url: &Url, dir: &std::path::Path, range: ByteRange) -> (Arc<PartState>, Result<(), TransferError>) {
        let part = Arc::new(PartState::new(0, range, dir.join("file.bin.part1")));
        let worker = DownloadWorker::new(
            Arc::new(transport(url)),
            url.clone(),
            part.clone(),
            Duration::from_secs(2),
            CancellationToken::new(),
        );
        let result = worker.run().await;
        (part, result)
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-0/1234"), Some(1234));
        assert_eq!(parse_content_range_total("bytes 0-0/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_header_u64() {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from_static("1000"));
        assert_eq!(header_u64(&headers, header::CONTENT_LENGTH), Some(1000));
        assert_eq!(header_u64(&headers, header::CONTENT_RANGE), None);
    }

    #[tokio::test]
    async fn test_head_reports_content_length() {
        let url = serve(body(1000), Behavior::Ranged).await;
        assert_eq!(transport(&url).probe_size(&url).await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn test_partial_content_streams_requested_range() {
        let dir = tempfile::tempdir().unwrap();
        let data = body(1000);
        let url = serve(data.clone(), Behavior::Ranged).await;

        let (part, result) = fetch_part(&url, dir.path(), ByteRange { start: 334, end: 666 }).await;

        result.unwrap();
        assert_eq!(part.status(), PartStatus::Succeeded);
        assert_eq!(std::fs::read(&part.temp_path).unwrap(), &data[334..=666]);
    }

    #[tokio::test]
    async fn test_full_body_reply_fails_with_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let url = serve(body(1000), Behavior::IgnoreRange).await;

        let (part, result) = fetch_part(&url, dir.path(), ByteRange { start: 500, end: 999 }).await;

        assert!(matches!(result, Err(TransferError::LengthMismatch { expected: 500, .. })));
        assert_eq!(part.status(), PartStatus::Failed);
        assert!(part.downloaded_bytes() <= 500);
    }

    #[tokio::test]
    async fn test_full_body_is_accepted_for_whole_resource_range() {
        let dir = tempfile::tempdir().unwrap();
        let data = body(300);
        let url = serve(data.clone(), Behavior::IgnoreRange).await;

        let (part, result) = fetch_part(&url, dir.path(), ByteRange { start: 0, end: 299 }).await;

        result.unwrap();
        assert_eq!(part.status(), PartStatus::Succeeded);
        assert_eq!(std::fs::read(&part.temp_path).unwrap(), data);
    }

    #[tokio::test]
    async fn test_error_status_is_surfaced() {
        let url = serve(body(100), Behavior::NotFound).await;
        let transport = transport(&url);

        let fetched = transport.fetch_range(&url, ByteRange { start: 0, end: 99 }).await;
        assert!(matches!(fetched, Err(TransferError::Status(404))));

        let probed = transport.probe_size(&url).await;
        assert!(matches!(probed, Err(DownloadError::Probe(ref msg)) if msg.contains("404")));
    }

    #[tokio::test]
    async fn test_head_without_length_falls_back_to_one_byte_range() {
        let url = serve(body(1234), Behavior::HeadWithoutLength).await;
        assert_eq!(transport(&url).probe_size(&url).await.unwrap(), 1234);
    }
}
