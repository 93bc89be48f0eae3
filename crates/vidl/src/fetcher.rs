// Segment fetcher: a single download attempt of one segment into a cache file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{instrument, trace};

use crate::decryption::DecryptionService;
use crate::error::DownloadError;
use crate::http::HttpClient;
use crate::manifest::SegmentDescriptor;

/// One attempt at downloading a segment into `dest`.
///
/// Retrying is the scheduler's job; implementations report a single attempt
/// and classify failures through [`DownloadError::is_retryable`].
#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    /// Writes the segment payload to `dest`, replacing any previous content,
    /// and returns the number of bytes written.
    async fn download_segment(
        &self,
        segment: &SegmentDescriptor,
        dest: &Path,
    ) -> Result<u64, DownloadError>;
}

pub struct SegmentFetcher {
    http: Arc<HttpClient>,
    decryption: Arc<DecryptionService>,
}

impl SegmentFetcher {
    pub fn new(http: Arc<HttpClient>, decryption: Arc<DecryptionService>) -> Self {
        Self { http, decryption }
    }

    /// Encrypted segments are buffered whole, decrypted, then written.
    async fn fetch_encrypted(
        &self,
        segment: &SegmentDescriptor,
        dest: &Path,
    ) -> Result<u64, DownloadError> {
        let Some(key) = &segment.key else {
            return Err(DownloadError::Internal {
                reason: "fetch_encrypted called without key".to_string(),
            });
        };
        let data = self
            .http
            .get_bytes(&segment.url, segment.byte_range, "segment")
            .await?;
        let plain = self
            .decryption
            .decrypt(data, key, segment.media_sequence)
            .await?;
        tokio::fs::write(dest, &plain).await?;
        Ok(plain.len() as u64)
    }

    /// Plain segments and direct files are streamed to disk chunk by chunk.
    async fn fetch_streamed(
        &self,
        segment: &SegmentDescriptor,
        dest: &Path,
    ) -> Result<u64, DownloadError> {
        if segment.byte_range.is_some() {
            // Ranged reads are small and may need local slicing.
            let data = self
                .http
                .get_bytes(&segment.url, segment.byte_range, "segment")
                .await?;
            tokio::fs::write(dest, &data).await?;
            return Ok(data.len() as u64);
        }

        let mut response = self.http.open(&segment.url, None, "segment").await?;
        let expected = response.content_length();
        let mut writer = BufWriter::new(tokio::fs::File::create(dest).await?);
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;

        if let Some(expected) = expected
            && expected != written
        {
            return Err(DownloadError::fetch(
                format!(
                    "body of {} ended after {written} of {expected} bytes",
                    segment.url
                ),
                true,
            ));
        }
        Ok(written)
    }
}

#[async_trait]
impl SegmentDownloader for SegmentFetcher {
    #[instrument(skip(self, segment, dest), fields(index = segment.index, msn = segment.media_sequence))]
    async fn download_segment(
        &self,
        segment: &SegmentDescriptor,
        dest: &Path,
    ) -> Result<u64, DownloadError> {
        let bytes = if segment.key.is_some() {
            self.fetch_encrypted(segment, dest).await?
        } else {
            self.fetch_streamed(segment, dest).await?
        };
        trace!(bytes, path = %dest.display(), "Segment written");
        Ok(bytes)
    }
}
