use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

use crate::error::ExtractorError;
use crate::extractor::{Extractor, MediaExtractor};
use crate::media::{MEDIA_EXTENSIONS, ResolvedTarget, TargetKind, path_extension};

const MANIFEST_CONTENT_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "audio/mpegurl",
    "audio/x-mpegurl",
];

/// Bytes inspected when sniffing for a playlist header.
const SNIFF_LEN: usize = 512;

/// Classifies an extension-less URL by what the server says it is.
///
/// Runs before page scraping: many CDNs serve playlists and media behind
/// opaque paths.
pub struct ContentTypeProbe;

impl ContentTypeProbe {
    pub const NAME: &'static str = "content-type";

    fn classify(content_type: &str, url: &Url) -> Option<TargetKind> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if MANIFEST_CONTENT_TYPES.contains(&mime.as_str()) {
            return Some(TargetKind::Manifest);
        }
        if mime.starts_with("video/") || mime.starts_with("audio/") {
            return Some(TargetKind::DirectFile);
        }
        if mime == "application/octet-stream"
            && path_extension(url).is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
        {
            return Some(TargetKind::DirectFile);
        }
        None
    }
}

#[async_trait]
impl MediaExtractor for ContentTypeProbe {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        10
    }

    fn claims(&self, _url: &Url) -> bool {
        true
    }

    async fn resolve(
        &self,
        url: &Url,
        extractor: &Extractor,
    ) -> Result<Option<ResolvedTarget>, ExtractorError> {
        let mut response = extractor.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractorError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }

        // Redirects may land on the real media URL.
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if let Some(kind) = Self::classify(&content_type, &final_url) {
            debug!(content_type = %content_type, kind = kind.as_str(), "Classified by content type");
            return Ok(Some(ResolvedTarget::new(Self::NAME, kind, vec![final_url])));
        }

        // Only the first chunk is needed; dropping the response aborts the rest.
        let mut head = Vec::with_capacity(SNIFF_LEN);
        while head.len() < SNIFF_LEN {
            match response.chunk().await? {
                Some(chunk) => head.extend_from_slice(&chunk),
                None => break,
            }
        }
        let text = String::from_utf8_lossy(&head);
        if text.trim_start_matches('\u{feff}').trim_start().starts_with("#EXTM3U") {
            debug!(url = %final_url, "Sniffed playlist header");
            return Ok(Some(ResolvedTarget::new(
                Self::NAME,
                TargetKind::Manifest,
                vec![final_url],
            )));
        }

        Ok(None)
    }
}
