use tracing::{debug, info};
use url::Url;

use super::model::{MediaManifest, VariantSelectionPolicy};
use super::parser::{ParsedPlaylist, parse_playlist, select_variant};
use crate::error::DownloadError;
use crate::http::HttpClient;
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};

/// Master playlists nested deeper than this are rejected.
pub const MAX_PLAYLIST_DEPTH: usize = 3;

/// Fetches a playlist and descends through master playlists to media segments.
pub struct ManifestLoader<'a> {
    http: &'a HttpClient,
    policy: &'a VariantSelectionPolicy,
    retry: &'a RetryPolicy,
}

impl<'a> ManifestLoader<'a> {
    pub fn new(
        http: &'a HttpClient,
        policy: &'a VariantSelectionPolicy,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            http,
            policy,
            retry,
        }
    }

    async fn fetch(&self, url: &Url) -> Result<(bytes::Bytes, Url), DownloadError> {
        retry_with_backoff(self.retry, self.http.token(), |_| async move {
            RetryAction::classify(self.http.get_document(url, "playlist").await)
        })
        .await
    }

    pub async fn load(&self, url: &Url) -> Result<MediaManifest, DownloadError> {
        let mut current = url.clone();
        for depth in 0..=MAX_PLAYLIST_DEPTH {
            let (body, final_url) = self.fetch(&current).await.map_err(|e| match e {
                DownloadError::Cancelled => e,
                other => DownloadError::parse(format!("could not fetch playlist {current}: {other}")),
            })?;

            match parse_playlist(&body, &final_url)? {
                ParsedPlaylist::Media(manifest) => {
                    info!(
                        url = %final_url,
                        segments = manifest.segments.len(),
                        duration_secs = manifest.total_duration(),
                        "Loaded media playlist"
                    );
                    return Ok(manifest);
                }
                ParsedPlaylist::Master(variants) => {
                    let variant = select_variant(&variants, self.policy)?;
                    debug!(
                        depth,
                        variants = variants.len(),
                        bandwidth = variant.bandwidth,
                        url = %variant.uri,
                        "Selected variant"
                    );
                    current = variant.uri.clone();
                }
            }
        }

        Err(DownloadError::parse(format!(
            "master playlists nested deeper than {MAX_PLAYLIST_DEPTH} levels"
        )))
    }
}
