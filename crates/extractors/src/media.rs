use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use url::Url;

/// Extensions recognised as playlist manifests.
pub const MANIFEST_EXTENSIONS: &[&str] = &["m3u8", "m3u"];

/// Extensions recognised as directly downloadable media files.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "mov", "avi", "wmv", "flv", "webm", "m4v", "ts", "mp3", "m4a",
];

/// What a URL points at, as far as downloading is concerned.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Manifest,
    DirectFile,
    Unknown,
}

impl TargetKind {
    pub fn as_str(&self) -> &str {
        match self {
            TargetKind::Manifest => "manifest",
            TargetKind::DirectFile => "direct_file",
            TargetKind::Unknown => "unknown",
        }
    }

    /// Classifies a URL by the extension of its path. Query and fragment are ignored.
    pub fn from_url_suffix(url: &Url) -> Self {
        match path_extension(url) {
            Some(ext) if MANIFEST_EXTENSIONS.contains(&ext.as_str()) => TargetKind::Manifest,
            Some(ext) if MEDIA_EXTENSIONS.contains(&ext.as_str()) => TargetKind::DirectFile,
            _ => TargetKind::Unknown,
        }
    }
}

/// Lowercased extension of the last path segment, if any.
pub fn path_extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// The outcome of a successful extraction.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    /// One manifest URL, one direct file URL, or a short ordered list of direct URLs.
    pub urls: Vec<Url>,
    pub kind: TargetKind,
    pub title: Option<String>,
    /// Headers the download must send (e.g. a Referer the CDN checks).
    pub headers: HeaderMap,
    /// Name of the strategy that produced this target.
    pub extractor: String,
}

impl ResolvedTarget {
    pub fn new(extractor: impl Into<String>, kind: TargetKind, urls: Vec<Url>) -> Self {
        Self {
            urls,
            kind,
            title: None,
            headers: HeaderMap::new(),
            extractor: extractor.into(),
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(url: &str) -> TargetKind {
        TargetKind::from_url_suffix(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_manifest_suffix_ignores_query() {
        assert_eq!(
            kind("https://cdn.example.com/live/index.M3U8?token=abc"),
            TargetKind::Manifest
        );
    }

    #[test]
    fn test_media_suffixes() {
        assert_eq!(kind("https://example.com/a/b/clip.mp4"), TargetKind::DirectFile);
        assert_eq!(kind("https://example.com/clip.webm#t=10"), TargetKind::DirectFile);
    }

    #[test]
    fn test_pages_are_unknown() {
        assert_eq!(kind("https://example.com/watch?v=123"), TargetKind::Unknown);
        assert_eq!(kind("https://example.com/"), TargetKind::Unknown);
        assert_eq!(kind("https://example.com/.mp4"), TargetKind::Unknown);
        assert_eq!(kind("https://example.com/video.html"), TargetKind::Unknown);
    }
}
