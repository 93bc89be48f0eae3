use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::error::ExtractorError;
use crate::extractor::{Extractor, MediaExtractor};
use crate::media::{ResolvedTarget, TargetKind};
use crate::utils::{absolutize, capture_group_1, capture_group_1_owned};

/// Upper bound on candidate URLs collected from one page.
pub const MAX_CANDIDATES: usize = 16;

static META_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<meta\b[^>]*>").unwrap());

static META_PROPERTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:property|name)\s*=\s*["']og:video(?::(?:secure_)?url)?["']"#).unwrap()
});

static META_CONTENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bcontent\s*=\s*["']([^"']+)["']"#).unwrap());

static MEDIA_ELEMENT_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<(?:video|source)\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).unwrap()
});

static EMBEDDED_MEDIA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)https?:(?:\\?/){2}[^\s"'<>]+?\.(?:m3u8|mp4|webm|m4v|mov|mkv|flv)\b(?:\?[^\s"'<>]*)?"#,
    )
    .unwrap()
});

static OG_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\b[^>]*\bproperty\s*=\s*["']og:title["'][^>]*\bcontent\s*=\s*["']([^"']+)["']"#)
        .unwrap()
});

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>([^<]+)</title>").unwrap());

/// Scrapes a generic web page for playable media.
///
/// Lowest priority: it claims every http(s) URL and only runs when nothing
/// more specific resolved it.
pub struct HtmlMediaExtractor;

impl HtmlMediaExtractor {
    pub const NAME: &'static str = "html";

    /// Candidate URLs in discovery order, deduplicated.
    pub fn scan(page_url: &Url, html: &str) -> Vec<Url> {
        let mut candidates: Vec<Url> = Vec::new();
        let mut push = |url: Url| {
            if candidates.len() < MAX_CANDIDATES && !candidates.contains(&url) {
                candidates.push(url);
            }
        };

        for tag in META_TAG.find_iter(html) {
            let tag = tag.as_str();
            if META_PROPERTY.is_match(tag)
                && let Some(content) = capture_group_1(&META_CONTENT, tag)
                && let Some(url) = absolutize(page_url, content)
            {
                push(url);
            }
        }

        for caps in MEDIA_ELEMENT_SRC.captures_iter(html) {
            if let Some(url) = caps.get(1).and_then(|m| absolutize(page_url, m.as_str())) {
                push(url);
            }
        }

        for m in EMBEDDED_MEDIA_URL.find_iter(html) {
            let raw = m.as_str().trim_end_matches('\\');
            if let Some(url) = absolutize(page_url, raw) {
                push(url);
            }
        }

        candidates
    }

    fn title(html: &str) -> Option<String> {
        capture_group_1_owned(&OG_TITLE, html)
            .or_else(|| capture_group_1_owned(&TITLE, html))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Picks the best candidate: the first manifest, else the first media file.
    ///
    /// Element sources without a recognizable suffix are kept as direct files,
    /// since `<video src>` points at playable media.
    fn choose(candidates: &[Url]) -> Option<(TargetKind, Url)> {
        if let Some(url) = candidates
            .iter()
            .find(|u| TargetKind::from_url_suffix(u) == TargetKind::Manifest)
        {
            return Some((TargetKind::Manifest, url.clone()));
        }
        candidates
            .iter()
            .find(|u| TargetKind::from_url_suffix(u) == TargetKind::DirectFile)
            .or_else(|| candidates.first())
            .map(|url| (TargetKind::DirectFile, url.clone()))
    }
}

#[async_trait]
impl MediaExtractor for HtmlMediaExtractor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        0
    }

    fn claims(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    async fn resolve(
        &self,
        url: &Url,
        extractor: &Extractor,
    ) -> Result<Option<ResolvedTarget>, ExtractorError> {
        let html = extractor.fetch_text(url).await?;
        let candidates = Self::scan(url, &html);
        debug!(url = %url, candidates = candidates.len(), "Scanned page for media");

        let Some((kind, media_url)) = Self::choose(&candidates) else {
            return Ok(None);
        };

        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(referer) = reqwest::header::HeaderValue::from_str(url.as_str()) {
            headers.insert(reqwest::header::REFERER, referer);
        }

        Ok(Some(
            ResolvedTarget::new(Self::NAME, kind, vec![media_url])
                .with_title(Self::title(&html))
                .with_headers(headers),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::response::Html;
    use axum::routing::get;
    use reqwest::Client;

    const PAGE: &str = r#"<!doctype html>
<html><head>
<title> Sample clip </title>
<meta property="og:video" content="https://cdn.example.com/og/clip.mp4">
</head><body>
<video controls><source src="/media/clip.webm" type="video/webm"></video>
<script>var cfg = {"hls":"https:\/\/cdn.example.com\/live\/master.m3u8?token=a&b=1"};</script>
</body></html>"#;

    #[test]
    fn test_scan_finds_all_candidate_kinds() {
        let page = Url::parse("https://example.com/watch/1").unwrap();
        let found: Vec<String> = HtmlMediaExtractor::scan(&page, PAGE)
            .into_iter()
            .map(|u| u.to_string())
            .collect();

        assert_eq!(
            found,
            vec![
                "https://cdn.example.com/og/clip.mp4",
                "https://example.com/media/clip.webm",
                "https://cdn.example.com/live/master.m3u8?token=a&b=1",
                // The og:video URL also appears as a plain absolute URL but is deduplicated.
            ]
        );
    }

    #[test]
    fn test_manifest_preferred_over_direct_file() {
        let page = Url::parse("https://example.com/watch/1").unwrap();
        let candidates = HtmlMediaExtractor::scan(&page, PAGE);
        let (kind, url) = HtmlMediaExtractor::choose(&candidates).unwrap();
        assert_eq!(kind, TargetKind::Manifest);
        assert_eq!(url.path(), "/live/master.m3u8");
    }

    #[test]
    fn test_candidates_are_capped() {
        let page = Url::parse("https://example.com/").unwrap();
        let html: String = (0..40)
            .map(|i| format!("<video src=\"https://cdn.example.com/{i}.mp4\"></video>"))
            .collect();
        assert_eq!(HtmlMediaExtractor::scan(&page, &html).len(), MAX_CANDIDATES);
    }

    #[test]
    fn test_title() {
        assert_eq!(HtmlMediaExtractor::title(PAGE).as_deref(), Some("Sample clip"));
        assert_eq!(HtmlMediaExtractor::title("<html></html>"), None);
    }

    #[tokio::test]
    async fn test_resolve_page_sets_referer() {
        let router = Router::new()
            .route("/watch", get(|| async { Html(PAGE) }))
            .route("/empty", get(|| async { Html("<html><body>nothing</body></html>") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let extractor = Extractor::new(Client::new());
        let page = Url::parse(&format!("http://{addr}/watch")).unwrap();
        let target = HtmlMediaExtractor
            .resolve(&page, &extractor)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(target.kind, TargetKind::Manifest);
        assert_eq!(target.title.as_deref(), Some("Sample clip"));
        assert_eq!(
            target.headers.get(reqwest::header::REFERER).unwrap(),
            page.as_str()
        );

        let empty = Url::parse(&format!("http://{addr}/empty")).unwrap();
        assert!(HtmlMediaExtractor.resolve(&empty, &extractor).await.unwrap().is_none());
    }
}
