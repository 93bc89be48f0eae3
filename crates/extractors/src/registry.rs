use std::sync::Arc;

use crate::error::ExtractorError;
use crate::extractor::{Extractor, MediaExtractor};
use crate::media::ResolvedTarget;
use tracing::{debug, info, warn};
use url::Url;

/// Ordered set of extraction strategies.
///
/// Strategies are tried by descending priority; ties keep registration order.
#[derive(Default, Clone)]
pub struct ExtractorRegistry {
    entries: Vec<Arc<dyn MediaExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extractor: Arc<dyn MediaExtractor>) -> &mut Self {
        let priority = extractor.priority();
        let position = self
            .entries
            .iter()
            .position(|e| e.priority() < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, extractor);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name()).collect()
    }

    /// Runs the chain until a strategy resolves the URL.
    ///
    /// A strategy error is logged and treated as a decline so that a later,
    /// more generic strategy still gets its turn.
    pub async fn resolve(
        &self,
        url: &Url,
        extractor: &Extractor,
    ) -> Result<ResolvedTarget, ExtractorError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ExtractorError::InvalidUrl(url.to_string()));
        }

        let mut last_error = None;
        for entry in &self.entries {
            if !entry.claims(url) {
                continue;
            }
            debug!(extractor = entry.name(), url = %url, "Extractor claimed URL");
            match entry.resolve(url, extractor).await {
                Ok(Some(target)) if !target.urls.is_empty() => {
                    info!(
                        extractor = entry.name(),
                        kind = target.kind.as_str(),
                        urls = target.urls.len(),
                        "Resolved source URL"
                    );
                    return Ok(target);
                }
                Ok(_) => {
                    debug!(extractor = entry.name(), "Extractor declined after inspection");
                }
                Err(e) => {
                    warn!(extractor = entry.name(), error = %e, "Extractor failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(ExtractorError::HttpError(e)) => Err(ExtractorError::HttpError(e)),
            Some(ExtractorError::HttpStatus { status, url }) => {
                Err(ExtractorError::HttpStatus { status, url })
            }
            _ => Err(ExtractorError::UnsupportedExtractor(url.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TargetKind;
    use async_trait::async_trait;
    use reqwest::Client;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        priority: i32,
        host: &'static str,
        answer: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(
            name: &'static str,
            priority: i32,
            host: &'static str,
            answer: Option<&'static str>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                priority,
                host,
                answer,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MediaExtractor for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn claims(&self, url: &Url) -> bool {
            url.host_str() == Some(self.host)
        }

        async fn resolve(
            &self,
            _url: &Url,
            _extractor: &Extractor,
        ) -> Result<Option<ResolvedTarget>, ExtractorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.map(|u| {
                ResolvedTarget::new(self.name, TargetKind::Manifest, vec![Url::parse(u).unwrap()])
            }))
        }
    }

    fn extractor() -> Extractor {
        Extractor::new(Client::new())
    }

    #[tokio::test]
    async fn test_first_claiming_strategy_wins_by_priority() {
        let low = Fixed::new("low", 0, "example.com", Some("https://a/low.m3u8"));
        let high = Fixed::new("high", 10, "example.com", Some("https://a/high.m3u8"));
        let mut registry = ExtractorRegistry::new();
        registry.register(low.clone()).register(high.clone());

        assert_eq!(registry.names(), vec!["high", "low"]);
        let url = Url::parse("https://example.com/watch/1").unwrap();
        let target = registry.resolve(&url, &extractor()).await.unwrap();
        assert_eq!(target.extractor, "high");
        assert_eq!(low.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_decline_falls_through_to_next() {
        let declines = Fixed::new("declines", 5, "example.com", None);
        let fallback = Fixed::new("fallback", 0, "example.com", Some("https://a/b.mp4"));
        let mut registry = ExtractorRegistry::new();
        registry.register(declines.clone()).register(fallback);

        let url = Url::parse("https://example.com/page").unwrap();
        let target = registry.resolve(&url, &extractor()).await.unwrap();
        assert_eq!(target.extractor, "fallback");
        assert_eq!(declines.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unclaimed_url_is_unsupported() {
        let mut registry = ExtractorRegistry::new();
        registry.register(Fixed::new("only", 0, "example.com", Some("https://a/b.mp4")));

        let url = Url::parse("https://other.org/page").unwrap();
        let err = registry.resolve(&url, &extractor()).await.unwrap_err();
        assert!(matches!(err, ExtractorError::UnsupportedExtractor(_)));
    }

    #[tokio::test]
    async fn test_non_http_scheme_rejected() {
        let registry = ExtractorRegistry::new();
        let url = Url::parse("ftp://example.com/file").unwrap();
        let err = registry.resolve(&url, &extractor()).await.unwrap_err();
        assert!(matches!(err, ExtractorError::InvalidUrl(_)));
    }
}
