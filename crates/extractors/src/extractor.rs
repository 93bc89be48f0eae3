use crate::error::ExtractorError;
use crate::media::ResolvedTarget;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use std::str::FromStr;
use tracing::debug;
use url::Url;

/// HTTP state shared by every strategy during one extraction.
///
/// The client and headers come from the job, so pages are fetched with the
/// same user agent, referer and proxy settings as the media itself.
#[derive(Debug, Clone)]
pub struct Extractor {
    pub client: Client,
    headers: HeaderMap,
}

impl Extractor {
    /// The user agent is left to `client`.
    pub fn new(client: Client) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        Self { client, headers }
    }

    /// Job headers override the defaults.
    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn add_header<K: AsRef<str>, V: AsRef<str>>(&mut self, key: K, value: V) {
        match HeaderName::from_str(key.as_ref()) {
            Ok(name) => match HeaderValue::from_str(value.as_ref()) {
                Ok(value) => {
                    self.headers.insert(name, value);
                }
                Err(e) => {
                    debug!(error = %e, "Invalid header value; skipping");
                }
            },
            Err(e) => {
                debug!(error = %e, "Invalid header name; skipping");
            }
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn get(&self, url: &Url) -> RequestBuilder {
        self.client.get(url.clone()).headers(self.headers.clone())
    }

    /// GET the page and return its body, failing on non-2xx responses.
    pub async fn fetch_text(&self, url: &Url) -> Result<String, ExtractorError> {
        let response = self.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractorError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

/// A source-specific extraction strategy.
///
/// `claims` is a cheap predicate on the URL shape; `resolve` does the network
/// work and may still decline by returning `Ok(None)`.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher priorities are tried first.
    fn priority(&self) -> i32 {
        0
    }

    fn claims(&self, url: &Url) -> bool;

    async fn resolve(
        &self,
        url: &Url,
        extractor: &Extractor,
    ) -> Result<Option<ResolvedTarget>, ExtractorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::HeaderMap as AxumHeaders;
    use axum::routing::get;

    async fn echo_user_agent() -> Url {
        let router = Router::new().route(
            "/",
            get(|headers: AxumHeaders| async move {
                headers
                    .get("user-agent")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none")
                    .to_string()
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[tokio::test]
    async fn test_client_user_agent_is_kept() {
        let url = echo_user_agent().await;
        let client = Client::builder().user_agent("vidl-test/1.0").build().unwrap();

        let extractor = Extractor::new(client);
        assert!(!extractor.headers().contains_key(reqwest::header::USER_AGENT));
        assert_eq!(extractor.fetch_text(&url).await.unwrap(), "vidl-test/1.0");
    }

    #[tokio::test]
    async fn test_job_headers_override_defaults() {
        let url = echo_user_agent().await;
        let mut job_headers = HeaderMap::new();
        job_headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static("custom-agent"),
        );
        job_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        let extractor = Extractor::new(Client::new()).with_headers(&job_headers);
        assert_eq!(extractor.headers().get(reqwest::header::ACCEPT).unwrap(), "*/*");
        assert_eq!(extractor.fetch_text(&url).await.unwrap(), "custom-agent");
    }
}
