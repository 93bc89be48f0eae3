//! Shared HTTP client for playlists, keys, segments and direct files.
//!
//! Every request goes through a connection limiter: a permit is taken before
//! the request is sent and released when the response body is dropped. Retry
//! backoff happens outside of requests, so waiting never holds a permit.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{HeaderMap, RANGE};
use reqwest::{Client, Response, StatusCode};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::config::DownloaderConfig;
use crate::error::DownloadError;
use crate::manifest::ByteRange;
use crate::proxy::build_proxy_from_config;

/// Builds the reqwest client described by `config`.
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let mut builder = Client::builder()
        .user_agent(&config.user_agent)
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(config.pool_idle_timeout)
        .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        builder = builder.timeout(config.timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        builder = builder.proxy(build_proxy_from_config(proxy_config)?);
    } else if !config.use_system_proxy {
        builder = builder.no_proxy();
    }

    Ok(builder.build()?)
}

/// An open response holding a connection permit.
pub struct LimitedResponse {
    response: Response,
    token: CancellationToken,
    _permit: OwnedSemaphorePermit,
}

impl LimitedResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &Url {
        self.response.url()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Next body chunk, or `None` at the end of the body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, DownloadError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(DownloadError::Cancelled),
            chunk = self.response.chunk() => Ok(chunk?),
        }
    }

    /// Reads the whole body.
    pub async fn bytes(self) -> Result<Bytes, DownloadError> {
        let Self {
            response, token, ..
        } = self;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(DownloadError::Cancelled),
            body = response.bytes() => Ok(body?),
        }
    }
}

/// Header-customized HTTP access bounded by a connection limit.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    headers: HeaderMap,
    limiter: Arc<Semaphore>,
    token: CancellationToken,
}

impl HttpClient {
    pub fn new(config: &DownloaderConfig, token: CancellationToken) -> Result<Self, DownloadError> {
        let client = create_client(config)?;
        Ok(Self::from_client(
            client,
            config.headers.clone(),
            config.max_connections,
            token,
        ))
    }

    pub fn from_client(
        client: Client,
        headers: HeaderMap,
        max_connections: usize,
        token: CancellationToken,
    ) -> Self {
        Self {
            client,
            headers,
            limiter: Arc::new(Semaphore::new(max_connections.max(1))),
            token,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Adds headers to every subsequent request. Existing names are replaced.
    pub fn extend_headers(&mut self, headers: &HeaderMap) {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
    }

    /// Sends a GET and returns the open response once headers arrive.
    ///
    /// Non-2xx statuses are returned as [`DownloadError::HttpStatus`], which
    /// classifies 5xx and 429 as retryable.
    pub async fn open(
        &self,
        url: &Url,
        range: Option<ByteRange>,
        operation: &'static str,
    ) -> Result<LimitedResponse, DownloadError> {
        let permit = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(DownloadError::Cancelled),
            permit = self.limiter.clone().acquire_owned() => permit.map_err(|_| DownloadError::Internal {
                reason: "connection limiter closed".to_string(),
            })?,
        };

        let mut request = self.client.get(url.clone()).headers(self.headers.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        trace!(url = %url, operation, "Sending request");
        let response = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(DownloadError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            debug!(url = %url, status = %status, operation, "Request failed");
            return Err(DownloadError::http_status(status, url.as_str(), operation));
        }

        Ok(LimitedResponse {
            response,
            token: self.token.clone(),
            _permit: permit,
        })
    }

    /// GETs the body into memory.
    ///
    /// A server that ignores the `Range` header and answers `200` with the
    /// whole resource is handled by slicing the requested window locally.
    pub async fn get_bytes(
        &self,
        url: &Url,
        range: Option<ByteRange>,
        operation: &'static str,
    ) -> Result<Bytes, DownloadError> {
        let response = self.open(url, range, operation).await?;
        let status = response.status();
        let body = response.bytes().await?;

        match range {
            Some(range) if status == StatusCode::OK => {
                let start = usize::try_from(range.offset).unwrap_or(usize::MAX);
                let end = usize::try_from(range.end()).unwrap_or(usize::MAX);
                if end > body.len() {
                    return Err(DownloadError::fetch(
                        format!(
                            "{url} ignored the byte range and returned {} bytes, fewer than {end}",
                            body.len()
                        ),
                        false,
                    ));
                }
                Ok(body.slice(start..end))
            }
            _ => Ok(body),
        }
    }

    /// GETs a small document (playlist, page), returning it with the final URL after redirects.
    pub async fn get_document(
        &self,
        url: &Url,
        operation: &'static str,
    ) -> Result<(Bytes, Url), DownloadError> {
        let response = self.open(url, None, operation).await?;
        let final_url = response.url().clone();
        Ok((response.bytes().await?, final_url))
    }
}
