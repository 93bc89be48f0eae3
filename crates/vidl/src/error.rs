use reqwest::StatusCode;
use serde::Serialize;
use vidl_extractors::ExtractorError;

/// Coarse failure category reported in a [`crate::JobResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    UnsupportedSource,
    EmptySchedule,
    Fetch,
    Assembly,
    Cancelled,
    Io,
    Configuration,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("proxy configuration error: {reason}")]
    ProxyConfiguration { reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("manifest error: {reason}")]
    Parse { reason: String },

    #[error("unsupported source `{url}`: {reason}")]
    UnsupportedSource { url: String, reason: String },

    #[error("nothing left to download after applying skip ranges")]
    EmptySchedule,

    #[error("fetch error: {reason}")]
    Fetch { reason: String, retryable: bool },

    #[error("decryption error: {reason}")]
    Decryption { reason: String },

    #[error("assembly error: {reason}")]
    Assembly { reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn proxy_configuration(reason: impl Into<String>) -> Self {
        Self::ProxyConfiguration {
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    pub fn unsupported_source(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedSource {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn fetch(reason: impl Into<String>, retryable: bool) -> Self {
        Self::Fetch {
            reason: reason.into(),
            retryable,
        }
    }

    pub fn decryption(reason: impl Into<String>) -> Self {
        Self::Decryption {
            reason: reason.into(),
        }
    }

    pub fn assembly(reason: impl Into<String>) -> Self {
        Self::Assembly {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::UnsupportedSource { .. } => ErrorKind::UnsupportedSource,
            Self::EmptySchedule => ErrorKind::EmptySchedule,
            Self::Assembly { .. } => ErrorKind::Assembly,
            Self::Io { .. } => ErrorKind::Io,
            Self::InvalidUrl { .. }
            | Self::ProxyConfiguration { .. }
            | Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Network { .. }
            | Self::HttpStatus { .. }
            | Self::Fetch { .. }
            | Self::Decryption { .. }
            | Self::Internal { .. } => ErrorKind::Fetch,
        }
    }

    /// Whether another attempt at the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled => false,
            Self::InvalidUrl { .. }
            | Self::ProxyConfiguration { .. }
            | Self::Parse { .. }
            | Self::UnsupportedSource { .. }
            | Self::EmptySchedule
            | Self::Assembly { .. }
            | Self::Configuration { .. }
            | Self::Decryption { .. }
            | Self::Internal { .. } => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Fetch { retryable, .. } => *retryable,
            Self::Network { source } => is_retryable_reqwest_error(source),
            Self::Io { .. } => true,
        }
    }
}

/// Connect, timeout, request, body read and decode errors are transient.
/// Redirect and builder errors are not.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}

impl From<ExtractorError> for DownloadError {
    fn from(err: ExtractorError) -> Self {
        match err {
            ExtractorError::UnsupportedExtractor(url) => {
                Self::unsupported_source(url, "no extraction strategy claimed the URL")
            }
            ExtractorError::InvalidUrl(url) => Self::invalid_url(url, "not an http(s) URL"),
            ExtractorError::HttpError(source) => Self::Network { source },
            ExtractorError::HttpStatus { status, url } => {
                Self::http_status(status, url, "extraction")
            }
            other => Self::unsupported_source("", other.to_string()),
        }
    }
}
