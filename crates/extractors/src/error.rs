use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("regex error: {0}")]
    RegexError(String),
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("HTTP {status} while fetching {url}")]
    HttpStatus { status: StatusCode, url: String },
    #[error("no extractor supports {0}")]
    UnsupportedExtractor(String),
    #[error("no streams found")]
    NoStreamsFound,
    #[error("other: {0}")]
    Other(String),
}
