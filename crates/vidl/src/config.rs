use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use url::Url;

use crate::cache::{cache_key, default_cache_root, job_cache_dir};
use crate::error::DownloadError;
use crate::manifest::VariantSelectionPolicy;
use crate::proxy::ProxyConfig;
use crate::retry::RetryPolicy;
use crate::scheduler::default_concurrency;
use crate::skip::{SkipRange, parse_skip_ranges};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

pub const DEFAULT_MAX_CONNECTIONS: usize = 8;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Configurable options for the HTTP layer
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for one request; zero disables it.
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every request
    pub headers: HeaderMap,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    pub danger_accept_invalid_certs: bool,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,

    /// Duration to keep idle connections alive before closing
    pub pool_idle_timeout: Duration,

    /// Simultaneous open requests across all workers
    pub max_connections: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(0),
            connect_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            proxy: None,
            use_system_proxy: true,
            danger_accept_invalid_certs: false,
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(30),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl DownloaderConfig {
    /// Custom headers take precedence over defaults with the same name.
    pub fn with_headers(mut self, custom: &HeaderMap) -> Self {
        for (name, value) in custom {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        default_headers
    }
}

/// How the source URL is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum DownloadMode {
    /// Decide from the URL suffix.
    #[default]
    Auto,
    /// Streaming playlist (`.m3u8`).
    Manifest,
    /// A single media file.
    DirectFile,
    /// A page that must be resolved by an extractor first.
    Extract,
}

impl DownloadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadMode::Auto => "auto",
            DownloadMode::Manifest => "manifest",
            DownloadMode::DirectFile => "direct-file",
            DownloadMode::Extract => "extract",
        }
    }
}

/// Job options as supplied by the caller (CLI flags or a TOML file).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    pub url: String,
    pub output: PathBuf,
    pub mode: DownloadMode,
    /// Root under which the job creates its own cache subdirectory.
    pub cache_dir: Option<PathBuf>,
    pub save_dir: Option<PathBuf>,
    pub headers: BTreeMap<String, String>,
    /// Replace an existing output file instead of skipping the job.
    pub overwrite: bool,
    pub delete_cache: bool,
    /// Concurrent segment workers; defaults to twice the cores, at most 8.
    pub concurrency: Option<usize>,
    pub max_connections: usize,
    /// Comma-separated `start-end` second pairs.
    pub skip_ranges: String,
    pub max_retries: u32,
    pub max_failed_segments: usize,
    pub variant: VariantSelectionPolicy,
    pub ffmpeg: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub danger_accept_invalid_certs: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            output: PathBuf::new(),
            mode: DownloadMode::Auto,
            cache_dir: None,
            save_dir: None,
            headers: BTreeMap::new(),
            overwrite: false,
            delete_cache: true,
            concurrency: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            skip_ranges: String::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            max_failed_segments: 0,
            variant: VariantSelectionPolicy::default(),
            ffmpeg: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            proxy: None,
            user_agent: None,
            danger_accept_invalid_certs: false,
        }
    }
}

/// Parses a `Name: Value` header line.
pub fn parse_header_line(line: &str) -> Result<(String, String), DownloadError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| DownloadError::configuration(format!("header `{line}` is not `Name: Value`")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(DownloadError::configuration(format!(
            "header `{line}` has an empty name"
        )));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, DownloadError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_str(name.trim()).map_err(|e| {
            DownloadError::configuration(format!("invalid header name `{name}`: {e}"))
        })?;
        let header_value = HeaderValue::from_str(value.trim()).map_err(|e| {
            DownloadError::configuration(format!("invalid value for header `{name}`: {e}"))
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// A validated, immutable job.
#[derive(Debug, Clone)]
pub struct Job {
    /// Short id derived from the source URL; also names the cache directory.
    pub id: String,
    pub source: Url,
    pub mode: DownloadMode,
    pub output: PathBuf,
    pub cache_dir: PathBuf,
    pub overwrite: bool,
    pub delete_cache: bool,
    pub concurrency: usize,
    pub skip_ranges: Vec<SkipRange>,
    pub retry: RetryPolicy,
    pub max_failed_segments: usize,
    pub variant: VariantSelectionPolicy,
    pub ffmpeg: Option<PathBuf>,
    /// HTTP settings, including the job's headers and connection limit.
    pub http: DownloaderConfig,
}

impl Job {
    /// Validates `config` and fills in defaults.
    pub fn resolve(config: JobConfig) -> Result<Self, DownloadError> {
        let raw_url = config.url.trim();
        if raw_url.is_empty() {
            return Err(DownloadError::configuration("source URL is required"));
        }
        let source =
            Url::parse(raw_url).map_err(|e| DownloadError::invalid_url(raw_url, e.to_string()))?;
        if !matches!(source.scheme(), "http" | "https") {
            return Err(DownloadError::invalid_url(raw_url, "only http(s) URLs are supported"));
        }

        if config.output.as_os_str().is_empty() {
            return Err(DownloadError::configuration("output path is required"));
        }
        let output = match &config.save_dir {
            Some(dir) if config.output.is_relative() => dir.join(&config.output),
            _ => config.output.clone(),
        };

        let concurrency = match config.concurrency {
            Some(0) => return Err(DownloadError::configuration("concurrency must be at least 1")),
            Some(n) => n,
            None => default_concurrency(),
        };
        if config.max_connections == 0 {
            return Err(DownloadError::configuration(
                "max connections must be at least 1",
            ));
        }

        let skip_ranges = parse_skip_ranges(&config.skip_ranges)?;
        let headers = header_map(&config.headers)?;

        let mut http = DownloaderConfig::default().with_headers(&headers);
        http.max_connections = config.max_connections;
        http.read_timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        http.connect_timeout = http.read_timeout;
        http.danger_accept_invalid_certs = config.danger_accept_invalid_certs;
        if let Some(user_agent) = config.user_agent.filter(|ua| !ua.trim().is_empty()) {
            http.user_agent = user_agent;
        }
        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            http.proxy = Some(ProxyConfig::parse(proxy.trim())?);
        }

        let cache_root = config.cache_dir.unwrap_or_else(default_cache_root);
        let cache_dir = job_cache_dir(&cache_root, source.as_str());

        Ok(Self {
            id: cache_key(source.as_str()),
            source,
            mode: config.mode,
            output,
            cache_dir,
            overwrite: config.overwrite,
            delete_cache: config.delete_cache,
            concurrency,
            skip_ranges,
            retry: RetryPolicy::default().with_max_retries(config.max_retries),
            max_failed_segments: config.max_failed_segments,
            variant: config.variant,
            ffmpeg: config.ffmpeg,
            http,
        })
    }
}
