//! Config file loading and merging with command-line flags.
//!
//! The file holds any subset of the job options in TOML:
//!
//! ```toml
//! save_dir = "/data/videos"
//! max_connections = 4
//! max_retries = 5
//! ffmpeg = "/usr/bin/ffmpeg"
//!
//! [headers]
//! Referer = "https://example.com/"
//! ```

use std::path::{Path, PathBuf};

use tracing::debug;
use vidl_engine::{JobConfig, parse_header_line};

use crate::cli::Args;
use crate::error::{AppError, Result};

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vidl").join("config.toml"))
}

/// Reads the job defaults from `explicit`, or from the default location.
///
/// A missing file at the default location yields the built-in defaults; a
/// missing explicit file is an error.
pub fn load(explicit: Option<&Path>) -> Result<JobConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.is_file() => path,
            _ => return Ok(JobConfig::default()),
        },
    };

    let text = std::fs::read_to_string(&path).map_err(|e| AppError::Config {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    let config = parse(&text).map_err(|e| AppError::Config {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    debug!(path = %path.display(), "Loaded config file");
    Ok(config)
}

pub fn parse(text: &str) -> std::result::Result<JobConfig, toml::de::Error> {
    toml::from_str(text)
}

/// Flags win over file values.
pub fn merge(mut config: JobConfig, args: &Args) -> Result<JobConfig> {
    config.url = args.url.clone();
    config.output = args.output.clone();

    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if args.cache_dir.is_some() {
        config.cache_dir = args.cache_dir.clone();
    }
    if args.save_dir.is_some() {
        config.save_dir = args.save_dir.clone();
    }
    for line in &args.headers {
        let (name, value) = parse_header_line(line)?;
        config.headers.insert(name, value);
    }
    if args.force {
        config.overwrite = true;
    }
    if args.keep_cache {
        config.delete_cache = false;
    }
    if args.threads.is_some() {
        config.concurrency = args.threads;
    }
    if let Some(max_connections) = args.max_connections {
        config.max_connections = max_connections;
    }
    if let Some(ranges) = &args.ignore_segments {
        config.skip_ranges = ranges.clone();
    }
    if let Some(retries) = args.retries {
        config.max_retries = retries;
    }
    if let Some(max_failed) = args.max_failed_segments {
        config.max_failed_segments = max_failed;
    }
    if let Some(variant) = &args.variant {
        config.variant = variant.clone();
    }
    if args.ffmpeg.is_some() {
        config.ffmpeg = args.ffmpeg.clone();
    }
    if args.proxy.is_some() {
        config.proxy = args.proxy.clone();
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_secs = timeout;
    }
    Ok(config)
}
