//! Video download-and-assembly engine.
//!
//! Turns a source URL (HLS playlist, direct media file or web page) into one
//! local file: playlist parsing, bounded-concurrency segment downloads with
//! retry and skip ranges, and ordered assembly.
//!
//! ```no_run
//! use vidl_engine::{Job, JobConfig, JobRunner};
//!
//! # async fn demo() -> Result<(), vidl_engine::DownloadError> {
//! let job = Job::resolve(JobConfig {
//!     url: "https://example.com/vod/index.m3u8".into(),
//!     output: "video.ts".into(),
//!     ..Default::default()
//! })?;
//! let result = JobRunner::new(job).run().await;
//! println!("{:?}", result.output);
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod cache;
pub mod config;
pub mod decryption;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod job;
pub mod manifest;
pub mod proxy;
pub mod retry;
pub mod scheduler;
pub mod skip;

pub use cache::CacheManager;
pub use config::{DownloadMode, DownloaderConfig, Job, JobConfig, parse_header_line};
pub use error::{DownloadError, ErrorKind};
pub use job::{JobFailure, JobResult, JobRunner, JobState, SourceKind, detect_mode};
pub use manifest::{SegmentDescriptor, VariantSelectionPolicy};
pub use proxy::{ProxyConfig, ProxyType};
pub use retry::RetryPolicy;
pub use scheduler::{DownloadProgress, DownloadResult, ProgressSnapshot, SegmentOutcome};
pub use skip::{SkipRange, parse_skip_ranges};

pub use tokio_util::sync::CancellationToken;
pub use vidl_extractors::{self as extractors, ExtractorRegistry, MediaExtractor};
