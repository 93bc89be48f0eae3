//! Top-level job orchestration.
//!
//! A job moves through `ModeDetect`, one of the source paths, `Scheduled`,
//! `Downloading`, `Assembling` and `Cleanup` to `Done`. Any failure moves it
//! to `Failed` and leaves the cache directory in place.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;
use vidl_extractors::{Extractor, ExtractorRegistry, TargetKind, default_registry};

use crate::assembler::{AssemblyOptions, assemble};
use crate::cache::CacheManager;
use crate::config::{DownloadMode, Job};
use crate::decryption::DecryptionService;
use crate::error::{DownloadError, ErrorKind};
use crate::fetcher::{SegmentDownloader, SegmentFetcher};
use crate::http::HttpClient;
use crate::manifest::{InitSection, ManifestLoader, SegmentDescriptor};
use crate::retry::{RetryAction, retry_with_backoff};
use crate::scheduler::{DownloadProgress, SegmentScheduler};
use crate::skip::apply_skip_ranges;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    ModeDetect,
    ManifestPath,
    DirectFilePath,
    ExtractPath,
    Scheduled,
    Downloading,
    Assembling,
    Cleanup,
    Done,
    Failed,
}

/// Where a URL has to go next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Manifest,
    DirectFile,
    Extract,
}

/// Explicit modes win; `Auto` goes by the URL path suffix.
pub fn detect_mode(url: &Url, requested: DownloadMode) -> SourceKind {
    match requested {
        DownloadMode::Manifest => SourceKind::Manifest,
        DownloadMode::DirectFile => SourceKind::DirectFile,
        DownloadMode::Extract => SourceKind::Extract,
        DownloadMode::Auto => match TargetKind::from_url_suffix(url) {
            TargetKind::Manifest => SourceKind::Manifest,
            TargetKind::DirectFile => SourceKind::DirectFile,
            TargetKind::Unknown => SourceKind::Extract,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Final report of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: String,
    pub source: String,
    /// Present only when the output file exists at the end of the job.
    pub output: Option<PathBuf>,
    pub total_bytes: u64,
    pub successful_segments: usize,
    pub failed_segments: usize,
    /// Segments dropped by skip ranges.
    pub skipped_segments: usize,
    /// The output already existed and overwriting was disabled.
    pub skipped_existing: bool,
    pub remuxed: bool,
    pub title: Option<String>,
    pub cleanup_warning: Option<String>,
    pub error: Option<JobFailure>,
}

impl JobResult {
    fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            source: job.source.to_string(),
            output: None,
            total_bytes: 0,
            successful_segments: 0,
            failed_segments: 0,
            skipped_segments: 0,
            skipped_existing: false,
            remuxed: false,
            title: None,
            cleanup_warning: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.output.is_some() && self.error.is_none()
    }
}

/// Work list produced by one of the source paths.
struct Schedule {
    segments: Vec<SegmentDescriptor>,
    container: Option<String>,
}

/// Runs one [`Job`] to completion.
pub struct JobRunner {
    job: Job,
    registry: ExtractorRegistry,
    token: CancellationToken,
    progress: DownloadProgress,
    state: Mutex<JobState>,
}

impl JobRunner {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            registry: default_registry(),
            token: CancellationToken::new(),
            progress: DownloadProgress::default(),
            state: Mutex::new(JobState::ModeDetect),
        }
    }

    pub fn with_registry(mut self, registry: ExtractorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn progress(&self) -> DownloadProgress {
        self.progress.clone()
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    fn transition(&self, next: JobState) {
        let previous = std::mem::replace(&mut *self.state.lock(), next);
        debug!(job = %self.job.id, from = ?previous, to = ?next, "Job state changed");
    }

    /// Runs the job. Failures are reported in the returned [`JobResult`].
    #[instrument(skip(self), fields(job = %self.job.id, url = %self.job.source))]
    pub async fn run(&self) -> JobResult {
        let mut result = JobResult::new(&self.job);
        match self.execute(&mut result).await {
            Ok(()) => {
                self.transition(JobState::Done);
                info!(
                    output = ?result.output,
                    bytes = result.total_bytes,
                    segments = result.successful_segments,
                    skipped_existing = result.skipped_existing,
                    "Job finished"
                );
            }
            Err(e) => {
                self.transition(JobState::Failed);
                let snapshot = self.progress.snapshot();
                result.output = None;
                result.successful_segments = snapshot.completed;
                result.failed_segments = snapshot.failed;
                result.total_bytes = snapshot.bytes;
                warn!(kind = ?e.kind(), error = %e, "Job failed");
                result.error = Some(JobFailure {
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn execute(&self, result: &mut JobResult) -> Result<(), DownloadError> {
        let job = &self.job;

        if !job.overwrite && tokio::fs::try_exists(&job.output).await? {
            info!(output = %job.output.display(), "Output exists; skipping");
            result.skipped_existing = true;
            result.output = Some(job.output.clone());
            result.total_bytes = tokio::fs::metadata(&job.output).await?.len();
            return Ok(());
        }

        let mut http = HttpClient::new(&job.http, self.token.clone())?;
        let mut kind = detect_mode(&job.source, job.mode);
        debug!(mode = job.mode.as_str(), detected = ?kind, "Mode detected");

        let mut urls = vec![job.source.clone()];
        if kind == SourceKind::Extract {
            self.transition(JobState::ExtractPath);
            let target = self.extract(&http, &job.source).await?;
            http.extend_headers(&target.headers);
            result.title = target.title;
            urls = target.urls;

            kind = match target.kind {
                TargetKind::Manifest => SourceKind::Manifest,
                TargetKind::DirectFile => SourceKind::DirectFile,
                TargetKind::Unknown => detect_mode(&urls[0], DownloadMode::Auto),
            };
            if kind == SourceKind::Extract {
                return Err(DownloadError::unsupported_source(
                    urls[0].as_str(),
                    "extraction resolved to another page",
                ));
            }
        }

        let http = Arc::new(http);
        let schedule = match kind {
            SourceKind::Manifest => {
                self.transition(JobState::ManifestPath);
                self.manifest_schedule(&http, &urls[0], result).await?
            }
            SourceKind::DirectFile => {
                self.transition(JobState::DirectFilePath);
                self.direct_schedule(urls)
            }
            SourceKind::Extract => {
                return Err(DownloadError::Internal {
                    reason: "extraction path reached scheduling".to_string(),
                });
            }
        };

        if schedule.segments.is_empty() {
            return Err(DownloadError::EmptySchedule);
        }
        self.transition(JobState::Scheduled);

        let cache = CacheManager::create(&job.cache_dir).await?;
        let init_sections = self
            .download_init_sections(&http, &cache, &schedule.segments)
            .await?;

        self.transition(JobState::Downloading);
        let scheduled = schedule.segments.len();
        let decryption = Arc::new(DecryptionService::new(http.clone(), job.retry.clone()));
        let downloader: Arc<dyn SegmentDownloader> =
            Arc::new(SegmentFetcher::new(http.clone(), decryption));
        let scheduler = SegmentScheduler::new(
            downloader,
            cache.clone(),
            job.retry.clone(),
            job.concurrency,
            self.token.clone(),
        )
        .with_progress(self.progress.clone());
        let results = scheduler.run(schedule.segments).await?;

        result.successful_segments = results.iter().filter(|r| r.is_success()).count();
        result.failed_segments = results.len() - result.successful_segments;

        if self.token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        // Nothing to assemble: report the transfer failure itself.
        if result.successful_segments == 0
            && let Some((index, reason)) = results
                .iter()
                .rev()
                .find_map(|r| r.failure().map(|reason| (r.descriptor.index, reason)))
        {
            return Err(DownloadError::fetch(
                format!("segment {index} failed: {reason}"),
                false,
            ));
        }
        self.transition(JobState::Assembling);
        let report = assemble(
            &results,
            scheduled,
            &init_sections,
            &AssemblyOptions {
                output: job.output.clone(),
                max_failed_segments: job.max_failed_segments,
                ffmpeg: job.ffmpeg.clone(),
                source_container: schedule.container,
            },
        )
        .await?;
        result.output = Some(report.output);
        result.total_bytes = report.bytes;
        result.remuxed = report.remuxed;

        self.transition(JobState::Cleanup);
        if job.delete_cache
            && let Err(e) = cache.cleanup().await
        {
            result.cleanup_warning = Some(format!(
                "could not remove cache directory {}: {e}",
                cache.dir().display()
            ));
        }
        Ok(())
    }

    async fn extract(
        &self,
        http: &HttpClient,
        url: &Url,
    ) -> Result<vidl_extractors::ResolvedTarget, DownloadError> {
        let extractor = Extractor::new(http.client().clone()).with_headers(http.headers());
        let target = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(DownloadError::Cancelled),
            target = self.registry.resolve(url, &extractor) => target?,
        };
        if target.urls.is_empty() {
            return Err(DownloadError::unsupported_source(
                url.as_str(),
                format!("extractor `{}` returned no media URL", target.extractor),
            ));
        }
        info!(
            extractor = %target.extractor,
            kind = target.kind.as_str(),
            resolved = %target.urls[0],
            "Source resolved by extractor"
        );
        Ok(target)
    }

    async fn manifest_schedule(
        &self,
        http: &HttpClient,
        url: &Url,
        result: &mut JobResult,
    ) -> Result<Schedule, DownloadError> {
        let job = &self.job;
        let manifest = ManifestLoader::new(http, &job.variant, &job.retry)
            .load(url)
            .await?;
        let container = if manifest.segments.iter().any(|s| s.init.is_some()) {
            "mp4"
        } else {
            "ts"
        };

        let (segments, skipped) = apply_skip_ranges(manifest.segments, &job.skip_ranges);
        result.skipped_segments = skipped;
        if skipped > 0 {
            info!(skipped, remaining = segments.len(), "Applied skip ranges");
        }
        Ok(Schedule {
            segments,
            container: Some(container.to_string()),
        })
    }

    fn direct_schedule(&self, urls: Vec<Url>) -> Schedule {
        if !self.job.skip_ranges.is_empty() {
            warn!("Skip ranges are ignored for direct file downloads");
        }
        let container = vidl_extractors::media::path_extension(&urls[0]);
        Schedule {
            segments: urls
                .into_iter()
                .enumerate()
                .map(|(index, url)| SegmentDescriptor::direct(index, url))
                .collect(),
            container,
        }
    }

    /// Downloads each init section used by the scheduled segments once.
    async fn download_init_sections(
        &self,
        http: &HttpClient,
        cache: &CacheManager,
        segments: &[SegmentDescriptor],
    ) -> Result<HashMap<usize, PathBuf>, DownloadError> {
        let mut sections: Vec<&InitSection> = Vec::new();
        for init in segments.iter().filter_map(|s| s.init.as_ref()) {
            if !sections.iter().any(|known| known.id == init.id) {
                sections.push(init);
            }
        }

        let mut paths = HashMap::with_capacity(sections.len());
        for section in sections {
            let data = retry_with_backoff(&self.job.retry, &self.token, |_| async move {
                RetryAction::classify(
                    http.get_bytes(&section.uri, section.byte_range, "init section")
                        .await,
                )
            })
            .await?;
            let path = cache.init_section_path(section.id);
            tokio::fs::write(&path, &data).await?;
            debug!(id = section.id, bytes = data.len(), "Init section downloaded");
            paths.insert(section.id, path);
        }
        Ok(paths)
    }
}
