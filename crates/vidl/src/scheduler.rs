// Segment scheduler: a fixed pool of workers draining a shared queue of segments.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::error::DownloadError;
use crate::fetcher::SegmentDownloader;
use crate::manifest::SegmentDescriptor;
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};

/// Default number of concurrent workers: twice the available cores, at most 8.
pub fn default_concurrency() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores * 2).clamp(1, 8)
}

#[derive(Debug, Default)]
struct ProgressCounters {
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    bytes: AtomicU64,
}

/// Cloneable, lock-free view of download progress.
///
/// Counters only ever increase during a job.
#[derive(Debug, Clone, Default)]
pub struct DownloadProgress {
    inner: Arc<ProgressCounters>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub bytes: u64,
}

impl ProgressSnapshot {
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }
}

impl DownloadProgress {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.inner.total.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            bytes: self.inner.bytes.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn add_total(&self, n: usize) {
        self.inner.total.fetch_add(n, Ordering::Relaxed);
    }

    fn record_success(&self, bytes: u64) {
        self.inner.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.inner.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.inner.failed.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    Success,
    Failed(String),
}

/// What happened to one scheduled segment.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub descriptor: SegmentDescriptor,
    pub path: PathBuf,
    pub bytes: u64,
    pub attempts: u32,
    pub outcome: SegmentOutcome,
}

impl DownloadResult {
    pub fn is_success(&self) -> bool {
        self.outcome == SegmentOutcome::Success
    }

    /// Last error seen for a failed segment.
    pub fn failure(&self) -> Option<&str> {
        match &self.outcome {
            SegmentOutcome::Success => None,
            SegmentOutcome::Failed(reason) => Some(reason),
        }
    }
}

/// Removes duplicate sequence indices. The later descriptor in input order
/// wins and takes the position of the first occurrence.
pub fn dedupe_segments(segments: Vec<SegmentDescriptor>) -> Vec<SegmentDescriptor> {
    let mut slots: HashMap<usize, usize> = HashMap::with_capacity(segments.len());
    let mut unique: Vec<SegmentDescriptor> = Vec::with_capacity(segments.len());
    for segment in segments {
        match slots.get(&segment.index) {
            Some(&slot) => {
                warn!(
                    index = segment.index,
                    replaced = %unique[slot].url,
                    with = %segment.url,
                    "Duplicate sequence index; keeping the later segment"
                );
                unique[slot] = segment;
            }
            None => {
                slots.insert(segment.index, unique.len());
                unique.push(segment);
            }
        }
    }
    unique
}

/// Bounded worker pool that downloads segments into the cache directory.
pub struct SegmentScheduler {
    downloader: Arc<dyn SegmentDownloader>,
    cache: CacheManager,
    retry: RetryPolicy,
    concurrency: usize,
    progress: DownloadProgress,
    token: CancellationToken,
}

impl SegmentScheduler {
    pub fn new(
        downloader: Arc<dyn SegmentDownloader>,
        cache: CacheManager,
        retry: RetryPolicy,
        concurrency: usize,
        token: CancellationToken,
    ) -> Self {
        Self {
            downloader,
            cache,
            retry,
            concurrency: concurrency.max(1),
            progress: DownloadProgress::default(),
            token,
        }
    }

    pub fn with_progress(mut self, progress: DownloadProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> DownloadProgress {
        self.progress.clone()
    }

    /// Downloads every segment and returns results ordered by sequence index.
    ///
    /// Individual segment failures are recorded, not returned; only
    /// cancellation aborts the run.
    pub async fn run(
        &self,
        segments: Vec<SegmentDescriptor>,
    ) -> Result<Vec<DownloadResult>, DownloadError> {
        let segments = dedupe_segments(segments);
        let total = segments.len();
        self.progress.add_total(total);

        let queue = Arc::new(Mutex::new(VecDeque::from(segments)));
        let results = Arc::new(Mutex::new(Vec::with_capacity(total)));
        let workers = self.concurrency.min(total.max(1));
        info!(segments = total, workers, "Starting segment downloads");

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let worker = Worker {
                id: worker_id,
                queue: queue.clone(),
                results: results.clone(),
                downloader: self.downloader.clone(),
                cache: self.cache.clone(),
                retry: self.retry.clone(),
                progress: self.progress.clone(),
                token: self.token.clone(),
            };
            pool.spawn(worker.run());
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                return Err(DownloadError::Internal {
                    reason: format!("segment worker panicked: {e}"),
                });
            }
        }

        if self.token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let mut results = std::mem::take(&mut *results.lock());
        results.sort_by_key(|r| r.descriptor.index);
        let snapshot = self.progress.snapshot();
        info!(
            completed = snapshot.completed,
            failed = snapshot.failed,
            bytes = snapshot.bytes,
            "Segment downloads finished"
        );
        Ok(results)
    }
}

struct Worker {
    id: usize,
    queue: Arc<Mutex<VecDeque<SegmentDescriptor>>>,
    results: Arc<Mutex<Vec<DownloadResult>>>,
    downloader: Arc<dyn SegmentDownloader>,
    cache: CacheManager,
    retry: RetryPolicy,
    progress: DownloadProgress,
    token: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            if self.token.is_cancelled() {
                break;
            }
            // The guard is dropped before any await.
            let Some(segment) = self.queue.lock().pop_front() else {
                break;
            };
            match self.download(segment).await {
                Some(result) => self.results.lock().push(result),
                None => break,
            }
        }
        debug!(worker = self.id, "Worker finished");
    }

    /// Returns `None` when the download was cancelled.
    async fn download(&self, segment: SegmentDescriptor) -> Option<DownloadResult> {
        let path = self.cache.segment_path(segment.index);
        let attempts = AtomicU32::new(0);

        let downloader = self.downloader.as_ref();
        let (segment_ref, path_ref, attempts_ref) = (&segment, &path, &attempts);
        let outcome = retry_with_backoff(&self.retry, &self.token, |attempt| {
            attempts_ref.store(attempt + 1, Ordering::Relaxed);
            async move {
                RetryAction::classify(downloader.download_segment(segment_ref, path_ref).await)
            }
        })
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        let (bytes, outcome) = match outcome {
            Ok(bytes) => {
                self.progress.record_success(bytes);
                (bytes, SegmentOutcome::Success)
            }
            Err(DownloadError::Cancelled) => return None,
            Err(e) => {
                warn!(
                    index = segment.index,
                    url = %segment.url,
                    attempts,
                    error = %e,
                    "Segment failed"
                );
                self.progress.record_failure();
                (0, SegmentOutcome::Failed(e.to_string()))
            }
        };

        Some(DownloadResult {
            descriptor: segment,
            path,
            bytes,
            attempts,
            outcome,
        })
    }
}
