//! The download-then-convert pipeline.
//!
//! A job fetches everything its URL resolves to and, unless it is
//! audio-only, converts each fetched file to `.mp4`. Cancellation is
//! cooperative and observed at three points:
//!
//! * A: every fetch progress callback; the fetch aborts mid-transfer;
//! * B: before each conversion starts; remaining items are left as fetched;
//! * C: while the transcoder runs; the process is killed and reaped.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cleanup;
use crate::config::{Config, Features};
use crate::error::{ConvertError, FetchError, SubmitError, ValidationError};
use crate::fetch::{FetchEvent, FetchPlan, FetchedMedia, Fetcher};
use crate::models::{
    DownloadRequest, ItemOutcome, ItemResult, JobProgress, JobReport, MediaItem, TerminalStatus,
};
use crate::observer::JobObserver;
use crate::transcode::{FfmpegTranscoder, Transcoder};
use crate::ytdlp::YtDlpFetcher;

pub struct Orchestrator {
    fetcher: Arc<dyn Fetcher>,
    transcoder: Arc<dyn Transcoder>,
    features: RwLock<Features>,
    active: Mutex<Option<ActiveJob>>,
    next_id: AtomicU64,
}

struct ActiveJob {
    id: u64,
    cancel: CancellationToken,
}

/// Frees the orchestrator's single job slot when the job's task ends, even by panic.
struct ActiveSlot {
    orchestrator: Arc<Orchestrator>,
    id: u64,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let mut active = self.orchestrator.active.lock();
        if active.as_ref().is_some_and(|job| job.id == self.id) {
            *active = None;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRequest {
    Requested(u64),
    NoActiveJob,
    Disabled,
}

/// A running job. Dropping the handle leaves the job running.
pub struct JobHandle {
    id: u64,
    cancel: Option<CancellationToken>,
    task: JoinHandle<JobReport>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `None` when cancellation is switched off in the configuration.
    pub fn cancel_token(&self) -> Option<CancellationToken> {
        self.cancel.clone()
    }

    pub fn cancel(&self) -> bool {
        match &self.cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn join(self) -> JobReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Download task {} ended unexpectedly: {}", self.id, e);
                JobReport::failed(format!("download task ended unexpectedly: {e}"))
            }
        }
    }
}

impl Orchestrator {
    pub fn new(fetcher: Arc<dyn Fetcher>, transcoder: Arc<dyn Transcoder>, features: Features) -> Self {
        Orchestrator {
            fetcher,
            transcoder,
            features: RwLock::new(features),
            active: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    /// yt-dlp and ffmpeg as configured.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(YtDlpFetcher::new(&config.ytdlp_path, &config.ffmpeg_path)),
            Arc::new(FfmpegTranscoder::new(&config.ffmpeg_path)),
            config.features,
        )
    }

    pub fn features(&self) -> Features {
        *self.features.read()
    }

    pub fn set_features(&self, features: Features) {
        *self.features.write() = features;
    }

    pub fn active_job(&self) -> Option<u64> {
        self.active.lock().as_ref().map(|job| job.id)
    }

    /// Validates `request` and starts it on a new tokio task.
    ///
    /// Must be called from within a tokio runtime. Only one job runs at a
    /// time; a second submit while one is active fails with `Busy` and
    /// touches nothing on disk.
    pub async fn submit(
        self: &Arc<Self>,
        request: DownloadRequest,
        observer: Arc<dyn JobObserver>,
    ) -> Result<JobHandle, SubmitError> {
        let features = self.features();
        check_fields(&request, &features)?;

        let cancel = CancellationToken::new();
        let id = {
            let mut active = self.active.lock();
            if active.is_some() {
                return Err(SubmitError::Busy);
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            *active = Some(ActiveJob { id, cancel: cancel.clone() });
            id
        };
        // Releases the reservation again if the destination is rejected.
        let slot = ActiveSlot { orchestrator: Arc::clone(self), id };

        let destination = request.destination.clone();
        tokio::task::spawn_blocking(move || ensure_writable(&destination))
            .await
            .map_err(|e| ValidationError::DestinationNotWritable {
                path: request.destination.clone(),
                reason: e.to_string(),
            })??;

        let job_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            observer.started(id);
            let report = slot
                .orchestrator
                .run(&request, &job_cancel, observer.as_ref())
                .await;
            // The slot stays taken until observers have seen the report.
            observer.finished(id, &report);
            drop(slot);
            report
        });

        Ok(JobHandle {
            id,
            cancel: features.cancellation.then_some(cancel),
            task,
        })
    }

    /// Asks the active job to stop at its next cancellation checkpoint.
    pub fn cancel_active(&self) -> CancelRequest {
        if !self.features().cancellation {
            return CancelRequest::Disabled;
        }
        match self.active.lock().as_ref() {
            Some(job) => {
                job.cancel.cancel();
                CancelRequest::Requested(job.id)
            }
            None => CancelRequest::NoActiveJob,
        }
    }

    /// The job body, without the single-job slot or a spawned task.
    ///
    /// Notifications go to `observer`; `started`/`finished` are left to the caller.
    pub async fn run(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
        observer: &dyn JobObserver,
    ) -> JobReport {
        let plan = FetchPlan::from_request(request);
        observer.log(&format!("Starting download: {}", plan.url));
        observer.progress(&JobProgress::downloading(None, None));

        let mut tracker = ProgressTracker::default();
        let mut on_progress = |event: FetchEvent| {
            // Checkpoint A
            if cancel.is_cancelled() {
                return ControlFlow::Break(());
            }
            tracker.observe(&event, observer);
            ControlFlow::Continue(())
        };

        let outcome = match self.fetcher.fetch(&plan, &mut on_progress, cancel).await {
            Ok(outcome) => outcome,
            Err(FetchError::Cancelled) => {
                return finish_cancelled(&plan, Vec::new(), Vec::new(), observer).await;
            }
            Err(err) => {
                tracing::error!("Download failed for {}: {}", plan.url, err);
                observer.log(&format!("Download failed: {err}"));
                observer.progress(&JobProgress::terminal(TerminalStatus::Failed));
                return JobReport::failed(err.to_string());
            }
        };

        let (ready, fetch_failures) = outcome.split();
        for reason in &fetch_failures {
            observer.log(&format!("Skipped failed entry: {reason}"));
        }

        let (items, cancelled) = if plan.audio_only {
            (finish_audio(ready, observer).await, false)
        } else {
            self.convert_all(ready, cancel, observer).await
        };

        if cancelled {
            return finish_cancelled(&plan, items, fetch_failures, observer).await;
        }

        observer.log("All downloads finished.");
        observer.progress(&JobProgress::terminal(TerminalStatus::Done));
        JobReport {
            status: TerminalStatus::Done,
            items,
            fetch_failures,
            error: None,
        }
    }

    /// Converts items in fetch-completion order. Returns whether cancellation was observed.
    async fn convert_all(
        &self,
        ready: Vec<FetchedMedia>,
        cancel: &CancellationToken,
        observer: &dyn JobObserver,
    ) -> (Vec<ItemOutcome>, bool) {
        let mut outcomes = Vec::with_capacity(ready.len());
        let mut cancelled = false;

        for media in ready {
            let item = MediaItem::video(media);
            if cancelled {
                outcomes.push(ItemOutcome::new(item, ItemResult::NotConverted));
                continue;
            }
            // Checkpoint B
            if cancel.is_cancelled() {
                observer.log("Cancelled before conversion.");
                cancelled = true;
                outcomes.push(ItemOutcome::new(item, ItemResult::NotConverted));
                continue;
            }

            let result = self.convert_item(&item, cancel, observer).await;
            cancelled = result == ItemResult::Cancelled;
            outcomes.push(ItemOutcome::new(item, result));
        }

        (outcomes, cancelled)
    }

    async fn convert_item(
        &self,
        item: &MediaItem,
        cancel: &CancellationToken,
        observer: &dyn JobObserver,
    ) -> ItemResult {
        observer.log(&format!("Converting {}...", item.title));
        observer.progress(&JobProgress::converting(&item.title));

        let output = item.conversion_output();
        // Checkpoint C lives inside the transcoder's cancellable wait.
        let converted = match self.transcoder.convert(&item.source, &output, cancel).await {
            Ok(()) => promote(item, &output).await.map_err(ConvertError::from),
            Err(err) => Err(err),
        };

        match converted {
            Ok(()) => {
                observer.log(&format!("Saved as {}", item.target.display()));
                ItemResult::Converted(item.target.clone())
            }
            Err(ConvertError::Cancelled) => {
                discard(&output).await;
                observer.log(&format!("Conversion cancelled: {}", item.title));
                ItemResult::Cancelled
            }
            Err(err) => {
                discard(&output).await;
                tracing::warn!("Conversion of {} failed: {}", item.source.display(), err);
                observer.log(&format!("Conversion failed: {}: {}", item.title, err));
                ItemResult::Failed(err.to_string())
            }
        }
    }
}

/// Full validation: the field checks, then the destination is created if needed and probed.
pub fn validate(request: &DownloadRequest, features: &Features) -> Result<(), ValidationError> {
    check_fields(request, features)?;
    ensure_writable(&request.destination)
}

/// The checks that need no filesystem access.
fn check_fields(request: &DownloadRequest, features: &Features) -> Result<(), ValidationError> {
    if request.url.trim().is_empty() {
        return Err(ValidationError::UrlRequired);
    }
    if request.destination.to_string_lossy().trim().is_empty() {
        return Err(ValidationError::DestinationRequired);
    }
    if request.audio_only && !features.audio_only {
        return Err(ValidationError::FeatureDisabled("audio-only"));
    }
    if request.playlist && !features.playlist {
        return Err(ValidationError::FeatureDisabled("playlist"));
    }
    Ok(())
}

fn ensure_writable(dir: &Path) -> Result<(), ValidationError> {
    let not_writable = |reason: String| ValidationError::DestinationNotWritable {
        path: dir.to_path_buf(),
        reason,
    };

    std::fs::create_dir_all(dir).map_err(|e| not_writable(e.to_string()))?;
    let meta = std::fs::metadata(dir).map_err(|e| not_writable(e.to_string()))?;
    if !meta.is_dir() {
        return Err(not_writable("not a directory".to_string()));
    }
    if meta.permissions().readonly() {
        return Err(not_writable("read-only".to_string()));
    }
    Ok(())
}

/// Keeps per-item progress ordered: percentages never go backwards and
/// `processing` is reported exactly once, after which the item is quiet.
#[derive(Default)]
struct ProgressTracker {
    items: HashMap<String, ItemProgress>,
}

#[derive(Default)]
struct ItemProgress {
    percent: Option<f64>,
    processed: bool,
}

impl ProgressTracker {
    fn observe(&mut self, event: &FetchEvent, observer: &dyn JobObserver) {
        let entry = self.items.entry(event.key().to_string()).or_default();
        if entry.processed {
            return;
        }

        let title = event.title().map(str::to_string);
        match event {
            FetchEvent::Downloading { .. } => {
                // yt-dlp restarts at 0% for the second stream of a merged download.
                let percent = event.percent().map(|pct| {
                    let pct = entry.percent.map_or(pct, |prev| prev.max(pct));
                    entry.percent = Some(pct);
                    pct
                });
                observer.progress(&JobProgress::downloading(percent, title));
            }
            FetchEvent::Finished { .. } => {
                entry.processed = true;
                observer.log("Download complete. Processing...");
                observer.progress(&JobProgress::processing(title));
            }
        }
    }
}

/// Moves a finished conversion into place and retires the fetched original.
async fn promote(item: &MediaItem, output: &Path) -> io::Result<()> {
    if output != item.target {
        // Staged: the source already had the target name and is replaced.
        return tokio::fs::rename(output, &item.target).await;
    }
    if let Err(e) = tokio::fs::remove_file(&item.source).await {
        tracing::warn!("Could not remove {}: {}", item.source.display(), e);
    }
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::debug!("Could not remove partial output {}: {}", path.display(), e);
        }
    }
}

async fn finish_audio(ready: Vec<FetchedMedia>, observer: &dyn JobObserver) -> Vec<ItemOutcome> {
    let mut outcomes = Vec::with_capacity(ready.len());
    for media in ready {
        let item = MediaItem::audio(media);
        let path = if item.target == item.source {
            item.source.clone()
        } else {
            match tokio::fs::rename(&item.source, &item.target).await {
                Ok(()) => item.target.clone(),
                Err(e) => {
                    tracing::warn!("Keeping {} under its fetched name: {}", item.source.display(), e);
                    item.source.clone()
                }
            }
        };
        observer.log(&format!("Saved as {}", path.display()));
        outcomes.push(ItemOutcome::new(item, ItemResult::Kept(path)));
    }
    outcomes
}

async fn finish_cancelled(
    plan: &FetchPlan,
    items: Vec<ItemOutcome>,
    fetch_failures: Vec<String>,
    observer: &dyn JobObserver,
) -> JobReport {
    observer.log("Download cancelled.");

    let dir = plan.destination.clone();
    let removed = tokio::task::spawn_blocking(move || cleanup::remove_partial_downloads(&dir))
        .await
        .unwrap_or(0);
    if removed > 0 {
        tracing::info!(
            "Removed {} partial download(s) from {}",
            removed,
            plan.destination.display()
        );
    }

    observer.progress(&JobProgress::terminal(TerminalStatus::Cancelled));
    JobReport {
        status: TerminalStatus::Cancelled,
        items,
        fetch_failures,
        error: None,
    }
}
