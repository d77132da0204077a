//! The seam between the orchestrator and whatever resolves URLs into media files.

use async_trait::async_trait;
use std::ops::ControlFlow;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::models::DownloadRequest;

/// Best video up to 1080p plus best audio, falling back to the best single file.
pub const VIDEO_FORMAT: &str = "bestvideo[height<=1080]+bestaudio/best";
pub const AUDIO_FORMAT: &str = "bestaudio/best";
pub const AUDIO_CODEC: &str = "mp3";
pub const AUDIO_QUALITY: &str = "320K";

pub const SINGLE_TEMPLATE: &str = "%(title)s.%(ext)s";
pub const PLAYLIST_TEMPLATE: &str = "%(playlist_index)s - %(title)s.%(ext)s";

/// What the fetcher is asked to do for one job.
#[derive(Clone, Debug)]
pub struct FetchPlan {
    pub url: String,
    pub destination: PathBuf,
    pub playlist: bool,
    pub audio_only: bool,
}

impl FetchPlan {
    pub fn from_request(request: &DownloadRequest) -> Self {
        FetchPlan {
            url: request.url.trim().to_string(),
            destination: request.destination.clone(),
            playlist: request.playlist,
            audio_only: request.audio_only,
        }
    }

    pub fn format_selector(&self) -> &'static str {
        if self.audio_only {
            AUDIO_FORMAT
        } else {
            VIDEO_FORMAT
        }
    }

    /// Output path template, relative names prefixed with the playlist position.
    pub fn output_template(&self) -> PathBuf {
        let template = if self.playlist {
            PLAYLIST_TEMPLATE
        } else {
            SINGLE_TEMPLATE
        };
        self.destination.join(template)
    }
}

/// A status report from inside the fetch, keyed by the item it concerns.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchEvent {
    Downloading {
        key: String,
        title: Option<String>,
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
    },
    /// The fetcher finished writing one stream of the item.
    Finished { key: String, title: Option<String> },
}

impl FetchEvent {
    pub fn key(&self) -> &str {
        match self {
            FetchEvent::Downloading { key, .. } | FetchEvent::Finished { key, .. } => key,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            FetchEvent::Downloading { title, .. } | FetchEvent::Finished { title, .. } => {
                title.as_deref()
            }
        }
    }

    /// `downloaded / total * 100`, only when both counters are known.
    pub fn percent(&self) -> Option<f64> {
        match self {
            FetchEvent::Downloading {
                downloaded_bytes: Some(done),
                total_bytes: Some(total),
                ..
            } if *total > 0 => Some((*done as f64 * 100.0 / *total as f64).min(100.0)),
            _ => None,
        }
    }
}

/// A file the fetcher wrote to disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedMedia {
    pub title: Option<String>,
    pub playlist_index: Option<u32>,
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchedEntry {
    Ready(FetchedMedia),
    /// An entry that could not be fetched; the rest of the playlist continues.
    Failed(String),
}

#[derive(Clone, Debug, Default)]
pub struct FetchOutcome {
    /// Entries in the order the fetcher completed them.
    pub entries: Vec<FetchedEntry>,
}

impl FetchOutcome {
    pub fn split(self) -> (Vec<FetchedMedia>, Vec<String>) {
        let mut ready = Vec::new();
        let mut failed = Vec::new();
        for entry in self.entries {
            match entry {
                FetchedEntry::Ready(media) => ready.push(media),
                FetchedEntry::Failed(reason) => failed.push(reason),
            }
        }
        (ready, failed)
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads everything `plan` resolves to.
    ///
    /// `on_progress` is called for every status report. When it returns
    /// `ControlFlow::Break`, the fetch must stop and return
    /// [`FetchError::Cancelled`]. A fired `cancel` token means the same.
    async fn fetch(
        &self,
        plan: &FetchPlan,
        on_progress: &mut (dyn FnMut(FetchEvent) -> ControlFlow<()> + Send),
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError>;
}
