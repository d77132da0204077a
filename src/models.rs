use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::fetch::FetchedMedia;
use crate::sanitize::sanitize_filename;

// === Job Models ===

/// A single download job: what to fetch, where to put it and how.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
    #[serde(default)]
    pub playlist: bool,
    #[serde(default)]
    pub audio_only: bool,
}

/// One file produced by the fetch step, tracked until it reaches its final name.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct MediaItem {
    pub title: String,
    /// 1-based position inside a playlist, when the fetch resolved one.
    pub index: Option<u32>,
    /// The file as the fetcher wrote it.
    pub source: PathBuf,
    /// Where the final artifact ends up.
    pub target: PathBuf,
}

impl MediaItem {
    /// An item headed for `.mp4` conversion.
    pub fn video(media: FetchedMedia) -> Self {
        let target = sanitized_sibling(&media.path, "mp4");
        Self::from_media(media, target)
    }

    /// An audio-only item. It keeps its extension and only gets a clean name.
    pub fn audio(media: FetchedMedia) -> Self {
        let ext = media
            .path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = sanitized_sibling(&media.path, &ext);
        Self::from_media(media, target)
    }

    fn from_media(media: FetchedMedia, target: PathBuf) -> Self {
        let title = media
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| file_stem(&media.path));
        MediaItem {
            title,
            index: media.playlist_index,
            source: media.path,
            target,
        }
    }

    /// Path the transcoder should write to. ffmpeg cannot convert a file onto
    /// itself, so a source that already carries the target name goes through
    /// a staging sibling that is renamed afterwards.
    pub fn conversion_output(&self) -> PathBuf {
        if self.target != self.source {
            return self.target.clone();
        }
        let stem = file_stem(&self.source);
        self.source.with_file_name(format!("{stem}.converting.mp4"))
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sanitized_sibling(path: &Path, ext: &str) -> PathBuf {
    let stem = file_stem(path);
    let clean = sanitize_filename(&stem);
    // A title made only of illegal characters still has a usable on-disk name.
    let name = if clean.is_empty() { stem } else { clean };
    let file_name = if ext.is_empty() {
        name
    } else {
        format!("{name}.{ext}")
    };
    path.with_file_name(file_name)
}

// === Progress Models ===

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Downloading,
    Processing,
    Converting,
    Done,
    Cancelled,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Cancelled | Phase::Failed)
    }
}

/// A progress notification. Emitted many times per job and never stored by the orchestrator.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct JobProgress {
    pub phase: Phase,
    /// 0–100, withheld when the fetcher does not know the total size.
    pub percent: Option<f64>,
    pub title: Option<String>,
}

impl JobProgress {
    pub fn downloading(percent: Option<f64>, title: Option<String>) -> Self {
        JobProgress { phase: Phase::Downloading, percent, title }
    }

    pub fn processing(title: Option<String>) -> Self {
        JobProgress { phase: Phase::Processing, percent: None, title }
    }

    pub fn converting(title: &str) -> Self {
        JobProgress {
            phase: Phase::Converting,
            percent: None,
            title: Some(title.to_string()),
        }
    }

    pub fn terminal(status: TerminalStatus) -> Self {
        JobProgress { phase: status.phase(), percent: None, title: None }
    }

    /// The one-line status text shown next to the start/cancel controls.
    pub fn status_line(&self) -> String {
        match (self.phase, self.percent) {
            (Phase::Downloading, Some(pct)) => format!("Downloading... {pct:.1}%"),
            (Phase::Downloading, None) => "Downloading...".to_string(),
            (Phase::Processing, _) => "Processing...".to_string(),
            (Phase::Converting, _) => match &self.title {
                Some(title) => format!("Converting {title}..."),
                None => "Converting...".to_string(),
            },
            (Phase::Done, _) => "Done!".to_string(),
            (Phase::Cancelled, _) => "Cancelled".to_string(),
            (Phase::Failed, _) => "Download failed :(".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Done,
    Cancelled,
    Failed,
}

impl TerminalStatus {
    pub fn phase(self) -> Phase {
        match self {
            TerminalStatus::Done => Phase::Done,
            TerminalStatus::Cancelled => Phase::Cancelled,
            TerminalStatus::Failed => Phase::Failed,
        }
    }
}

// === Report Models ===

/// What happened to one item by the time the job ended.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum ItemResult {
    /// Converted to `.mp4`; the original was removed.
    Converted(PathBuf),
    /// Audio-only item, kept as fetched (possibly under a cleaned name).
    Kept(PathBuf),
    /// Cancellation was observed before this item's conversion started.
    NotConverted,
    /// The transcoder was terminated mid-conversion.
    Cancelled,
    Failed(String),
}

#[derive(Clone, Debug, Serialize)]
pub struct ItemOutcome {
    pub item: MediaItem,
    pub result: ItemResult,
}

impl ItemOutcome {
    pub fn new(item: MediaItem, result: ItemResult) -> Self {
        ItemOutcome { item, result }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct JobReport {
    pub status: TerminalStatus,
    pub items: Vec<ItemOutcome>,
    /// Playlist entries the fetcher reported as failed and skipped.
    pub fetch_failures: Vec<String>,
    pub error: Option<String>,
}

impl JobReport {
    pub fn failed(error: impl Into<String>) -> Self {
        JobReport {
            status: TerminalStatus::Failed,
            items: Vec::new(),
            fetch_failures: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn converted_count(&self) -> usize {
        self.items
            .iter()
            .filter(|o| matches!(o.result, ItemResult::Converted(_)))
            .count()
    }
}

// === API Request/Response Models ===

/// The JSON body for a `POST /download` request.
#[derive(Deserialize, Debug)]
pub struct StartDownload {
    pub url: String,
    /// Falls back to the configured download directory when absent.
    pub destination: Option<String>,
    #[serde(default)]
    pub playlist: bool,
    #[serde(default)]
    pub audio_only: bool,
}

/// The response sent after successfully starting a download.
#[derive(Serialize, Debug)]
pub struct DownloadResponse {
    pub message: String,
    pub job_id: u64,
}

/// Everything the front end shows: the status line, the log and the last result.
#[derive(Clone, Serialize, Debug, Default)]
pub struct StatusSnapshot {
    pub active_job: Option<u64>,
    pub status_line: String,
    pub phase: Option<Phase>,
    pub percent: Option<f64>,
    pub log: Vec<String>,
    pub last_report: Option<JobReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(path: &str, title: Option<&str>) -> FetchedMedia {
        FetchedMedia {
            title: title.map(str::to_string),
            playlist_index: None,
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn video_target_is_sanitized_mp4_sibling() {
        let item = MediaItem::video(media("/dl/A & B: C?.webm", Some("A & B: C?")));
        assert_eq!(item.target, PathBuf::from("/dl/A and B C.mp4"));
        assert_eq!(item.conversion_output(), item.target);
        assert_eq!(item.title, "A & B: C?");
    }

    #[test]
    fn clean_mp4_source_converts_through_staging_file() {
        let item = MediaItem::video(media("/dl/Clip.mp4", Some("Clip")));
        assert_eq!(item.target, item.source);
        assert_eq!(item.conversion_output(), PathBuf::from("/dl/Clip.converting.mp4"));
    }

    #[test]
    fn audio_target_keeps_extension() {
        let item = MediaItem::audio(media("/dl/01 - Rock & Roll.mp3", None));
        assert_eq!(item.target, PathBuf::from("/dl/01 - Rock and Roll.mp3"));
        assert_eq!(item.title, "01 - Rock & Roll");
    }

    #[test]
    fn all_illegal_stem_keeps_original_name() {
        let item = MediaItem::video(media("/dl/???.mkv", None));
        assert_eq!(item.target, PathBuf::from("/dl/???.mp4"));
    }

    #[test]
    fn status_lines_follow_phase() {
        assert_eq!(
            JobProgress::downloading(Some(42.0), None).status_line(),
            "Downloading... 42.0%"
        );
        assert_eq!(JobProgress::downloading(None, None).status_line(), "Downloading...");
        assert_eq!(JobProgress::converting("Clip").status_line(), "Converting Clip...");
        assert_eq!(
            JobProgress::terminal(TerminalStatus::Cancelled).status_line(),
            "Cancelled"
        );
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Processing.is_terminal());
    }
}
