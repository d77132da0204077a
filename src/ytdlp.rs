use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::io;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::fetch::{
    FetchEvent, FetchOutcome, FetchPlan, FetchedEntry, FetchedMedia, Fetcher, AUDIO_CODEC,
    AUDIO_QUALITY,
};
use crate::process;

const PROGRESS_TAG: &str = "YTDLP_CONVERT_PROGRESS";
const ITEM_TAG: &str = "YTDLP_CONVERT_ITEM";

/// Fetches media by running the yt-dlp executable.
#[derive(Clone, Debug)]
pub struct YtDlpFetcher {
    program: PathBuf,
    ffmpeg: PathBuf,
}

impl YtDlpFetcher {
    pub fn new(program: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        YtDlpFetcher {
            program: program.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    /// The full yt-dlp argument list for `plan`.
    pub fn args(&self, plan: &FetchPlan) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-f".into(),
            plan.format_selector().into(),
            "--ffmpeg-location".into(),
            self.ffmpeg.clone().into(),
            "-o".into(),
            plan.output_template().into(),
            (if plan.playlist { "--yes-playlist" } else { "--no-playlist" }).into(),
            "--ignore-errors".into(),
            "--newline".into(),
            "--progress".into(),
            "--quiet".into(),
            "--no-warnings".into(),
            "--progress-template".into(),
            format!(
                "download:{PROGRESS_TAG}|%(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(info.id)s|%(info.title)s"
            )
            .into(),
            "--print".into(),
            format!("after_move:{ITEM_TAG} %(.{{title,playlist_index,filepath}})j").into(),
        ];

        if plan.audio_only {
            args.extend([
                "--extract-audio".into(),
                "--audio-format".into(),
                AUDIO_CODEC.into(),
                "--audio-quality".into(),
                AUDIO_QUALITY.into(),
            ]);
        }

        args.push(plan.url.clone().into());
        args
    }
}

/// One line of yt-dlp output, classified.
#[derive(Debug, PartialEq)]
pub enum OutputLine {
    Progress(FetchEvent),
    Item(FetchedMedia),
    Error(String),
    Other,
}

#[derive(Deserialize)]
struct ItemLine {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    playlist_index: Option<u32>,
    filepath: String,
}

pub fn parse_line(line: &str) -> OutputLine {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROGRESS_TAG) {
        return parse_progress(rest.trim_start_matches('|')).unwrap_or(OutputLine::Other);
    }

    if let Some(rest) = line.strip_prefix(ITEM_TAG) {
        return match serde_json::from_str::<ItemLine>(rest.trim()) {
            Ok(item) => OutputLine::Item(FetchedMedia {
                title: item.title,
                playlist_index: item.playlist_index,
                path: PathBuf::from(item.filepath),
            }),
            Err(e) => {
                tracing::warn!("Unreadable item report from yt-dlp ({}): {}", e, rest);
                OutputLine::Other
            }
        };
    }

    if let Some(rest) = line.strip_prefix("ERROR:") {
        return OutputLine::Error(rest.trim().to_string());
    }

    OutputLine::Other
}

fn parse_progress(fields: &str) -> Option<OutputLine> {
    // The title goes last so any '|' inside it survives the split.
    let mut parts = fields.splitn(6, '|');
    let status = parts.next()?;
    let downloaded = parse_count(parts.next()?);
    let total = parse_count(parts.next()?);
    let estimate = parse_count(parts.next()?);
    let key = parts.next()?.to_string();
    let title = parts.next().and_then(present).map(str::to_string);

    let event = match status {
        "downloading" => FetchEvent::Downloading {
            key,
            title,
            downloaded_bytes: downloaded,
            total_bytes: total.or(estimate),
        },
        "finished" => FetchEvent::Finished { key, title },
        _ => return None,
    };
    Some(OutputLine::Progress(event))
}

/// yt-dlp prints `NA` for missing fields and floats for estimates.
fn parse_count(field: &str) -> Option<u64> {
    let value: f64 = present(field)?.parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value as u64)
}

fn present(field: &str) -> Option<&str> {
    let field = field.trim();
    (!field.is_empty() && field != "NA" && field != "None").then_some(field)
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        plan: &FetchPlan,
        on_progress: &mut (dyn FnMut(FetchEvent) -> ControlFlow<()> + Send),
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        tokio::fs::create_dir_all(&plan.destination).await?;
        tracing::info!("Running yt-dlp for {}", plan.url);

        let mut child = process::command(&self.program)
            .args(self.args(plan))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| FetchError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            process::terminate(&mut child).await;
            return Err(FetchError::Io(io::Error::new(
                io::ErrorKind::Other,
                "yt-dlp output was not captured",
            )));
        };
        let stdout = LinesStream::new(BufReader::new(stdout).lines());
        let stderr = LinesStream::new(BufReader::new(stderr).lines());
        let mut lines = stdout.merge(stderr);

        let mut entries = Vec::new();
        let mut errors = Vec::new();

        loop {
            let next = tokio::select! {
                next = lines.next() => next,
                _ = cancel.cancelled() => {
                    process::terminate(&mut child).await;
                    return Err(FetchError::Cancelled);
                }
            };

            let line = match next {
                None => break,
                Some(Ok(line)) => line,
                Some(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    tracing::debug!("Skipping non UTF-8 yt-dlp output: {}", e);
                    continue;
                }
                Some(Err(e)) => {
                    process::terminate(&mut child).await;
                    return Err(FetchError::Io(e));
                }
            };

            match parse_line(&line) {
                OutputLine::Progress(event) => {
                    if on_progress(event).is_break() {
                        process::terminate(&mut child).await;
                        return Err(FetchError::Cancelled);
                    }
                }
                OutputLine::Item(media) => {
                    tracing::debug!("yt-dlp wrote {}", media.path.display());
                    entries.push(FetchedEntry::Ready(media));
                }
                OutputLine::Error(message) => {
                    tracing::warn!("yt-dlp error: {}", message);
                    entries.push(FetchedEntry::Failed(message.clone()));
                    errors.push(message);
                }
                OutputLine::Other => tracing::trace!("yt-dlp: {}", line),
            }
        }

        let status = child.wait().await?;
        let fetched = entries
            .iter()
            .filter(|e| matches!(e, FetchedEntry::Ready(_)))
            .count();

        // With --ignore-errors a partly failed playlist still exits non-zero.
        if !status.success() && fetched == 0 {
            let message = if errors.is_empty() {
                format!("yt-dlp exited with {}", status)
            } else {
                errors.join("; ")
            };
            return Err(FetchError::Failed(message));
        }

        Ok(FetchOutcome { entries })
    }
}
