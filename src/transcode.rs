use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::error::ConvertError;
use crate::process::{self, WaitOutcome};

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Re-muxes `input` into `output`, keeping video and re-encoding audio to AAC.
    ///
    /// A fired `cancel` token must stop the work and return [`ConvertError::Cancelled`].
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ConvertError>;
}

/// Converts with the ffmpeg executable.
#[derive(Clone, Debug)]
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        FfmpegTranscoder { program: program.into() }
    }
}

/// Overwrite, copy the video stream, AAC audio.
pub fn conversion_args(input: &Path, output: &Path) -> Vec<OsString> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.into(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "aac".into(),
        output.into(),
    ]
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ConvertError> {
        tracing::debug!("ffmpeg {} -> {}", input.display(), output.display());

        let mut child = process::command(&self.program)
            .args(conversion_args(input, output))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ConvertError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        // Drain stderr alongside the wait so a chatty ffmpeg never blocks on a full pipe.
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            if let Some(mut stderr) = stderr {
                if let Err(e) = stderr.read_to_string(&mut text).await {
                    tracing::debug!("Could not read ffmpeg stderr: {}", e);
                }
            }
            text
        });

        match process::wait_cancellable(&mut child, cancel).await? {
            WaitOutcome::Cancelled => {
                stderr_task.abort();
                Err(ConvertError::Cancelled)
            }
            WaitOutcome::Exited(status) if status.success() => Ok(()),
            WaitOutcome::Exited(status) => {
                let stderr = stderr_task.await.unwrap_or_default();
                let stderr = stderr.trim();
                let message = if stderr.is_empty() {
                    format!("ffmpeg exited with {}", status)
                } else {
                    format!("ffmpeg exited with {}: {}", status, stderr)
                };
                Err(ConvertError::Failed(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_copy_video_and_encode_aac() {
        let args: Vec<String> = conversion_args(Path::new("/dl/in.webm"), Path::new("/dl/in.mp4"))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(args[0], "-y");
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "/dl/in.webm");
        let video = args.iter().position(|a| a == "-c:v").unwrap();
        assert_eq!(args[video + 1], "copy");
        let audio = args.iter().position(|a| a == "-c:a").unwrap();
        assert_eq!(args[audio + 1], "aac");
        assert_eq!(args.last().unwrap(), "/dl/in.mp4");
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = FfmpegTranscoder::new(dir.path().join("no-such-ffmpeg"));
        let err = transcoder
            .convert(
                &dir.path().join("in.webm"),
                &dir.path().join("in.mp4"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Spawn { .. }));
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = FfmpegTranscoder::new(fake_ffmpeg(dir.path(), "exit 0"));
        transcoder
            .convert(&dir.path().join("in.webm"), &dir.path().join("in.mp4"), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ffmpeg(
            dir.path(),
            "echo 'in.webm: Invalid data found when processing input' >&2\nexit 1",
        );
        let err = FfmpegTranscoder::new(program)
            .convert(&dir.path().join("in.webm"), &dir.path().join("in.mp4"), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ConvertError::Failed(message) => {
                assert!(message.contains("exit status: 1"), "{message}");
                assert!(message.ends_with("Invalid data found when processing input"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_stops_a_running_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = FfmpegTranscoder::new(fake_ffmpeg(dir.path(), "exec sleep 30"));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = transcoder
            .convert(&dir.path().join("in.webm"), &dir.path().join("in.mp4"), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Cancelled));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
