use anyhow::{anyhow, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Everything `config.toml` holds. Missing keys fall back to their defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub download_directory: String,
    /// yt-dlp executable, looked up on PATH unless absolute.
    pub ytdlp_path: String,
    /// ffmpeg executable, handed to yt-dlp and used for conversion.
    pub ffmpeg_path: String,
    /// `owner/repo` on GitHub whose latest release is compared against ours.
    pub release_repository: Option<String>,
    pub features: Features,
}

/// Switches that used to be separate program variants.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Features {
    pub audio_only: bool,
    pub playlist: bool,
    pub cancellation: bool,
    pub update_check: bool,
}

impl Default for Features {
    fn default() -> Self {
        Features {
            audio_only: true,
            playlist: true,
            cancellation: true,
            update_check: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let default_dir = UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(|p| p.to_string_lossy().to_string()))
            .unwrap_or_else(|| "downloads".to_string());

        Config {
            download_directory: default_dir,
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            release_repository: None,
            features: Features::default(),
        }
    }
}

/// Returns the cross-platform path to the configuration file, creating the directory if needed.
pub async fn get_config_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("com", "ytdlp-convert", "YT-DLP-Convert")
        .ok_or_else(|| anyhow!("Could not find a valid home directory to store config"))?;

    let config_dir = project_dirs.config_dir();
    fs::create_dir_all(config_dir).await?;

    Ok(config_dir.join("config.toml"))
}

/// Loads the configuration from `config_path`, writing a default one if the file is missing.
pub async fn load_config_from(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        tracing::info!(
            "No config file found. Creating a default one at: {}",
            config_path.display()
        );
        let default_config = Config::default();
        save_config_to(config_path, &default_config).await?;
        return Ok(default_config);
    }

    let config_content = fs::read_to_string(config_path).await?;
    let config: Config = toml::from_str(&config_content)
        .map_err(|e| anyhow!("Failed to parse config file at {}: {}", config_path.display(), e))?;

    Ok(config)
}

pub async fn save_config_to(config_path: &Path, config: &Config) -> Result<()> {
    let toml_string = toml::to_string_pretty(config)?;
    fs::write(config_path, toml_string).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = toml::from_str(
            r#"
            download_directory = "/srv/media"

            [features]
            playlist = false
            "#,
        )
        .unwrap();

        assert_eq!(config.download_directory, "/srv/media");
        assert_eq!(config.ytdlp_path, "yt-dlp");
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        assert_eq!(config.release_repository, None);
        assert!(!config.features.playlist);
        assert!(config.features.audio_only);
        assert!(config.features.cancellation);
        assert!(config.features.update_check);
    }

    #[tokio::test]
    async fn load_creates_default_then_round_trips_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let created = load_config_from(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(created, Config::default());

        let mut edited = created.clone();
        edited.release_repository = Some("owner/repo".to_string());
        edited.features.cancellation = false;
        save_config_to(&path, &edited).await.unwrap();

        assert_eq!(load_config_from(&path).await.unwrap(), edited);
    }

    #[tokio::test]
    async fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "features = 12").await.unwrap();

        let err = load_config_from(&path).await.unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }
}
