use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;
use crate::error::{UpdateCheckError, VersionError};

pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The parts of GitHub's "latest release" payload we look at.
#[derive(Deserialize, Debug, Clone)]
pub struct Release {
    pub tag_name: String,
    pub html_url: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateStatus {
    UpdateAvailable { current: String, latest: String, url: String },
    UpToDate { current: String },
    Ahead { current: String, latest: String },
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStatus::UpdateAvailable { current, latest, url } => write!(
                f,
                "A new version {latest} is available (you have {current}). Download it from {url}"
            ),
            UpdateStatus::UpToDate { current } => write!(f, "Up to date (version {current})"),
            UpdateStatus::Ahead { .. } => write!(f, "You are ahead (dev build)"),
        }
    }
}

/// A dotted numeric version with an optional pre-release suffix.
///
/// Components compare numerically (`1.10 > 1.9`), missing components count as
/// zero and a pre-release sorts before its release.
#[derive(Debug, Clone)]
pub struct Version {
    parts: Vec<u64>,
    pre: Option<String>,
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError(s.to_string());
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        // Build metadata never affects ordering.
        let trimmed = trimmed.split('+').next().unwrap_or_default();
        let (core, pre) = match trimmed.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return Err(invalid()),
            None => (trimmed, None),
        };

        let parts = core
            .split('.')
            .map(|p| p.parse::<u64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Version { parts, pre })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => compare_pre_release(a, b),
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders pre-release tags with digit runs compared as numbers, so `rc9 < rc10`.
fn compare_pre_release(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (chunks(a), chunks(b));
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Splits `rc.10` or `rc10` into `["rc", "10"]`.
fn chunks(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || {
        rest = rest.trim_start_matches('.');
        let first = rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c == '.' || c.is_ascii_digit() != digits)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        rest = tail;
        Some(chunk)
    })
}

/// The repository to ask, provided the check is switched on and configured.
pub fn configured_repository(config: &Config) -> Result<&str, UpdateCheckError> {
    if !config.features.update_check {
        return Err(UpdateCheckError::Disabled);
    }
    config
        .release_repository
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .ok_or(UpdateCheckError::NotConfigured)
}

pub fn release_url(repository: &str) -> String {
    format!("https://api.github.com/repos/{}/releases/latest", repository.trim_matches('/'))
}

/// Compares a fetched release against the running version.
pub fn evaluate(release: &Release, current: &str) -> Result<UpdateStatus, VersionError> {
    let latest_tag = release.tag_name.trim();
    let latest_tag = latest_tag.strip_prefix('v').unwrap_or(latest_tag);
    let latest: Version = latest_tag.parse()?;
    let running: Version = current.parse()?;

    Ok(match latest.cmp(&running) {
        Ordering::Greater => UpdateStatus::UpdateAvailable {
            current: current.to_string(),
            latest: latest_tag.to_string(),
            url: release.html_url.clone(),
        },
        Ordering::Equal => UpdateStatus::UpToDate { current: current.to_string() },
        Ordering::Less => UpdateStatus::Ahead {
            current: current.to_string(),
            latest: latest_tag.to_string(),
        },
    })
}

pub fn http_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Asks GitHub for `repository`'s latest release and compares it with `current`.
pub async fn check_for_update(
    client: &reqwest::Client,
    repository: &str,
    current: &str,
) -> Result<UpdateStatus> {
    let url = release_url(repository);
    tracing::debug!("Checking for updates at {}", url);

    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(anyhow!("Update check failed: HTTP {}", response.status()));
    }
    let release: Release = response.json().await?;
    Ok(evaluate(&release, current)?)
}
