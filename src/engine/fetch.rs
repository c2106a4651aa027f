//! Validator artifact fetching and version tracking.
//!
//! The validator ships as a single jar attached to each upstream release.
//! Next to the jar lives a small JSON sidecar recording which release tag is
//! installed; it is the only thing consulted to decide whether to redownload.

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs4::fs_std::FileExt;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, LOCATION};
use reqwest::{redirect, Client, Response};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::defaults;

/// Errors that can occur while resolving or downloading the validator.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Release lookup failed: {0}")]
    RemoteLookup(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Too many redirects (more than {limit}) fetching {url}")]
    TooManyRedirects { url: String, limit: usize },

    #[error("Download timed out after {0:?}")]
    Timeout(Duration),

    #[error("Integrity check failed: expected sha256 {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("Failed to acquire install lock: {0}")]
    LockFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Newest published release of the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub version: String,
    pub download_url: String,
    pub published_at: Option<String>,
    /// Asset digest as published by the index, e.g. `sha256:<hex>`
    pub digest: Option<String>,
}

/// Sidecar record stored next to the installed jar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub version: String,
    pub download_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub downloaded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnsureOptions {
    /// Download even when the installed version matches the latest release
    pub force: bool,
    /// Trust an existing jar without asking the release index
    pub skip_update_check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub path: PathBuf,
    pub version: String,
    pub downloaded: bool,
    /// A different version was installed before this download
    pub updated: bool,
}

/// Download progress, reported at each 10% step when the length is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub downloaded: u64,
    pub total: u64,
    pub percent: u8,
}

pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

#[derive(Deserialize)]
struct GithubRelease {
    tag_name: String,
    published_at: Option<String>,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
    digest: Option<String>,
}

/// Validator artifact fetcher.
///
/// Resolves the latest release, downloads the jar and keeps the version
/// sidecar current. Concurrent `ensure_validator` calls are serialized by an
/// in-process mutex and an advisory lock file next to the jar.
pub struct ValidatorFetcher {
    client: Client,
    artifact_path: PathBuf,
    release_index_url: String,
    artifact_name: String,
    progress: Option<ProgressCallback>,
    install_lock: Mutex<()>,
}

impl ValidatorFetcher {
    /// Create a fetcher for the default artifact location.
    pub fn new() -> Self {
        Self::with_artifact_path(default_artifact_path())
    }

    /// Create a fetcher that installs to a custom jar path.
    pub fn with_artifact_path(artifact_path: impl Into<PathBuf>) -> Self {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(concat!("fhir-validator/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            artifact_path: artifact_path.into(),
            release_index_url: defaults::RELEASE_INDEX_URL.to_string(),
            artifact_name: defaults::ARTIFACT_NAME.to_string(),
            progress: None,
            install_lock: Mutex::new(()),
        }
    }

    /// Point the fetcher at a different release index.
    pub fn with_release_index(mut self, url: impl Into<String>) -> Self {
        self.release_index_url = url.into();
        self
    }

    /// Receive download progress at 10% granularity.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn version_file_path(&self) -> PathBuf {
        with_suffix(&self.artifact_path, defaults::VERSION_SIDECAR_SUFFIX)
    }

    /// Query the release index for the newest release and its jar asset.
    pub async fn get_latest_release(&self) -> Result<ReleaseInfo> {
        let response = self
            .client
            .get(&self.release_index_url)
            .header(ACCEPT, "application/vnd.github+json")
            .timeout(defaults::LOOKUP_TIMEOUT)
            .send()
            .await
            .map_err(|e| FetchError::RemoteLookup(format!("Failed to query release index: {}", e)))?;

        if !response.status().is_success() {
            return Err(FetchError::RemoteLookup(format!(
                "Release index returned {}",
                response.status()
            )));
        }

        let release: GithubRelease = response
            .json()
            .await
            .map_err(|e| FetchError::RemoteLookup(format!("Invalid release index format: {}", e)))?;

        let asset = release
            .assets
            .into_iter()
            .find(|asset| asset.name == self.artifact_name)
            .ok_or_else(|| {
                FetchError::RemoteLookup(format!(
                    "Release {} has no asset named {}",
                    release.tag_name, self.artifact_name
                ))
            })?;

        Ok(ReleaseInfo {
            version: release.tag_name,
            download_url: asset.browser_download_url,
            published_at: release.published_at,
            digest: asset.digest,
        })
    }

    /// Read the sidecar record. Missing or unreadable files yield `None`.
    pub fn installed_record(&self) -> Option<VersionRecord> {
        let content = std::fs::read_to_string(self.version_file_path()).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Ignoring unreadable version file: {}", e);
                None
            }
        }
    }

    /// Get the currently installed version.
    pub fn get_installed_version(&self) -> Option<String> {
        self.installed_record()
            .map(|record| record.version)
            .filter(|v| !v.is_empty())
    }

    /// Make sure a usable jar is installed, downloading it when required.
    pub async fn ensure_validator(&self, options: EnsureOptions) -> Result<EnsureOutcome> {
        // trusted installs take no lock; the jar may be read-only
        if let Some(outcome) = self.trusted_install(options) {
            return Ok(outcome);
        }

        let _guard = self.install_lock.lock().await;
        let _lock_file = self.lock_artifact().await?;

        // another caller may have installed it while we waited
        if let Some(outcome) = self.trusted_install(options) {
            return Ok(outcome);
        }

        let exists = self.artifact_path.exists();
        let installed = self.get_installed_version();

        let latest = self.get_latest_release().await?;

        let needs_download = options.force
            || !exists
            || installed.as_deref() != Some(latest.version.as_str());

        if !needs_download {
            log::info!("Validator {} is up to date", latest.version);
            return Ok(EnsureOutcome {
                path: self.artifact_path.clone(),
                version: latest.version,
                downloaded: false,
                updated: false,
            });
        }

        let updated = installed
            .as_deref()
            .is_some_and(|previous| previous != latest.version);

        log::info!(
            "Downloading validator {} (installed: {})",
            latest.version,
            installed.as_deref().unwrap_or("none")
        );
        self.download(
            &latest.download_url,
            &self.artifact_path,
            latest.digest.as_deref(),
        )
        .await?;

        self.write_version_record(&VersionRecord {
            version: latest.version.clone(),
            download_url: latest.download_url.clone(),
            downloaded_at: OffsetDateTime::now_utc(),
        })?;

        log::info!("Installed validator {}", latest.version);
        Ok(EnsureOutcome {
            path: self.artifact_path.clone(),
            version: latest.version,
            downloaded: true,
            updated,
        })
    }

    /// The existing jar, when the caller asked not to check for updates.
    fn trusted_install(&self, options: EnsureOptions) -> Option<EnsureOutcome> {
        if options.force || !options.skip_update_check || !self.artifact_path.exists() {
            return None;
        }
        log::debug!("Skipping update check for {:?}", self.artifact_path);
        Some(EnsureOutcome {
            path: self.artifact_path.clone(),
            version: self
                .get_installed_version()
                .unwrap_or_else(|| "unknown".into()),
            downloaded: false,
            updated: false,
        })
    }

    /// Stream `url` to `dest` through a temporary sibling file.
    ///
    /// Returns the number of bytes written.
    pub async fn download_file(&self, url: &str, dest: &Path) -> Result<u64> {
        self.download(url, dest, None).await
    }

    async fn download(&self, url: &str, dest: &Path, digest: Option<&str>) -> Result<u64> {
        let response = self.follow_redirects(url).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = with_suffix(dest, ".part");
        let written = match self.stream_to_file(response, &tmp_path, digest).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&tmp_path, dest).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        Ok(written)
    }

    async fn follow_redirects(&self, url: &str) -> Result<Response> {
        let mut current = url.to_string();

        for _ in 0..=defaults::MAX_REDIRECTS {
            let response = self
                .client
                .get(&current)
                .timeout(defaults::DOWNLOAD_TIMEOUT)
                .send()
                .await
                .map_err(download_error)?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        FetchError::Download(format!("{} from {} without Location", status, current))
                    })?;
                let next = response
                    .url()
                    .join(location)
                    .map_err(|e| FetchError::Download(format!("Bad redirect target {}: {}", location, e)))?;
                log::debug!("Following redirect to {}", next);
                current = next.to_string();
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::Download(format!("HTTP {} from {}", status, current)));
            }

            return Ok(response);
        }

        Err(FetchError::TooManyRedirects {
            url: url.to_string(),
            limit: defaults::MAX_REDIRECTS,
        })
    }

    async fn stream_to_file(
        &self,
        response: Response,
        tmp_path: &Path,
        digest: Option<&str>,
    ) -> Result<u64> {
        let total = response.content_length().filter(|&n| n > 0);
        let mut file = tokio::fs::File::create(tmp_path).await?;
        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut last_step = 0u8;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(download_error)?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            if let Some(total) = total {
                let step = progress_step(downloaded, total);
                if step > last_step {
                    last_step = step;
                    self.report_progress(DownloadProgress {
                        downloaded,
                        total,
                        percent: step * 10,
                    });
                }
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = digest.and_then(|d| d.strip_prefix("sha256:")) {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(FetchError::Integrity {
                    expected: expected.to_string(),
                    actual,
                });
            }
        } else if let Some(other) = digest {
            log::debug!("Unsupported digest {}, skipping verification", other);
        }

        Ok(downloaded)
    }

    fn report_progress(&self, progress: DownloadProgress) {
        log::info!(
            "Downloaded {}% ({} / {} bytes)",
            progress.percent,
            progress.downloaded,
            progress.total
        );
        if let Some(callback) = &self.progress {
            callback(progress);
        }
    }

    fn write_version_record(&self, record: &VersionRecord) -> Result<()> {
        let path = self.version_file_path();
        let tmp_path = with_suffix(&path, ".tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(record)?)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    async fn lock_artifact(&self) -> Result<File> {
        let lock_path = with_suffix(&self.artifact_path, ".lock");
        if let Some(parent) = lock_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            file.lock_exclusive()?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(|e| FetchError::LockFailed(e.to_string()))?
        .map_err(|e| FetchError::LockFailed(e.to_string()))
    }
}

impl Default for ValidatorFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Jar location: `$FHIR_VALIDATOR_JAR`, else `~/.fhir-validator/validator_cli.jar`.
pub fn default_artifact_path() -> PathBuf {
    resolve_artifact_path(
        std::env::var_os(defaults::ARTIFACT_PATH_ENV),
        dirs::home_dir(),
    )
}

fn resolve_artifact_path(override_path: Option<OsString>, home: Option<PathBuf>) -> PathBuf {
    if let Some(path) = override_path.filter(|p| !p.to_string_lossy().trim().is_empty()) {
        return PathBuf::from(path);
    }

    home.unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".fhir-validator")
        .join(defaults::ARTIFACT_NAME)
}

/// Completed tenths of `total`, capped at 10.
fn progress_step(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (downloaded.saturating_mul(10) / total).min(10) as u8
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn download_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(defaults::DOWNLOAD_TIMEOUT)
    } else {
        FetchError::Download(e.to_string())
    }
}
