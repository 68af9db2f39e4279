//! Repository snapshot import
//!
//! Downloads `{repo}/archive/refs/heads/{branch}.zip` for each candidate
//! branch in turn and imports the first one that exists.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use url::Url;

use crate::server::archive::import::{import_zip, ImportOutcome, RootPolicy};
use crate::server::archive::ArchiveJob;
use crate::server::context::AppError;

/// Source of repository archives
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    /// Download `url` into `dest`. `Ok(false)` means the remote answered but
    /// has no such archive (e.g. the branch does not exist).
    async fn fetch(&self, url: &str, dest: &Path) -> Result<bool, AppError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("filedeck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<bool, AppError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::RemoteFetchFailed(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            warn!(url, status = %response.status(), "Archive not available");
            return Ok(false);
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| AppError::from_io(e, dest))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| AppError::RemoteFetchFailed(format!("{}: {}", url, e)))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(true)
    }
}

/// Validate a repository URL and strip a trailing `/` and `.git`.
pub fn normalize_repo_url(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed)
        .map_err(|e| AppError::InvalidInput(format!("Invalid repository URL '{}': {}", trimmed, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::InvalidInput(format!(
            "Unsupported URL scheme '{}'",
            parsed.scheme()
        )));
    }

    let mut url = trimmed.trim_end_matches('/');
    url = url.strip_suffix(".git").unwrap_or(url);
    Ok(url.trim_end_matches('/').to_string())
}

pub fn archive_url(repo: &str, branch: &str) -> String {
    format!("{}/archive/refs/heads/{}.zip", repo, branch)
}

/// Last path segment of a normalized repository URL.
pub fn repo_name(repo: &str) -> String {
    repo.rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("repository")
        .to_string()
}

/// Fetch the first available branch archive of `repo_url` and import it
/// into `destination`.
pub async fn import_repository(
    fetcher: &dyn ArchiveFetcher,
    repo_url: &str,
    branches: &[String],
    destination: &Path,
) -> Result<ImportOutcome, AppError> {
    let repo = normalize_repo_url(repo_url)?;
    if branches.is_empty() {
        return Err(AppError::InvalidInput("No branches configured".to_string()));
    }

    let job = ArchiveJob::new(&repo, destination)?;
    let zip_path: PathBuf = job.work_dir().join(format!("{}.zip", repo_name(&repo)));

    let mut fetched = None;
    for branch in branches {
        let url = archive_url(&repo, branch);
        info!(%url, "Fetching repository archive");
        match fetcher.fetch(&url, &zip_path).await {
            Ok(true) => {
                fetched = Some(branch.clone());
                break;
            }
            Ok(false) => continue,
            Err(e) => {
                warn!(%url, error = %e, "Archive download failed");
                continue;
            }
        }
    }

    let Some(branch) = fetched else {
        return Err(AppError::RemoteFetchFailed(format!(
            "Could not download {} (tried branches: {})",
            repo,
            branches.join(", ")
        )));
    };
    info!(%repo, %branch, "Repository archive downloaded");

    let destination = destination.to_path_buf();
    let zip = zip_path.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        import_zip(&zip, &destination, RootPolicy::SingleVisibleFolder)
    })
    .await??;

    drop(job);
    Ok(outcome)
}
