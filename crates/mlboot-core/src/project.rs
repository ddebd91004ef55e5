//! Fetches the project snapshot and syncs its environment.

use std::path::PathBuf;
use std::sync::Arc;

use crate::archive::{ArchiveExtractor, ArchiveKind, ExtractOptions};
use crate::error::{BootstrapError, Result};
use crate::event::{emit, EventSink, Progress, TaskLog, TaskName};
use crate::http::{download_reporting, HttpClient};
use crate::process::StepRunner;

pub struct ProjectFetcher {
    http: Arc<HttpClient>,
    sink: Arc<dyn EventSink>,
    runner: Arc<dyn StepRunner>,
    working_dir: PathBuf,
}

impl ProjectFetcher {
    pub fn new(
        http: Arc<HttpClient>,
        sink: Arc<dyn EventSink>,
        runner: Arc<dyn StepRunner>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http,
            sink,
            runner,
            working_dir: working_dir.into(),
        }
    }

    /// Branch snapshot URL as served by GitHub.
    pub fn snapshot_url(repo_url: &str, branch: &str) -> String {
        format!(
            "{}/archive/refs/heads/{}.zip",
            repo_url.trim_end_matches('/'),
            branch
        )
    }

    /// Download `branch` of `repo_url`, unpack it, then run `uv sync`.
    pub async fn fetch(&self, repo_url: &str, branch: &str) -> Result<()> {
        self.download(repo_url, branch).await?;
        self.sync().await
    }

    /// Download `branch` of `repo_url` and unpack it into the working
    /// directory without its top-level folder.
    pub async fn download(&self, repo_url: &str, branch: &str) -> Result<()> {
        let url = Self::snapshot_url(repo_url, branch);
        log::info!("Fetching project snapshot {}", url);

        emit(self.sink.as_ref(), TaskLog::scheduled(TaskName::ProjectDownload));

        let staging = tempfile::Builder::new()
            .prefix("mlboot-project")
            .tempdir()
            .map_err(|e| BootstrapError::io(std::env::temp_dir(), e))?;
        let archive_path = staging.path().join("snapshot.zip");

        download_reporting(
            &self.http,
            self.sink.as_ref(),
            TaskName::ProjectDownload,
            &url,
            &archive_path,
            None,
        )
        .await?;

        let written = ArchiveExtractor::extract_file_async(
            archive_path,
            ArchiveKind::Zip,
            self.working_dir.clone(),
            ExtractOptions::strip_leading(),
        )
        .await?;
        log::debug!("Extracted {} project files", written.len());

        emit(self.sink.as_ref(), TaskLog::complete(TaskName::ProjectDownload));
        Ok(())
    }

    /// Run `uv sync` in the working directory.
    pub async fn sync(&self) -> Result<()> {
        emit(self.sink.as_ref(), TaskLog::ongoing(TaskName::ProjectSync, Progress::Unknown));
        self.runner.run(&["sync"]).await?;
        emit(self.sink.as_ref(), TaskLog::complete(TaskName::ProjectSync));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_url() {
        assert_eq!(
            ProjectFetcher::snapshot_url("https://github.com/acme/models", "main"),
            "https://github.com/acme/models/archive/refs/heads/main.zip"
        );
        assert_eq!(
            ProjectFetcher::snapshot_url("https://github.com/acme/models/", "feature/x"),
            "https://github.com/acme/models/archive/refs/heads/feature/x.zip"
        );
    }
}
