//! Model asset listing and bounded-concurrency downloads.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;

use crate::error::{BootstrapError, FailedDownload, Result};
use crate::event::{emit, AssetInfo, EventSink, TaskLog, TaskName};
use crate::http::{download_reporting, HttpClient};

/// One line of the asset listing: a model type, where its files go, and
/// where to fetch them from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetGroup {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "savedir")]
    pub save_dir: String,
    pub urls: Vec<String>,
}

/// Parse newline-delimited JSON listing output.
///
/// Blank lines are ignored; any other line that does not decode is an error.
pub fn parse_listing(output: &str) -> Result<Vec<AssetGroup>> {
    output
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line.trim()).map_err(|e| BootstrapError::MalformedListing {
                line_number: index + 1,
                line: line.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Summary event for a resolved listing.
pub fn asset_info(groups: &[AssetGroup]) -> AssetInfo {
    AssetInfo {
        urls: groups.iter().flat_map(|g| g.urls.iter().cloned()).collect(),
        save_to: groups
            .iter()
            .map(|g| g.save_dir.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// File name for a download: the URL's last non-empty path segment,
/// percent-decoded. Query and fragment are ignored.
pub fn file_name_from_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| BootstrapError::InvalidUrl(format!("{}: {}", url, e)))?;

    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .ok_or_else(|| BootstrapError::InvalidUrl(format!("{}: no file name in path", url)))?;

    let name = urlencoding::decode(segment)
        .map_err(|e| BootstrapError::InvalidUrl(format!("{}: {}", url, e)))?
        .into_owned();

    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(BootstrapError::InvalidUrl(format!("{}: unusable file name `{}`", url, name)));
    }
    Ok(name)
}

/// A single file to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub destination: PathBuf,
    pub group: String,
}

impl DownloadTask {
    pub fn new(url: &str, save_dir: &Path, group: &str) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            destination: save_dir.join(file_name_from_url(url)?),
            group: group.to_string(),
        })
    }
}

/// Files written by a successful [`AssetDownloadManager::download_all`], in
/// scheduling order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub files: Vec<PathBuf>,
}

pub struct AssetDownloadManager {
    http: Arc<HttpClient>,
    sink: Arc<dyn EventSink>,
    working_dir: PathBuf,
    max_concurrency: usize,
}

impl AssetDownloadManager {
    pub fn new(
        http: Arc<HttpClient>,
        sink: Arc<dyn EventSink>,
        working_dir: impl Into<PathBuf>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            http,
            sink,
            working_dir: working_dir.into(),
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Download every URL of every group.
    ///
    /// At most `max_concurrency` files transfer at once across all groups.
    /// A failing file does not stop its siblings; once every task has
    /// finished, any failures are returned together as
    /// [`BootstrapError::AggregateDownload`]. The aggregate (file-less)
    /// `Complete` event is only emitted when every file succeeded; otherwise
    /// an aggregate `Failed` is emitted instead.
    ///
    /// A URL that resolves to a destination already claimed by an earlier
    /// URL fails without being fetched, as does every URL of a group whose
    /// save directory cannot be created.
    pub async fn download_all(&self, groups: &[AssetGroup]) -> Result<DownloadSummary> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut failed: Vec<(usize, FailedDownload)> = Vec::new();
        let mut scheduled = 0usize;
        let mut destinations: HashSet<PathBuf> = HashSet::new();

        for group in groups {
            let save_dir = self.working_dir.join(&group.save_dir);
            let dir_error = tokio::fs::create_dir_all(&save_dir)
                .await
                .err()
                .map(|e| BootstrapError::io(&save_dir, e).to_string());

            for url in &group.urls {
                let index = scheduled;
                scheduled += 1;

                let task = match DownloadTask::new(url, &save_dir, &group.kind) {
                    Ok(task) => task,
                    Err(e) => {
                        failed.push((index, self.reject(url, &save_dir, e.to_string())));
                        continue;
                    }
                };

                if let Some(reason) = &dir_error {
                    failed.push((index, self.reject(url, &task.destination, reason.clone())));
                    continue;
                }
                if !destinations.insert(task.destination.clone()) {
                    let reason = format!(
                        "{} is already downloaded from another URL in the listing",
                        task.destination.display()
                    );
                    failed.push((index, self.reject(url, &task.destination, reason)));
                    continue;
                }

                emit(
                    self.sink.as_ref(),
                    TaskLog::scheduled(TaskName::AssetDownload).with_file(&task.destination),
                );

                let http = self.http.clone();
                let sink = self.sink.clone();
                let semaphore = semaphore.clone();
                tasks.spawn(async move {
                    // The semaphore is never closed, so acquisition only waits.
                    let _permit = semaphore.acquire_owned().await;
                    let result = run_task(&http, sink.as_ref(), &task).await;
                    (index, task, result)
                });
            }
        }

        let mut files: Vec<(usize, PathBuf)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, task, Ok(()))) => files.push((index, task.destination)),
                Ok((index, task, Err(e))) => failed.push((index, FailedDownload {
                    url: task.url,
                    path: task.destination,
                    reason: e.to_string(),
                })),
                Err(e) => failed.push((usize::MAX, FailedDownload {
                    url: String::new(),
                    path: PathBuf::new(),
                    reason: format!("download task aborted: {}", e),
                })),
            }
        }

        if !failed.is_empty() {
            failed.sort_by_key(|(index, _)| *index);
            log::warn!("{} of {} asset downloads failed", failed.len(), scheduled);
            emit(
                self.sink.as_ref(),
                TaskLog::failed(
                    TaskName::AssetDownload,
                    format!("{} of {} files failed", failed.len(), scheduled),
                ),
            );
            return Err(BootstrapError::AggregateDownload {
                failed: failed.into_iter().map(|(_, f)| f).collect(),
            });
        }

        files.sort_by_key(|(index, _)| *index);
        emit(self.sink.as_ref(), TaskLog::complete(TaskName::AssetDownload));

        Ok(DownloadSummary {
            files: files.into_iter().map(|(_, path)| path).collect(),
        })
    }

    /// Fail a URL that never reaches the network, emitting its own
    /// `Scheduled` and `Failed` so it is not mistaken for the aggregate.
    fn reject(&self, url: &str, file: &Path, reason: String) -> FailedDownload {
        log::warn!("Skipping {}: {}", url, reason);
        emit(
            self.sink.as_ref(),
            TaskLog::scheduled(TaskName::AssetDownload).with_file(file),
        );
        emit(
            self.sink.as_ref(),
            TaskLog::failed(TaskName::AssetDownload, reason.clone()).with_file(file),
        );
        FailedDownload {
            url: url.to_string(),
            path: file.to_path_buf(),
            reason,
        }
    }
}

/// Transfer one file, emitting its progress and exactly one terminal event.
async fn run_task(http: &HttpClient, sink: &dyn EventSink, task: &DownloadTask) -> Result<()> {
    let result = download_reporting(
        http,
        sink,
        TaskName::AssetDownload,
        &task.url,
        &task.destination,
        Some(&task.destination),
    )
    .await;

    match result {
        Ok(bytes) => {
            log::debug!("Downloaded {} ({} bytes)", task.destination.display(), bytes);
            emit(sink, TaskLog::complete(TaskName::AssetDownload).with_file(&task.destination));
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&task.destination).await;
            emit(
                sink,
                TaskLog::failed(TaskName::AssetDownload, e.to_string()).with_file(&task.destination),
            );
            Err(e)
        }
    }
}
