//! Sequences the bootstrap stages.
//!
//! A run walks `Start → ToolchainReady → ProjectReady → AssetsListed →
//! AssetsDownloaded → Preprocessed → Done` once. Installation steps whose
//! result is already on disk are skipped; the first failing stage stops the
//! run.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::assets::{asset_info, parse_listing, AssetDownloadManager, AssetGroup, DownloadSummary};
use crate::config::BootstrapConfig;
use crate::error::{BootstrapError, Result};
use crate::event::{emit, EventSink, LogEvent, Progress, TaskLog, TaskName};
use crate::http::HttpClient;
use crate::platform::PlatformProfile;
use crate::process::{StepRunner, ToolchainRunner};
use crate::project::ProjectFetcher;
use crate::toolchain::ToolchainInstaller;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Start,
    ToolchainReady,
    ProjectReady,
    AssetsListed,
    AssetsDownloaded,
    Preprocessed,
    Done,
}

impl Stage {
    /// The task whose success reaches this stage.
    pub fn task(&self) -> Option<TaskName> {
        match self {
            Stage::Start | Stage::Done => None,
            Stage::ToolchainReady => Some(TaskName::ToolchainDownload),
            Stage::ProjectReady => Some(TaskName::ProjectDownload),
            Stage::AssetsListed => Some(TaskName::AssetListing),
            Stage::AssetsDownloaded => Some(TaskName::AssetDownload),
            Stage::Preprocessed => Some(TaskName::AssetPreprocess),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::ToolchainReady => "toolchain ready",
            Stage::ProjectReady => "project ready",
            Stage::AssetsListed => "assets listed",
            Stage::AssetsDownloaded => "assets downloaded",
            Stage::Preprocessed => "models prepared",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// A stage that could not be reached.
#[derive(Error, Debug)]
#[error("bootstrap stopped before `{stage}`: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: BootstrapError,
}

pub struct Bootstrap {
    config: BootstrapConfig,
    profile: PlatformProfile,
    http: Arc<HttpClient>,
    sink: Arc<dyn EventSink>,
    runner: Arc<dyn StepRunner>,
    stage: Stage,
}

impl Bootstrap {
    pub fn new(config: BootstrapConfig, profile: PlatformProfile, sink: Arc<dyn EventSink>) -> Result<Self> {
        let http = Arc::new(HttpClient::with_config(config.http.client_config())?);
        let runner: Arc<dyn StepRunner> = Arc::new(ToolchainRunner::new(&config.working_dir, &profile));

        Ok(Self {
            config,
            profile,
            http,
            sink,
            runner,
            stage: Stage::Start,
        })
    }

    /// Replace the subprocess runner (`uv sync`, `uv run ...`).
    pub fn with_runner(mut self, runner: Arc<dyn StepRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Last stage reached.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub async fn run(&mut self) -> std::result::Result<(), StageError> {
        log::info!(
            "Bootstrapping {} on {}",
            self.config.working_dir.display(),
            self.profile.platform
        );

        let result = self.ensure_toolchain().await;
        self.check(Stage::ToolchainReady, TaskName::ToolchainDownload, result)?;
        self.reach(Stage::ToolchainReady);

        // Download and sync are reported as separate tasks of the same stage.
        let result = self.ensure_project().await;
        let fetched = self.check(Stage::ProjectReady, TaskName::ProjectDownload, result)?;
        if fetched {
            let result = self.project_fetcher().sync().await;
            self.check(Stage::ProjectReady, TaskName::ProjectSync, result)?;
        }
        self.reach(Stage::ProjectReady);

        let result = self.list_assets().await;
        let groups = self.check(Stage::AssetsListed, TaskName::AssetListing, result)?;
        self.reach(Stage::AssetsListed);

        let result = self.download_assets(&groups).await;
        let summary = self.check(Stage::AssetsDownloaded, TaskName::AssetDownload, result)?;
        log::info!("Downloaded {} asset files", summary.files.len());
        self.reach(Stage::AssetsDownloaded);

        let result = self.preprocess().await;
        self.check(Stage::Preprocessed, TaskName::AssetPreprocess, result)?;
        self.reach(Stage::Preprocessed);

        self.reach(Stage::Done);
        log::info!("Bootstrap finished");
        Ok(())
    }

    fn reach(&mut self, stage: Stage) {
        log::debug!("Reached stage `{}`", stage);
        self.stage = stage;
    }

    /// Report a failed step as `Failed` for `task` and wrap it for `stage`.
    fn check<T>(&self, stage: Stage, task: TaskName, result: Result<T>) -> std::result::Result<T, StageError> {
        result.map_err(|source| {
            // The download manager reports its own aggregate failure.
            if !matches!(source, BootstrapError::AggregateDownload { .. }) {
                emit(self.sink.as_ref(), TaskLog::failed(task, source.to_string()));
            }
            log::error!("Stage `{}` failed: {}", stage, source);
            StageError { stage, source }
        })
    }

    async fn ensure_toolchain(&self) -> Result<()> {
        let installer = ToolchainInstaller::new(
            self.http.clone(),
            self.sink.clone(),
            self.profile.clone(),
            self.config.toolchain.release_base_url.clone(),
            self.config.working_dir.clone(),
        );

        if installer.is_installed() {
            log::info!("{} already present, skipping download", installer.binary_path().display());
            emit(self.sink.as_ref(), TaskLog::complete(TaskName::ToolchainDownload));
            return Ok(());
        }

        installer
            .install(
                self.config.toolchain.arch.as_deref(),
                self.config.toolchain.version.as_deref(),
            )
            .await?;
        Ok(())
    }

    fn project_fetcher(&self) -> ProjectFetcher {
        ProjectFetcher::new(
            self.http.clone(),
            self.sink.clone(),
            self.runner.clone(),
            self.config.working_dir.clone(),
        )
    }

    /// Returns whether a fresh snapshot was unpacked.
    async fn ensure_project(&self) -> Result<bool> {
        let marker = self.config.working_dir.join(&self.config.project.marker_file);
        if marker.exists() {
            log::info!("{} already present, skipping project download", marker.display());
            emit(self.sink.as_ref(), TaskLog::complete(TaskName::ProjectDownload));
            return Ok(false);
        }

        self.project_fetcher()
            .download(&self.config.project.repository_url, &self.config.project.branch)
            .await?;
        Ok(true)
    }

    async fn list_assets(&self) -> Result<Vec<AssetGroup>> {
        emit(self.sink.as_ref(), TaskLog::ongoing(TaskName::AssetListing, Progress::Unknown));

        let stdout = self
            .runner
            .capture(&["run", self.config.assets.listing_script.as_str()])
            .await?;
        let groups = parse_listing(&stdout)?;
        log::debug!("Listing resolved {} asset groups", groups.len());

        self.sink.log(&LogEvent::AssetInfo(asset_info(&groups)));
        emit(self.sink.as_ref(), TaskLog::complete(TaskName::AssetListing));
        Ok(groups)
    }

    async fn download_assets(&self, groups: &[AssetGroup]) -> Result<DownloadSummary> {
        AssetDownloadManager::new(
            self.http.clone(),
            self.sink.clone(),
            self.config.working_dir.clone(),
            self.config.assets.max_concurrency,
        )
        .download_all(groups)
        .await
    }

    async fn preprocess(&self) -> Result<()> {
        emit(self.sink.as_ref(), TaskLog::ongoing(TaskName::AssetPreprocess, Progress::Unknown));
        self.runner
            .run(&["run", self.config.assets.preprocess_script.as_str()])
            .await?;
        emit(self.sink.as_ref(), TaskLog::complete(TaskName::AssetPreprocess));
        Ok(())
    }
}
