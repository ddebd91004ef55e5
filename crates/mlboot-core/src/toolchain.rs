//! Installs the `uv` binary into the working directory.

use std::path::PathBuf;
use std::sync::Arc;

use crate::archive::{ArchiveExtractor, ExtractOptions};
use crate::error::{BootstrapError, ExtractError, Result};
use crate::event::{emit, EventSink, TaskLog, TaskName};
use crate::http::{download_reporting, HttpClient};
use crate::platform::{Arch, PlatformProfile};

pub struct ToolchainInstaller {
    http: Arc<HttpClient>,
    sink: Arc<dyn EventSink>,
    profile: PlatformProfile,
    release_base: String,
    working_dir: PathBuf,
}

impl ToolchainInstaller {
    pub fn new(
        http: Arc<HttpClient>,
        sink: Arc<dyn EventSink>,
        profile: PlatformProfile,
        release_base: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http,
            sink,
            profile,
            release_base: release_base.into(),
            working_dir: working_dir.into(),
        }
    }

    /// Where the binary ends up.
    pub fn binary_path(&self) -> PathBuf {
        self.working_dir.join(self.profile.binary_file_name())
    }

    pub fn is_installed(&self) -> bool {
        self.binary_path().is_file()
    }

    /// Download the release archive for `arch` (host architecture when
    /// `None`) and `version` (latest when `None`), and unpack only the binary.
    pub async fn install(&self, arch: Option<&str>, version: Option<&str>) -> Result<PathBuf> {
        let arch = Arch::resolve(arch)?;
        let url = self.profile.toolchain_url(&self.release_base, arch, version);
        log::info!("Installing {} from {}", self.profile.binary_file_name(), url);

        emit(self.sink.as_ref(), TaskLog::scheduled(TaskName::ToolchainDownload));

        let staging = tempfile::Builder::new()
            .prefix("mlboot-uv")
            .tempdir()
            .map_err(|e| BootstrapError::io(std::env::temp_dir(), e))?;
        let archive_path = staging
            .path()
            .join(format!("uv.{}", self.profile.archive_kind.extension()));

        download_reporting(
            &self.http,
            self.sink.as_ref(),
            TaskName::ToolchainDownload,
            &url,
            &archive_path,
            None,
        )
        .await?;

        let binary = self.profile.binary_file_name();
        let options = ExtractOptions::flatten()
            .only([binary.clone()])
            .with_executable(self.profile.binary_name);

        let written = ArchiveExtractor::extract_file_async(
            archive_path,
            self.profile.archive_kind,
            self.working_dir.clone(),
            options,
        )
        .await?;

        if !written.iter().any(|p| p.as_os_str() == binary.as_str()) {
            return Err(ExtractError::Corrupt(format!("{} not found in {}", binary, url)).into());
        }

        emit(self.sink.as_ref(), TaskLog::complete(TaskName::ToolchainDownload));
        Ok(self.binary_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MemorySink;
    use std::path::Path;
    use crate::platform::Platform;

    fn installer(working_dir: &Path, base: &str) -> ToolchainInstaller {
        ToolchainInstaller::new(
            Arc::new(HttpClient::new().unwrap()),
            Arc::new(MemorySink::new()),
            Platform::Linux.profile(),
            base,
            working_dir,
        )
    }

    #[test]
    fn test_binary_path() {
        let installer = installer(Path::new("/work"), "https://example.invalid");
        assert_eq!(installer.binary_path(), Path::new("/work/uv"));
    }

    #[test]
    fn test_is_installed() {
        let temp = tempfile::TempDir::new().unwrap();
        let installer = installer(temp.path(), "https://example.invalid");
        assert!(!installer.is_installed());

        std::fs::write(temp.path().join("uv"), b"bin").unwrap();
        assert!(installer.is_installed());
    }

    #[tokio::test]
    async fn test_unsupported_arch_fails_before_network() {
        let temp = tempfile::TempDir::new().unwrap();
        let installer = installer(temp.path(), "http://127.0.0.1:9");

        let err = installer.install(Some("mips"), None).await.unwrap_err();
        assert!(matches!(err, BootstrapError::UnsupportedPlatform(_)));
    }
}
