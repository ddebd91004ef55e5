//! Bootstrap engine for a uv-managed ML project.
//!
//! Installs the `uv` toolchain, fetches and syncs the project, downloads the
//! model assets it lists and runs the preprocessing step, reporting progress
//! through an [`EventSink`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use mlboot_core::{Bootstrap, BootstrapConfig, ConfigLoader, LogEvent, Platform};
//!
//! # async fn run() -> mlboot_core::Result<()> {
//! let config = BootstrapConfig::load(std::path::Path::new("."), &ConfigLoader::new(true))?;
//! let sink = Arc::new(|event: &LogEvent| println!("{:?}", event));
//! let mut bootstrap = Bootstrap::new(config, Platform::detect()?.profile(), sink)?;
//! if let Err(e) = bootstrap.run().await {
//!     eprintln!("{}", e);
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod assets;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod event;
pub mod http;
pub mod platform;
pub mod process;
pub mod project;
pub mod toolchain;

pub use archive::{ArchiveExtractor, ArchiveKind, ExtractOptions};
pub use assets::{parse_listing, AssetDownloadManager, AssetGroup, DownloadSummary, DownloadTask};
pub use bootstrap::{Bootstrap, Stage, StageError};
pub use config::{BootstrapConfig, ConfigLoader, CONFIG_FILE_NAME};
pub use error::{BootstrapError, ExtractError, FailedDownload, Result};
pub use event::{AssetInfo, EventSink, LogEvent, MemorySink, Progress, TaskLog, TaskName, TaskStatus};
pub use http::{HttpClient, HttpClientConfig, ProgressThrottle};
pub use platform::{Arch, Platform, PlatformProfile};
pub use process::{StepRunner, ToolchainRunner};
pub use project::ProjectFetcher;
pub use toolchain::ToolchainInstaller;
