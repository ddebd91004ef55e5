//! Bootstrap configuration.
//!
//! Values are layered, lowest priority first: built-in defaults, an optional
//! `mlboot.toml` in the working directory, then `MLBOOT_*` environment
//! variables. Command-line flags are applied on top by the caller.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BootstrapError, Result};
use crate::http::HttpClientConfig;

pub const CONFIG_FILE_NAME: &str = "mlboot.toml";

const DEFAULT_RELEASE_BASE: &str = "https://github.com/astral-sh/uv/releases";
const DEFAULT_REPOSITORY: &str = "https://github.com/Shieru-ktc/NER-can-use-NPU-Test";
const DEFAULT_MAX_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BootstrapConfig {
    /// Directory the toolchain, project and relative asset paths live in.
    pub working_dir: PathBuf,
    pub toolchain: ToolchainConfig,
    pub project: ProjectConfig,
    pub assets: AssetsConfig,
    pub http: HttpConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            toolchain: ToolchainConfig::default(),
            project: ProjectConfig::default(),
            assets: AssetsConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ToolchainConfig {
    /// Base of the uv GitHub releases, without a trailing slash.
    pub release_base_url: String,
    /// Release tag to install; `None` means latest.
    pub version: Option<String>,
    /// Architecture override; detected from the host when unset.
    pub arch: Option<String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            release_base_url: DEFAULT_RELEASE_BASE.to_string(),
            version: None,
            arch: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProjectConfig {
    pub repository_url: String,
    pub branch: String,
    /// File whose presence means the project is already checked out.
    pub marker_file: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            repository_url: DEFAULT_REPOSITORY.to_string(),
            branch: "main".to_string(),
            marker_file: "pyproject.toml".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AssetsConfig {
    /// Maximum number of files transferring at once, across all groups.
    pub max_concurrency: usize,
    /// Script run through `uv run` that prints the asset listing.
    pub listing_script: String,
    /// Script run through `uv run` after all assets are downloaded.
    pub preprocess_script: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            listing_script: "src/ner_openvino/setup.py".to_string(),
            preprocess_script: "src/ner_openvino/preprocess_model.py".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let defaults = HttpClientConfig::default();
        Self {
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            read_timeout_secs: defaults.read_timeout.as_secs(),
            user_agent: None,
        }
    }
}

impl HttpConfig {
    pub fn client_config(&self) -> HttpClientConfig {
        let mut config = HttpClientConfig::new()
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_read_timeout(Duration::from_secs(self.read_timeout_secs));
        if let Some(agent) = &self.user_agent {
            config = config.with_user_agent(agent.clone());
        }
        config
    }
}

impl BootstrapConfig {
    /// Defaults rooted at `working_dir`.
    pub fn with_working_dir(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            ..Default::default()
        }
    }

    /// Load `mlboot.toml` from `working_dir` (if present) and apply
    /// environment overrides from `loader`.
    pub fn load(working_dir: &Path, loader: &ConfigLoader) -> Result<Self> {
        let path = working_dir.join(CONFIG_FILE_NAME);
        let mut config = if path.is_file() {
            let content = std::fs::read_to_string(&path).map_err(|e| BootstrapError::io(&path, e))?;
            log::debug!("Loaded configuration from {}", path.display());
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        config.working_dir = working_dir.to_path_buf();
        loader.apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BootstrapError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.assets.max_concurrency == 0 {
            return Err(BootstrapError::Config(
                "assets.max-concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reads `MLBOOT_*` overrides.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    use_environment: bool,
    vars: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new(use_environment: bool) -> Self {
        Self {
            use_environment,
            vars: None,
        }
    }

    /// Loader that reads from the given variables instead of the process
    /// environment.
    pub fn with_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            use_environment: true,
            vars: Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }

    pub fn get_env(&self, var: &str) -> Option<String> {
        if !self.use_environment {
            return None;
        }

        let value = match &self.vars {
            Some(vars) => vars.get(var).cloned(),
            None => env::var(var).ok(),
        };
        value.filter(|s| !s.is_empty())
    }

    pub fn apply(&self, config: &mut BootstrapConfig) -> Result<()> {
        if let Some(version) = self.get_env("MLBOOT_UV_VERSION") {
            config.toolchain.version = Some(version);
        }
        if let Some(arch) = self.get_env("MLBOOT_ARCH") {
            config.toolchain.arch = Some(arch);
        }
        if let Some(base) = self.get_env("MLBOOT_UV_RELEASE_BASE") {
            config.toolchain.release_base_url = base;
        }
        if let Some(repository) = self.get_env("MLBOOT_REPOSITORY") {
            config.project.repository_url = repository;
        }
        if let Some(branch) = self.get_env("MLBOOT_BRANCH") {
            config.project.branch = branch;
        }
        if let Some(value) = self.get_env("MLBOOT_MAX_CONCURRENCY") {
            config.assets.max_concurrency = value.parse().map_err(|_| {
                BootstrapError::Config(format!("MLBOOT_MAX_CONCURRENCY is not a number: {}", value))
            })?;
        }
        Ok(())
    }
}
