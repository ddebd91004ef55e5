mod output;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use mlboot_core::{Bootstrap, BootstrapConfig, ConfigLoader, EventSink, Platform};

use output::JsonLineSink;
use progress::HumanSink;

#[derive(Parser, Debug)]
#[command(name = "mlboot")]
#[command(version, about = "Bootstrap the uv toolchain, project and model assets")]
struct Args {
    /// How progress events are written
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    /// Target platform (detected from the host by default)
    #[arg(long)]
    platform: Option<String>,

    /// Target architecture: x86_64 or aarch64 (detected by default)
    #[arg(long)]
    arch: Option<String>,

    /// uv release tag to install instead of the latest
    #[arg(long = "uv-version", value_name = "TAG")]
    uv_version: Option<String>,

    /// Project repository URL
    #[arg(long, value_name = "URL")]
    repository: Option<String>,

    /// Project branch
    #[arg(long)]
    branch: Option<String>,

    /// Maximum number of concurrent asset downloads
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Working directory (defaults to the current directory)
    #[arg(short = 'C', long = "working-dir", value_name = "DIR")]
    working_dir: Option<PathBuf>,

    /// Increase diagnostic log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// One JSON object per line on stdout
    Json,
    /// Progress bars and styled status lines
    Human,
}

impl Args {
    /// Flags take precedence over the file and environment layers.
    fn apply(&self, config: &mut BootstrapConfig) {
        if let Some(arch) = &self.arch {
            config.toolchain.arch = Some(arch.clone());
        }
        if let Some(version) = &self.uv_version {
            config.toolchain.version = Some(version.clone());
        }
        if let Some(repository) = &self.repository {
            config.project.repository_url = repository.clone();
        }
        if let Some(branch) = &self.branch {
            config.project.branch = branch.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.assets.max_concurrency = concurrency;
        }
    }

    fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

fn init_logging(level: log::LevelFilter) {
    // RUST_LOG, when set, wins over -v.
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .try_init();
}

fn load_config(args: &Args) -> Result<BootstrapConfig> {
    let working_dir = match &args.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to determine the current directory")?,
    };
    std::fs::create_dir_all(&working_dir)
        .with_context(|| format!("Failed to create working directory {}", working_dir.display()))?;
    let working_dir = std::path::absolute(&working_dir)
        .with_context(|| format!("Failed to resolve working directory {}", working_dir.display()))?;

    let mut config = BootstrapConfig::load(&working_dir, &ConfigLoader::new(true))
        .context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    let platform = match &args.platform {
        Some(name) => name.parse::<Platform>()?,
        None => Platform::detect()?,
    };
    // Fail on an unsupported architecture before anything is downloaded.
    mlboot_core::Arch::resolve(config.toolchain.arch.as_deref())?;

    let sink: Arc<dyn EventSink> = match args.log_format {
        LogFormat::Json => Arc::new(JsonLineSink::stdout()),
        LogFormat::Human => Arc::new(HumanSink::new()),
    };

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| anyhow::anyhow!("Failed to create async runtime: {}", e))?;

    let mut bootstrap = Bootstrap::new(config, platform.profile(), sink)?;
    runtime.block_on(bootstrap.run())?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level());

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            for cause in e.chain().skip(1) {
                eprintln!("  Caused by: {}", cause);
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["mlboot"]);

        assert_eq!(args.log_format, LogFormat::Json);
        assert_eq!(args.verbose, 0);
        assert_eq!(args.log_level(), log::LevelFilter::Warn);
        assert!(args.working_dir.is_none());
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "mlboot",
            "--log-format",
            "human",
            "--arch",
            "aarch64",
            "--uv-version",
            "0.4.0",
            "--repository",
            "https://github.com/acme/models",
            "--branch",
            "dev",
            "--concurrency",
            "2",
            "-C",
            "/srv/app",
            "-vv",
        ]);
        let mut config = BootstrapConfig::default();
        config.project.branch = "from-file".to_string();
        args.apply(&mut config);

        assert_eq!(args.log_format, LogFormat::Human);
        assert_eq!(args.log_level(), log::LevelFilter::Debug);
        assert_eq!(args.working_dir, Some(PathBuf::from("/srv/app")));
        assert_eq!(config.toolchain.arch.as_deref(), Some("aarch64"));
        assert_eq!(config.toolchain.version.as_deref(), Some("0.4.0"));
        assert_eq!(config.project.repository_url, "https://github.com/acme/models");
        assert_eq!(config.project.branch, "dev");
        assert_eq!(config.assets.max_concurrency, 2);
    }

    #[test]
    fn test_unset_flags_keep_config() {
        let args = Args::parse_from(["mlboot"]);
        let mut config = BootstrapConfig::default();
        config.project.branch = "from-file".to_string();
        config.assets.max_concurrency = 8;
        args.apply(&mut config);

        assert_eq!(config.project.branch, "from-file");
        assert_eq!(config.assets.max_concurrency, 8);
    }

    #[test]
    fn test_load_config_from_working_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("mlboot.toml"),
            "[assets]\nmax-concurrency = 3\n",
        )
        .unwrap();
        let args = Args::parse_from(["mlboot", "-C", temp.path().to_str().unwrap()]);

        let config = load_config(&args).unwrap();

        assert_eq!(config.working_dir, temp.path());
        assert_eq!(config.assets.max_concurrency, 3);
    }

    #[test]
    fn test_relative_working_dir_is_resolved() {
        let temp = tempfile::TempDir::new_in(".").unwrap();
        let relative = temp.path().file_name().unwrap().to_str().unwrap().to_string();
        let args = Args::parse_from(["mlboot", "-C", relative.as_str()]);

        let config = load_config(&args).unwrap();

        assert!(config.working_dir.is_absolute());
        assert_eq!(config.working_dir, std::env::current_dir().unwrap().join(&relative));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let args = Args::parse_from([
            "mlboot",
            "-C",
            temp.path().to_str().unwrap(),
            "--concurrency",
            "0",
        ]);

        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
