//! Host platform selection.
//!
//! Everything that differs between Windows and Linux hosts is captured once
//! in a [`PlatformProfile`] and passed around as plain data.

use std::fmt;
use std::str::FromStr;

use crate::archive::ArchiveKind;
use crate::error::{BootstrapError, Result};

/// Name of the toolchain binary, without platform suffix.
pub const TOOLCHAIN_BINARY: &str = "uv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
}

impl Platform {
    /// Platform of the running process.
    pub fn detect() -> Result<Self> {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Result<Self> {
        let os = os.to_lowercase();
        if os.contains("windows") {
            Ok(Platform::Windows)
        } else if os.contains("linux") {
            Ok(Platform::Linux)
        } else {
            Err(BootstrapError::UnsupportedPlatform(format!("operating system `{}`", os)))
        }
    }

    pub fn profile(self) -> PlatformProfile {
        match self {
            Platform::Windows => PlatformProfile {
                platform: self,
                archive_kind: ArchiveKind::Zip,
                binary_name: TOOLCHAIN_BINARY,
                executable_suffix: ".exe",
                target_triple_suffix: "pc-windows-msvc",
            },
            Platform::Linux => PlatformProfile {
                platform: self,
                archive_kind: ArchiveKind::TarGz,
                binary_name: TOOLCHAIN_BINARY,
                executable_suffix: "",
                target_triple_suffix: "unknown-linux-gnu",
            },
        }
    }
}

impl FromStr for Platform {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "windows" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            other => Err(BootstrapError::UnsupportedPlatform(format!("platform `{}`", other))),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Windows => write!(f, "Windows"),
            Platform::Linux => write!(f, "Linux"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    /// Architecture the running binary was built for.
    pub fn detect() -> Result<Self> {
        std::env::consts::ARCH.parse()
    }

    /// Explicit override if given, detection otherwise.
    pub fn resolve(requested: Option<&str>) -> Result<Self> {
        match requested {
            Some(arch) => arch.parse(),
            None => Self::detect(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }
}

impl FromStr for Arch {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Arch::X86_64),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            other => Err(BootstrapError::UnsupportedPlatform(format!("architecture `{}`", other))),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-platform capabilities: archive format, executable naming, and the
/// release asset triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformProfile {
    pub platform: Platform,
    pub archive_kind: ArchiveKind,
    pub binary_name: &'static str,
    pub executable_suffix: &'static str,
    pub target_triple_suffix: &'static str,
}

impl PlatformProfile {
    /// File name of the toolchain binary on disk (`uv` or `uv.exe`).
    pub fn binary_file_name(&self) -> String {
        format!("{}{}", self.binary_name, self.executable_suffix)
    }

    /// Release asset name, e.g. `uv-x86_64-unknown-linux-gnu.tar.gz`.
    pub fn toolchain_asset_name(&self, arch: Arch) -> String {
        format!(
            "{}-{}-{}.{}",
            self.binary_name,
            arch,
            self.target_triple_suffix,
            self.archive_kind.extension()
        )
    }

    /// Download URL of the toolchain release archive.
    ///
    /// `latest` resolves through GitHub's `releases/latest/download` redirect;
    /// a pinned version uses `releases/download/<version>`.
    pub fn toolchain_url(&self, release_base: &str, arch: Arch, version: Option<&str>) -> String {
        let base = release_base.trim_end_matches('/');
        let asset = self.toolchain_asset_name(arch);
        match version {
            Some(version) if version != "latest" => {
                format!("{}/download/{}/{}", base, version, asset)
            }
            _ => format!("{}/latest/download/{}", base, asset),
        }
    }
}
