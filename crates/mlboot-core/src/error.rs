use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while unpacking an archive.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Corrupt archive: {0}")]
    Corrupt(String),

    /// An entry would land outside the extraction root.
    #[error("Unsafe archive entry: {entry} escapes the destination directory")]
    Unsafe { entry: String },

    #[error("IO error writing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExtractError::Io { path: path.into(), source }
    }
}

/// A single asset that could not be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDownload {
    pub url: String,
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for FailedDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path.display(), self.reason)
    }
}

#[derive(Error, Debug)]
pub enum BootstrapError {
    // Network errors
    #[error("HTTP {status} for {url}: {body}")]
    Http { status: u16, url: String, body: String },

    #[error("Timed out waiting for {url}")]
    Timeout { url: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // IO errors
    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Extract(#[from] ExtractError),

    // Subprocess errors
    #[error("`{command}` exited with {}", describe_exit(.code))]
    Subprocess { command: String, code: Option<i32> },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Malformed asset listing on line {line_number}: {reason} ({line})")]
    MalformedListing {
        line_number: usize,
        line: String,
        reason: String,
    },

    #[error("{} asset download(s) failed: {}", .failed.len(), describe_failures(.failed))]
    AggregateDownload { failed: Vec<FailedDownload> },

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BootstrapError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BootstrapError::Io { path: path.into(), source }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no exit status (terminated by signal)".to_string(),
    }
}

fn describe_failures(failed: &[FailedDownload]) -> String {
    failed
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, BootstrapError>;
