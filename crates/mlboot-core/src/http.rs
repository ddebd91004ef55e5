//! HTTP client used for every download.
//!
//! A thin wrapper around `reqwest`:
//! - one shared client per process (pass it around in an `Arc`)
//! - streamed response bodies with byte-level progress callbacks
//! - configurable connect and read-idle timeouts
//! - no retries: a failed fetch is returned to the caller as is
//!
//! # Examples
//!
//! ```no_run
//! use mlboot_core::http::{HttpClient, HttpClientConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> mlboot_core::Result<()> {
//! let config = HttpClientConfig::new().with_read_timeout(Duration::from_secs(120));
//! let client = HttpClient::with_config(config)?;
//!
//! client.download_to(
//!     "https://example.com/model.bin",
//!     "/tmp/model.bin".as_ref(),
//!     |downloaded, total| println!("{} of {:?} bytes", downloaded, total),
//! ).await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{BootstrapError, Result};
use crate::event::{emit, EventSink, Progress, TaskLog, TaskName};

const DEFAULT_USER_AGENT: &str = concat!("mlboot/", env!("CARGO_PKG_VERSION"));
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpClient {
    client: Client,
    read_timeout: Duration,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            client,
            read_timeout: config.read_timeout,
        })
    }

    /// Issue a GET and return the body as a stream.
    ///
    /// A non-success status is turned into [`BootstrapError::Http`] carrying
    /// the response body text.
    pub async fn fetch(&self, url: &str) -> Result<ByteStream> {
        log::debug!("GET {}", url);

        let response = tokio::time::timeout(self.read_timeout, self.client.get(url).send())
            .await
            .map_err(|_| BootstrapError::Timeout { url: url.to_string() })?
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BootstrapError::Http {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        let content_length = response.content_length().filter(|len| *len > 0);
        Ok(ByteStream {
            url: url.to_string(),
            content_length,
            idle_timeout: self.read_timeout,
            inner: response.bytes_stream().boxed(),
        })
    }

    /// Stream `url` into `dest`, calling `on_progress(downloaded, total)` after
    /// every chunk. `total` is `None` when the server sent no length.
    ///
    /// Returns the number of bytes written.
    pub async fn download_to<F>(&self, url: &str, dest: &Path, mut on_progress: F) -> Result<u64>
    where
        F: FnMut(u64, Option<u64>),
    {
        let mut stream = self.fetch(url).await?;
        let total = stream.content_length();

        let mut file = File::create(dest)
            .await
            .map_err(|e| BootstrapError::io(dest, e))?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next_chunk().await? {
            file.write_all(&chunk)
                .await
                .map_err(|e| BootstrapError::io(dest, e))?;
            downloaded += chunk.len() as u64;
            on_progress(downloaded, total);
        }

        file.flush().await.map_err(|e| BootstrapError::io(dest, e))?;

        Ok(downloaded)
    }
}

fn request_error(url: &str, error: reqwest::Error) -> BootstrapError {
    if error.is_timeout() {
        BootstrapError::Timeout { url: url.to_string() }
    } else {
        BootstrapError::Network(error)
    }
}

/// Response body of a successful fetch.
pub struct ByteStream {
    url: String,
    content_length: Option<u64>,
    idle_timeout: Duration,
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
}

impl ByteStream {
    /// Announced body length; `None` when absent or zero.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Next body chunk, or `None` at the end of the body. Fails with
    /// [`BootstrapError::Timeout`] if no data arrives within the read timeout.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match tokio::time::timeout(self.idle_timeout, self.inner.next()).await {
            Err(_) => Err(BootstrapError::Timeout { url: self.url.clone() }),
            Ok(None) => Ok(None),
            Ok(Some(chunk)) => chunk.map(Some).map_err(|e| request_error(&self.url, e)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    /// Upper bound for waiting on response headers and between body chunks.
    pub read_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Decides which byte-count updates become `Ongoing` events.
///
/// With a known total, an update is reported only when the integer
/// percentage advances. With an unknown total every update is reported.
#[derive(Debug, Default)]
pub struct ProgressThrottle {
    last_percent: Option<u64>,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, transferred: u64, total: Option<u64>) -> Option<Progress> {
        match total {
            Some(total) if total > 0 => {
                let percent = transferred.min(total).saturating_mul(100) / total;
                if self.last_percent.is_some_and(|last| percent <= last) {
                    return None;
                }
                self.last_percent = Some(percent);
                Some(Progress::from_bytes(transferred, Some(total)))
            }
            _ => Some(Progress::Unknown),
        }
    }
}

/// Download `url` to `dest`, reporting throttled `Ongoing` events for `task`.
pub(crate) async fn download_reporting(
    http: &HttpClient,
    sink: &dyn EventSink,
    task: TaskName,
    url: &str,
    dest: &Path,
    file: Option<&Path>,
) -> Result<u64> {
    let mut throttle = ProgressThrottle::new();
    http.download_to(url, dest, |downloaded, total| {
        if let Some(progress) = throttle.update(downloaded, total) {
            let log = TaskLog::ongoing(task, progress);
            emit(sink, match file {
                Some(file) => log.with_file(file),
                None => log,
            });
        }
    })
    .await
}
