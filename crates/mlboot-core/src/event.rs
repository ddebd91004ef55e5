//! Progress and outcome events.
//!
//! The engine only ever constructs [`LogEvent`] values and hands them to an
//! [`EventSink`]. How they are rendered (JSON lines, progress bars, ...) is up
//! to the sink.

use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// The unit of work an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskName {
    #[serde(rename = "DOWNLOAD_UV")]
    ToolchainDownload,
    #[serde(rename = "DOWNLOAD_PROJECT")]
    ProjectDownload,
    #[serde(rename = "UV_SYNC")]
    ProjectSync,
    #[serde(rename = "GETTING_MODEL_URLS")]
    AssetListing,
    #[serde(rename = "DOWNLOAD_MODEL_FILE")]
    AssetDownload,
    #[serde(rename = "PREPARE_MODELS")]
    AssetPreprocess,
}

impl TaskName {
    /// Short human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            TaskName::ToolchainDownload => "Downloading uv",
            TaskName::ProjectDownload => "Downloading project",
            TaskName::ProjectSync => "Syncing project environment",
            TaskName::AssetListing => "Listing model assets",
            TaskName::AssetDownload => "Downloading model files",
            TaskName::AssetPreprocess => "Preparing models",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Scheduled,
    Ongoing,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

/// Transfer progress: a fraction in `[0.0, 1.0]`, or unknown when the server
/// did not announce a length.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Option<f32>", into = "Option<f32>")]
pub enum Progress {
    Known(f32),
    #[default]
    Unknown,
}

impl Progress {
    pub fn from_bytes(transferred: u64, total: Option<u64>) -> Self {
        match total {
            Some(total) if total > 0 => {
                let fraction = transferred as f64 / total as f64;
                Progress::Known(fraction.clamp(0.0, 1.0) as f32)
            }
            _ => Progress::Unknown,
        }
    }

    pub fn fraction(&self) -> Option<f32> {
        match self {
            Progress::Known(f) => Some(*f),
            Progress::Unknown => None,
        }
    }
}

impl From<Option<f32>> for Progress {
    fn from(value: Option<f32>) -> Self {
        match value {
            Some(f) => Progress::Known(f.clamp(0.0, 1.0)),
            None => Progress::Unknown,
        }
    }
}

impl From<Progress> for Option<f32> {
    fn from(value: Progress) -> Self {
        value.fraction()
    }
}

/// Status change of one task, optionally scoped to a single file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLog {
    pub task: TaskName,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl TaskLog {
    fn new(task: TaskName, status: TaskStatus) -> Self {
        Self {
            task,
            status,
            progress: Progress::Unknown,
            file: None,
            reason: None,
        }
    }

    pub fn scheduled(task: TaskName) -> Self {
        Self::new(task, TaskStatus::Scheduled)
    }

    pub fn ongoing(task: TaskName, progress: Progress) -> Self {
        Self {
            progress,
            ..Self::new(task, TaskStatus::Ongoing)
        }
    }

    pub fn complete(task: TaskName) -> Self {
        Self::new(task, TaskStatus::Complete)
    }

    pub fn failed(task: TaskName, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(task, TaskStatus::Failed)
        }
    }

    pub fn with_file(mut self, file: &Path) -> Self {
        self.file = Some(file.display().to_string());
        self
    }
}

/// Summary of the assets resolved by the listing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub urls: Vec<String>,
    pub save_to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LogEvent {
    #[serde(rename = "TaskLog")]
    Task(TaskLog),
    #[serde(rename = "ModelInfoLog")]
    AssetInfo(AssetInfo),
}

impl From<TaskLog> for LogEvent {
    fn from(log: TaskLog) -> Self {
        LogEvent::Task(log)
    }
}

impl From<AssetInfo> for LogEvent {
    fn from(info: AssetInfo) -> Self {
        LogEvent::AssetInfo(info)
    }
}

/// Receives every event the engine emits.
///
/// Download tasks run concurrently, so implementations are called from
/// several tasks at once and must key per-file state by `file`, not by
/// arrival order.
pub trait EventSink: Send + Sync {
    fn log(&self, event: &LogEvent);
}

impl<F> EventSink for F
where
    F: Fn(&LogEvent) + Send + Sync,
{
    fn log(&self, event: &LogEvent) {
        self(event)
    }
}

/// Convenience for emitting a [`TaskLog`] into any sink.
pub(crate) fn emit(sink: &dyn EventSink, log: TaskLog) {
    sink.log(&LogEvent::Task(log));
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// All task events, in emission order.
    pub fn task_logs(&self) -> Vec<TaskLog> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                LogEvent::Task(log) => Some(log),
                LogEvent::AssetInfo(_) => None,
            })
            .collect()
    }

    /// Task events for a single task name.
    pub fn logs_for(&self, task: TaskName) -> Vec<TaskLog> {
        self.task_logs().into_iter().filter(|l| l.task == task).collect()
    }
}

impl EventSink for MemorySink {
    fn log(&self, event: &LogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_from_bytes() {
        assert_eq!(Progress::from_bytes(250, Some(1000)), Progress::Known(0.25));
        assert_eq!(Progress::from_bytes(1000, Some(1000)), Progress::Known(1.0));
        assert_eq!(Progress::from_bytes(10, None), Progress::Unknown);
        assert_eq!(Progress::from_bytes(10, Some(0)), Progress::Unknown);
    }

    #[test]
    fn test_progress_never_exceeds_one() {
        assert_eq!(Progress::from_bytes(2000, Some(1000)), Progress::Known(1.0));
    }

    #[test]
    fn test_task_log_json_shape() {
        let event = LogEvent::from(TaskLog::ongoing(
            TaskName::ToolchainDownload,
            Progress::Known(0.5),
        ));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "TaskLog");
        assert_eq!(json["task"], "DOWNLOAD_UV");
        assert_eq!(json["status"], "ONGOING");
        assert_eq!(json["progress"], 0.5);
        assert!(json["file"].is_null());
    }

    #[test]
    fn test_unknown_progress_serializes_as_null() {
        let event = LogEvent::from(
            TaskLog::ongoing(TaskName::AssetDownload, Progress::Unknown)
                .with_file(Path::new("models/a.bin")),
        );
        let json = serde_json::to_value(&event).unwrap();

        assert!(json["progress"].is_null());
        assert_eq!(json["file"], "models/a.bin");
        assert_eq!(json["task"], "DOWNLOAD_MODEL_FILE");
    }

    #[test]
    fn test_asset_info_json_shape() {
        let event = LogEvent::from(AssetInfo {
            urls: vec!["https://example.com/a.bin".to_string()],
            save_to: "models/ner".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "ModelInfoLog");
        assert_eq!(json["save_to"], "models/ner");
        assert_eq!(json["urls"][0], "https://example.com/a.bin");
    }

    #[test]
    fn test_event_roundtrip_from_wire() {
        let line = r#"{"type":"TaskLog","task":"UV_SYNC","status":"FAILED","progress":null,"file":null,"reason":"boom"}"#;
        let event: LogEvent = serde_json::from_str(line).unwrap();

        assert_eq!(
            event,
            LogEvent::Task(TaskLog::failed(TaskName::ProjectSync, "boom"))
        );
    }

    #[test]
    fn test_closure_sink() {
        let count = std::sync::atomic::AtomicUsize::new(0);
        let sink = |_: &LogEvent| {
            count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        };
        sink.log(&TaskLog::complete(TaskName::AssetListing).into());
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
