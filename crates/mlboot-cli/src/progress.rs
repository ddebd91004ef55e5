//! Human-readable event rendering.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use mlboot_core::{EventSink, LogEvent, Progress, TaskLog, TaskName, TaskStatus};

const BAR_LENGTH: u64 = 1000;

/// Renders stage events as status lines and transfers as progress bars.
///
/// Downloads run concurrently, so bars are looked up by task and file path
/// rather than by the order events arrive in.
pub struct HumanSink {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl HumanSink {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn key(log: &TaskLog) -> String {
        format!("{:?}:{}", log.task, log.file.as_deref().unwrap_or(""))
    }

    fn title(log: &TaskLog) -> String {
        match &log.file {
            Some(file) => Path::new(file)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.clone()),
            None => log.task.label().to_string(),
        }
    }

    fn println(&self, line: String) {
        let _ = self.multi.println(line);
    }

    fn create_bar(&self, log: &TaskLog) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(BAR_LENGTH));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(Self::title(log));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    fn create_spinner(&self, log: &TaskLog) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(Self::title(log));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    fn on_task(&self, log: &TaskLog) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        let key = Self::key(log);

        match log.status {
            TaskStatus::Scheduled => {
                if log.file.is_none() {
                    self.println(format!("{} {}", style("→").cyan(), log.task.label()));
                }
            }
            TaskStatus::Ongoing => {
                let bar = bars.entry(key).or_insert_with(|| match log.progress {
                    Progress::Known(_) => self.create_bar(log),
                    Progress::Unknown => self.create_spinner(log),
                });
                if let Progress::Known(fraction) = log.progress {
                    bar.set_position((fraction as f64 * BAR_LENGTH as f64) as u64);
                }
            }
            TaskStatus::Complete => {
                if let Some(bar) = bars.remove(&key) {
                    bar.finish_and_clear();
                }
                if log.file.is_none() || !is_per_file(log.task) {
                    self.println(format!("{} {}", style("✓").green(), Self::title(log)));
                }
            }
            TaskStatus::Failed => {
                if let Some(bar) = bars.remove(&key) {
                    bar.abandon();
                }
                self.println(format!(
                    "{} {}: {}",
                    style("✗").red().bold(),
                    Self::title(log),
                    log.reason.as_deref().unwrap_or("failed")
                ));
            }
        }
    }
}

impl Default for HumanSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Tasks that report one line per file; only their aggregate gets a
/// completion line.
fn is_per_file(task: TaskName) -> bool {
    task == TaskName::AssetDownload
}

impl EventSink for HumanSink {
    fn log(&self, event: &LogEvent) {
        match event {
            LogEvent::Task(log) => self.on_task(log),
            LogEvent::AssetInfo(info) => self.println(format!(
                "{} {} model files → {}",
                style("•").cyan(),
                info.urls.len(),
                style(&info.save_to).bold()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_uses_file_name() {
        let log = TaskLog::scheduled(TaskName::AssetDownload).with_file(Path::new("models/ner/model.bin"));
        assert_eq!(HumanSink::title(&log), "model.bin");

        let log = TaskLog::complete(TaskName::ProjectSync);
        assert_eq!(HumanSink::title(&log), TaskName::ProjectSync.label());
    }

    #[test]
    fn test_bars_are_keyed_by_file() {
        let a = TaskLog::ongoing(TaskName::AssetDownload, Progress::Known(0.1)).with_file(Path::new("m/a.bin"));
        let b = TaskLog::ongoing(TaskName::AssetDownload, Progress::Known(0.1)).with_file(Path::new("m/b.bin"));
        assert_ne!(HumanSink::key(&a), HumanSink::key(&b));

        let aggregate = TaskLog::complete(TaskName::AssetDownload);
        assert_ne!(HumanSink::key(&a), HumanSink::key(&aggregate));
    }

    #[test]
    fn test_bar_lifecycle() {
        let sink = HumanSink::new();
        let file = Path::new("m/a.bin");

        sink.log(&TaskLog::scheduled(TaskName::AssetDownload).with_file(file).into());
        sink.log(&TaskLog::ongoing(TaskName::AssetDownload, Progress::Known(0.5)).with_file(file).into());
        assert_eq!(sink.bars.lock().unwrap().len(), 1);

        sink.log(&TaskLog::complete(TaskName::AssetDownload).with_file(file).into());
        assert!(sink.bars.lock().unwrap().is_empty());
    }
}
