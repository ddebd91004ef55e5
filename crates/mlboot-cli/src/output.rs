//! JSON-lines event output.

use std::io::{self, Write};
use std::sync::Mutex;

use mlboot_core::{EventSink, LogEvent};

/// Writes every event as one JSON object per line and flushes after each,
/// so a supervising process sees progress as it happens.
pub struct JsonLineSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLineSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }
}

impl EventSink for JsonLineSink {
    fn log(&self, event: &LogEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                log::warn!("Failed to serialize event: {}", e);
                return;
            }
        };

        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{}", line);
            let _ = out.flush();
        }
    }
}
