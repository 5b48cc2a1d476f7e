use chrono::Local;
use facesift_engine::{EventSink, LogLevel, RunEvent};
use std::io::Write;

/// Prints run events to stdout, either as `[HH:MM:SS] message` lines or as
/// one JSON object per event.
pub struct ConsoleSink {
    json: bool,
}

impl ConsoleSink {
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

impl EventSink for ConsoleSink {
    fn emit(&mut self, event: RunEvent) {
        let mut out = std::io::stdout().lock();

        if self.json {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    let _ = writeln!(out, "{line}");
                }
                Err(err) => tracing::warn!(error = %err, "failed to serialize event"),
            }
            return;
        }

        match event {
            RunEvent::Log(log) => {
                let time = log.timestamp.with_timezone(&Local).format("%H:%M:%S");
                let _ = writeln!(out, "[{time}] {}{}", marker(log.level), log.message);
            }
            // The per-photo header line already shows progress.
            RunEvent::Progress { .. } => {}
            RunEvent::Summary(_) => {}
        }
    }
}

fn marker(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "",
        LogLevel::Success => "✓ ",
        LogLevel::Warning => "! ",
        LogLevel::Error => "✗ ",
    }
}
