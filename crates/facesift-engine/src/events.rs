//! Run events: timestamped log lines, progress ticks and the final summary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Totals reported once a run stops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub processed: usize,
    pub match_count: usize,
    pub enhanced_count: usize,
    /// `match_count / total`, in [0, 1].
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunEvent {
    Log(LogEvent),
    Progress { current: usize, total: usize },
    Summary(RunSummary),
}

impl RunEvent {
    pub fn as_log(&self) -> Option<&LogEvent> {
        match self {
            RunEvent::Log(log) => Some(log),
            _ => None,
        }
    }
}

/// Consumer of run events (a UI log pane, a channel, a test buffer).
pub trait EventSink {
    fn emit(&mut self, event: RunEvent);

    fn log(&mut self, level: LogLevel, message: String) {
        self.emit(RunEvent::Log(LogEvent {
            timestamp: Utc::now(),
            level,
            message,
        }));
    }
}

impl EventSink for Vec<RunEvent> {
    fn emit(&mut self, event: RunEvent) {
        self.push(event);
    }
}

/// Streams events to another task. Events sent after the receiver is gone are dropped.
impl EventSink for mpsc::UnboundedSender<RunEvent> {
    fn emit(&mut self, event: RunEvent) {
        let _ = self.send(event);
    }
}

/// Forwards events to `tracing`, for headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: RunEvent) {
        match event {
            RunEvent::Log(LogEvent { level, message, .. }) => match level {
                LogLevel::Info | LogLevel::Success => tracing::info!("{message}"),
                LogLevel::Warning => tracing::warn!("{message}"),
                LogLevel::Error => tracing::error!("{message}"),
            },
            RunEvent::Progress { current, total } => tracing::debug!(current, total, "progress"),
            RunEvent::Summary(s) => tracing::info!(
                total = s.total,
                processed = s.processed,
                matches = s.match_count,
                enhanced = s.enhanced_count,
                success_rate = s.success_rate,
                "run finished"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_collects_in_order() {
        let mut sink: Vec<RunEvent> = Vec::new();
        sink.log(LogLevel::Info, "first".into());
        sink.emit(RunEvent::Progress { current: 1, total: 2 });
        sink.log(LogLevel::Warning, "second".into());

        assert_eq!(sink.len(), 3);
        assert_eq!(sink[0].as_log().unwrap().message, "first");
        assert!(sink[1].as_log().is_none());
        assert_eq!(sink[2].as_log().unwrap().level, LogLevel::Warning);
    }

    #[tokio::test]
    async fn test_channel_sink_streams_and_survives_closed_receiver() {
        let (mut tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(RunEvent::Progress { current: 3, total: 4 });
        assert_eq!(rx.recv().await, Some(RunEvent::Progress { current: 3, total: 4 }));

        drop(rx);
        tx.log(LogLevel::Error, "nobody listening".into());
    }

    #[test]
    fn test_tracing_sink_accepts_every_kind() {
        let mut sink = TracingSink;
        sink.log(LogLevel::Success, "ok".into());
        sink.emit(RunEvent::Progress { current: 1, total: 1 });
        sink.emit(RunEvent::Summary(RunSummary {
            total: 1,
            processed: 1,
            match_count: 1,
            enhanced_count: 0,
            success_rate: 1.0,
        }));
    }
}
