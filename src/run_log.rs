//! Per-run diagnostic log
//!
//! Append-only for the duration of one run, cleared when the next run starts.
//! Every entry is mirrored to `tracing` so terminal output and the downloadable
//! log stay in step.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::Display;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
    pub error: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunLog {
    entries: Vec<LogEntry>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an informational event
    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.push(message, None);
    }

    /// Record an anomaly together with its underlying error
    pub fn error(&mut self, message: impl Into<String>, error: &dyn Display) {
        let message = message.into();
        let detail = error.to_string();
        tracing::warn!("{}: {}", message, detail);
        self.push(message, Some(detail));
    }

    fn push(&mut self, message: String, error: Option<String>) {
        self.entries.push(LogEntry {
            timestamp: Local::now(),
            message,
            error,
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries that carry an error
    pub fn error_count(&self) -> usize {
        self.entries.iter().filter(|e| e.error.is_some()).count()
    }

    /// Plain-text form for saving to disk
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|entry| {
                let mut line = format!("[{}] {}\n", entry.timestamp.format("%H:%M:%S"), entry.message);
                if let Some(err) = &entry.error {
                    line.push_str(&format!("Error: {}\n", err));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
