use chrono::Local;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Error,
    Success,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub kind: LogKind,
    pub message: String,
    /// Local wall-clock time, `HH:MM:SS`
    pub timestamp: String,
}

/// Ordered, user-facing record of what the converter did. Every entry is
/// mirrored to the `log` facade so headless runs keep the same trail.
#[derive(Debug, Default)]
pub struct Console {
    entries: Vec<LogEntry>,
    next_id: u64,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: LogKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            LogKind::Error => error!("{}", message),
            LogKind::Warning => warn!("{}", message),
            LogKind::Info | LogKind::Success => info!("{}", message),
        }

        self.next_id += 1;
        self.entries.push(LogEntry {
            id: self.next_id.to_string(),
            kind,
            message,
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogKind::Info, message);
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.push(LogKind::Success, message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(LogKind::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogKind::Error, message);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Drop all entries. Ids keep counting so they never repeat.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
