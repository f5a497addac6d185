//! The UI-facing session log.

use chrono::{DateTime, Local};
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    User,
    Model,
    Tool,
    System,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::User => "user",
            LogCategory::Model => "model",
            LogCategory::Tool => "tool",
            LogCategory::System => "system",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub category: LogCategory,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:>6}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.category,
            self.message
        )
    }
}

/// Append-only, shareable list of log entries. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and mirrors it to `tracing`.
    pub fn record(&self, category: LogCategory, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(category = %category, "{}", message);
        let entry = LogEntry {
            timestamp: Local::now(),
            category,
            message,
        };
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries recorded at or after `index`, for incremental readers.
    pub fn since(&self, index: usize) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.iter().skip(index).cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().skip(index).cloned().collect(),
        }
    }

    pub fn by_category(&self, category: LogCategory) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.category == category)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_entries() {
        let log = SessionLog::new();
        let writer = log.clone();

        writer.record(LogCategory::User, "hello");
        writer.record(LogCategory::System, "closed");

        assert_eq!(log.len(), 2);
        assert_eq!(log.by_category(LogCategory::System).len(), 1);
        assert_eq!(log.since(1)[0].message, "closed");
        assert!(log.entries()[0].to_string().ends_with("  user: hello"));
    }
}
