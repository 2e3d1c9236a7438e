//! Bounded operator-facing log of pipeline events.
//!
//! Entries live for the lifetime of the process only.  Once the buffer holds
//! `capacity` entries every append evicts the oldest one.

pub mod events;

use std::collections::VecDeque;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::events::{LogEntry, Severity};

pub const DEFAULT_CAPACITY: usize = 1000;

/// Capacity and fill level, as reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    pub max_logs: usize,
    pub current_log_count: usize,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
        }
    }

    /// Append an entry, mirroring it to `tracing` at the matching level.
    pub fn record(&mut self, severity: Severity, message: impl Into<String>) -> &LogEntry {
        let message = message.into();
        match severity {
            Severity::Debug => tracing::debug!(target: "keywatch::audit", "{message}"),
            Severity::Info => tracing::info!(target: "keywatch::audit", "{message}"),
            Severity::Warn => tracing::warn!(target: "keywatch::audit", "{message}"),
            Severity::Error => tracing::error!(target: "keywatch::audit", "{message}"),
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            message,
        });
        let newest = self.entries.len() - 1;
        &self.entries[newest]
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.record(Severity::Debug, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.record(Severity::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.record(Severity::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.record(Severity::Error, message);
    }

    /// Entries newest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().rev().cloned().collect()
    }

    /// Drop every entry, then note the clear itself so the log is never
    /// silently empty after operator action.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.info("Logs cleared by user");
    }

    pub fn settings(&self) -> LogSettings {
        LogSettings {
            max_logs: self.capacity,
            current_log_count: self.entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sets_severity_and_message() {
        let mut log = AuditLog::new(10);
        let entry = log.record(Severity::Warn, "truncated entries").clone();
        assert_eq!(entry.severity, Severity::Warn);
        assert_eq!(entry.message, "truncated entries");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn record_timestamp_is_recent() {
        let before = Utc::now();
        let mut log = AuditLog::default();
        let ts = log.record(Severity::Info, "tick").timestamp;
        let after = Utc::now();
        assert!(ts >= before && ts <= after);
    }

    #[test]
    fn entries_are_newest_first() {
        let mut log = AuditLog::new(10);
        log.info("first");
        log.info("second");
        log.error("third");
        let messages: Vec<_> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["third", "second", "first"]);
    }

    #[test]
    fn oldest_entries_are_evicted_past_capacity() {
        let mut log = AuditLog::new(3);
        for i in 0..5 {
            log.info(format!("event-{i}"));
        }
        assert_eq!(log.len(), 3);
        let messages: Vec<_> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["event-4", "event-3", "event-2"]);
    }

    #[test]
    fn ids_are_unique() {
        let mut log = AuditLog::new(10);
        log.info("a");
        log.info("a");
        let entries = log.entries();
        assert_ne!(entries[0].id, entries[1].id);
    }

    #[test]
    fn clear_leaves_a_single_marker_entry() {
        let mut log = AuditLog::new(10);
        log.info("a");
        log.warn("b");
        log.clear();
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "Logs cleared by user");
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut log = AuditLog::new(0);
        log.info("a");
        log.info("b");
        assert_eq!(log.len(), 1);
        assert_eq!(log.settings().max_logs, 1);
    }

    #[test]
    fn settings_report_capacity_and_count() {
        let mut log = AuditLog::new(5);
        log.debug("x");
        log.debug("y");
        assert_eq!(
            log.settings(),
            LogSettings {
                max_logs: 5,
                current_log_count: 2
            }
        );
    }

    #[test]
    fn log_entry_serde_roundtrip() {
        let mut log = AuditLog::new(2);
        let entry = log.record(Severity::Error, "remote rejected").clone();
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"severity\":\"error\""));
        let back: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
