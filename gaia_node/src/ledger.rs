//! Error ledger — bounded ring of recent errors with dedup.
//!
//! Burst-y hardware faults (a flaky sensor failing every cycle) collapse
//! into one entry with an occurrence count instead of flushing the ring.
//! Every tracked error is also forwarded to the log sink with its
//! severity mapped onto a tracing level.

use gaia_common::consts::{ERROR_DEDUP_WINDOW, ERROR_LEDGER_CAP, ERROR_MESSAGE_MAX};
use gaia_common::error::{ErrorCode, Severity};
use tracing::{error, warn};

/// One ledger entry.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub monotonic_ts: u64,
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    pub occurrence_count: u32,
}

/// Fixed-size ring of the most recent errors.
#[derive(Debug)]
pub struct ErrorLedger {
    entries: Vec<ErrorRecord>,
    write_index: usize,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(ERROR_LEDGER_CAP),
            write_index: 0,
        }
    }

    /// Record an error, deduplicating against the last few entries.
    pub fn track(&mut self, now_ms: u64, code: ErrorCode, severity: Severity, message: &str) {
        let mut message = message.to_string();
        if message.len() > ERROR_MESSAGE_MAX {
            let mut cut = ERROR_MESSAGE_MAX;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }

        match severity {
            Severity::Warning => warn!(code = code.0, "{message}"),
            Severity::Error | Severity::Critical => error!(code = code.0, "{message}"),
        }

        // Scan the most recent entries for a duplicate.
        let len = self.entries.len();
        for back in 1..=ERROR_DEDUP_WINDOW.min(len) {
            let idx = (self.write_index + ERROR_LEDGER_CAP - back) % ERROR_LEDGER_CAP;
            if idx >= len {
                continue;
            }
            let entry = &mut self.entries[idx];
            if entry.code == code && entry.message == message {
                entry.occurrence_count = entry.occurrence_count.saturating_add(1);
                entry.monotonic_ts = now_ms;
                return;
            }
        }

        let record = ErrorRecord {
            monotonic_ts: now_ms,
            code,
            severity,
            message,
            occurrence_count: 1,
        };
        if self.entries.len() < ERROR_LEDGER_CAP {
            self.entries.push(record);
        } else {
            self.entries[self.write_index] = record;
        }
        self.write_index = (self.write_index + 1) % ERROR_LEDGER_CAP;
    }

    /// Number of live entries (saturates at the ring size).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, unordered (telemetry snapshot).
    pub fn entries(&self) -> &[ErrorRecord] {
        &self.entries
    }

    /// Count of entries at or above a severity.
    pub fn count_at_least(&self, severity: Severity) -> usize {
        let rank = |s: Severity| match s {
            Severity::Warning => 0,
            Severity::Error => 1,
            Severity::Critical => 2,
        };
        self.entries
            .iter()
            .filter(|e| rank(e.severity) >= rank(severity))
            .count()
    }
}

impl Default for ErrorLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_and_counts() {
        let mut ledger = ErrorLedger::new();
        ledger.track(10, ErrorCode::I2C_READ_FAILED, Severity::Error, "read 0x44");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.entries()[0].occurrence_count, 1);
    }

    #[test]
    fn duplicates_collapse() {
        let mut ledger = ErrorLedger::new();
        for t in 0..4 {
            ledger.track(t, ErrorCode::ONEWIRE_READ_FAILED, Severity::Error, "pin 4");
        }
        assert_eq!(ledger.len(), 1);
        let entry = &ledger.entries()[0];
        assert_eq!(entry.occurrence_count, 4);
        assert_eq!(entry.monotonic_ts, 3);
    }

    #[test]
    fn different_message_is_new_entry() {
        let mut ledger = ErrorLedger::new();
        ledger.track(0, ErrorCode::ONEWIRE_READ_FAILED, Severity::Error, "pin 4");
        ledger.track(1, ErrorCode::ONEWIRE_READ_FAILED, Severity::Error, "pin 5");
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn dedup_window_is_bounded() {
        let mut ledger = ErrorLedger::new();
        ledger.track(0, ErrorCode::ONEWIRE_READ_FAILED, Severity::Error, "pin 4");
        // Push the first entry out of the lookback window.
        for i in 0..ERROR_DEDUP_WINDOW {
            ledger.track(
                1 + i as u64,
                ErrorCode::I2C_READ_FAILED,
                Severity::Error,
                &format!("filler {i}"),
            );
        }
        ledger.track(99, ErrorCode::ONEWIRE_READ_FAILED, Severity::Error, "pin 4");
        // Out of the window → a fresh entry, not a bump.
        assert_eq!(ledger.len(), 2 + ERROR_DEDUP_WINDOW);
    }

    #[test]
    fn ring_saturates_at_capacity() {
        let mut ledger = ErrorLedger::new();
        for i in 0..(ERROR_LEDGER_CAP + 20) {
            ledger.track(
                i as u64,
                ErrorCode::MQTT_PUBLISH_FAILED,
                Severity::Warning,
                &format!("msg {i}"),
            );
        }
        assert_eq!(ledger.len(), ERROR_LEDGER_CAP);
    }

    #[test]
    fn long_messages_truncated() {
        let mut ledger = ErrorLedger::new();
        let long = "x".repeat(400);
        ledger.track(0, ErrorCode::VALIDATION_FAILED, Severity::Warning, &long);
        assert_eq!(ledger.entries()[0].message.len(), ERROR_MESSAGE_MAX);
    }

    #[test]
    fn severity_filter() {
        let mut ledger = ErrorLedger::new();
        ledger.track(0, ErrorCode::MQTT_BUFFER_FULL, Severity::Warning, "a");
        ledger.track(1, ErrorCode::I2C_READ_FAILED, Severity::Error, "b");
        ledger.track(2, ErrorCode::I2C_BUS_ERROR, Severity::Critical, "c");
        assert_eq!(ledger.count_at_least(Severity::Warning), 3);
        assert_eq!(ledger.count_at_least(Severity::Error), 2);
        assert_eq!(ledger.count_at_least(Severity::Critical), 1);
    }
}
