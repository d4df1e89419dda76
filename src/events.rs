//! Event sink capability.
//!
//! The teacher app emitted progress/log events through a Tauri `Window`
//! (`commands::events::EventEmitter`, wrapping `window.emit(...)`). There is
//! no window here, so the same shape of event is instead handed to an
//! injected `EventSink` trait object, held per-`Session` rather than behind a
//! process-wide bus (Design Notes §9).

use std::sync::Mutex;

/// Severity/category of a log line, matching the teacher's `log_type` field
/// (`tx`/`rx`/`info`/`warn`/`error`/`success`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
    Tx,
    Rx,
}

/// One observable event. Both variants carry a monotonic timestamp supplied
/// by the injected `Clock`, per spec §6.
#[derive(Debug, Clone)]
pub enum Event {
    Progress { op: String, step: u32, total: u32, label: String, at_ms: u64 },
    Log { level: LogLevel, text: String, raw_bytes: Option<Vec<u8>>, at_ms: u64 },
}

/// Sink for progress and log events. Must be safe to share across session
/// threads (`Send + Sync`) per the concurrency model in spec §5.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);

    fn progress(&self, op: &str, step: u32, total: u32, label: &str, at_ms: u64) {
        self.emit(Event::Progress {
            op: op.to_string(),
            step,
            total,
            label: label.to_string(),
            at_ms,
        });
    }

    fn log(&self, level: LogLevel, text: &str, at_ms: u64) {
        self.emit(Event::Log { level, text: text.to_string(), raw_bytes: None, at_ms });
    }

    fn log_bytes(&self, level: LogLevel, text: &str, raw_bytes: &[u8], at_ms: u64) {
        self.emit(Event::Log {
            level,
            text: text.to_string(),
            raw_bytes: Some(raw_bytes.to_vec()),
            at_ms,
        });
    }
}

/// Sink that discards everything — the default for callers that don't care
/// about the TX/RX/progress feed.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// In-memory recorder, the direct analogue of a UI binding the teacher's
/// `comm-log`/`read-progress` events to a terminal widget. Used by the
/// integration tests to assert on session-end discipline, retry counts, and
/// the exact TX sequence (spec §8 testable properties).
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self { events: Mutex::new(Vec::new()) }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// TX frames logged in order, as the raw bytes handed to `log_bytes`.
    pub fn tx_frames(&self) -> Vec<Vec<u8>> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Log { level: LogLevel::Tx, raw_bytes: Some(b), .. } => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn warn_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::Log { level: LogLevel::Warn, .. }))
            .count()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}
