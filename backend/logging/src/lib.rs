//! Structured logging for signalforge.
//!
//! Console plus daily-rolling JSON file output, cycle event records, and
//! credential redaction for anything that may echo a request URL or header.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{CycleEvent, CycleLogEntry, EventLogger};
pub use logger::{init_console_logger, init_logger};
pub use redact::redact_sensitive_data;
