//! Herald Log Bridge — republishes log records as bus events.
//!
//! This crate provides a `log::Log` implementation that turns every
//! log record into a bus event on
//! `service/log/LogEntry/<LOG_ERROR|LOG_WARNING|...>`, carrying the
//! message, level, target, and timestamp as properties. Handlers can
//! then subscribe to `service/log/LogEntry/*` (or a single level) like
//! to any other topic.
//!
//! Records are posted asynchronously and delivery failures are
//! swallowed: a log bridge must never take the host application down.
//!
//! # Recursion safety
//!
//! The bus itself logs through the `log` facade (blacklisting,
//! worker exits). Two guards stop those records from echoing through
//! the bus forever:
//!
//! 1. records from the bus's own crates (target `herald*`) are only
//!    forwarded to the inner logger, never posted;
//! 2. a per-thread flag suppresses re-entrant posting if a handler
//!    logs while its log-entry event is being delivered on the same
//!    thread.

use std::cell::Cell;
use std::sync::Arc;

use chrono::Utc;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use herald_core::{constants, Event, EventAdmin, Properties, Value};

/// Topic prefix of every republished record.
pub const LOG_TOPIC_PREFIX: &str = "service/log/LogEntry";

thread_local! {
    /// Per-thread re-entrancy flag: set while a record is being posted
    /// so a handler logging on the same thread cannot recurse into the
    /// bridge.
    static IN_BRIDGE: Cell<bool> = const { Cell::new(false) };
}

// ---------------------------------------------------------------------------
// LogBridge
// ---------------------------------------------------------------------------

/// The bridge. Install it as the global logger via `install()`, or
/// wrap an existing logger so records are both printed and published.
pub struct LogBridge {
    admin: Arc<EventAdmin>,
    inner: Option<Box<dyn Log>>,
    level: LevelFilter,
}

impl LogBridge {
    pub fn new(admin: Arc<EventAdmin>, level: LevelFilter, inner: Option<Box<dyn Log>>) -> Self {
        Self {
            admin,
            inner,
            level,
        }
    }

    /// Topic segment for a record level, matching the conventional
    /// log-entry topics.
    fn level_segment(level: log::Level) -> &'static str {
        match level {
            log::Level::Error => "LOG_ERROR",
            log::Level::Warn => "LOG_WARNING",
            log::Level::Info => "LOG_INFO",
            log::Level::Debug => "LOG_DEBUG",
            log::Level::Trace => "LOG_TRACE",
        }
    }

    /// Builds and posts the event for one record. Failures (stopped
    /// bus, malformed nothing) are ignored by design.
    pub fn publish(&self, record: &Record) {
        let topic = format!("{LOG_TOPIC_PREFIX}/{}", Self::level_segment(record.level()));

        let mut properties = Properties::new();
        properties.insert(
            constants::MESSAGE.to_string(),
            Value::Str(record.args().to_string()),
        );
        properties.insert(
            constants::TIMESTAMP.to_string(),
            Value::Timestamp(Utc::now()),
        );
        properties.insert(
            "log.level".to_string(),
            Value::Int(record.level() as usize as i64),
        );
        properties.insert(
            "log.target".to_string(),
            Value::Str(record.target().to_string()),
        );
        if let Some(module) = record.module_path() {
            properties.insert("log.module".to_string(), Value::Str(module.to_string()));
        }

        if let Ok(event) = Event::new(topic, properties) {
            let _ = self.admin.post_event(event);
        }
    }

    fn is_bus_internal(record: &Record) -> bool {
        record.target().starts_with("herald")
    }
}

impl Log for LogBridge {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
            || self
                .inner
                .as_ref()
                .map(|inner| inner.enabled(metadata))
                .unwrap_or(false)
    }

    fn log(&self, record: &Record) {
        if let Some(inner) = &self.inner {
            inner.log(record);
        }
        if record.level() > self.level || Self::is_bus_internal(record) {
            return;
        }

        let re_entrant = IN_BRIDGE.with(|flag| flag.replace(true));
        if !re_entrant {
            self.publish(record);
            IN_BRIDGE.with(|flag| flag.set(false));
        }
    }

    fn flush(&self) {
        if let Some(inner) = &self.inner {
            inner.flush();
        }
    }
}

// ---------------------------------------------------------------------------
// Installation
// ---------------------------------------------------------------------------

/// Installs a `LogBridge` as the process-wide logger.
///
/// `inner` may carry the previous logging backend so records keep
/// being printed. Fails if a global logger is already set.
pub fn install(
    admin: Arc<EventAdmin>,
    level: LevelFilter,
    inner: Option<Box<dyn Log>>,
) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(LogBridge::new(admin, level, inner)))?;
    log::set_max_level(level);
    Ok(())
}
