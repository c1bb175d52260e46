//! Logging facade: a process-wide `log`-crate backend with a swappable
//! sink and a runtime-adjustable minimum level.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, LazyLock, RwLock};

use crate::util::{read, write};
use crate::{LogLevel, LogSink};

/// Default sink: `level [file:line] message` to standard error.
#[derive(Debug, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write(&self, level: LogLevel, file: &str, line: u32, message: &str) {
        let tag = match level {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        eprintln!("{tag} [{file}:{line}] {message}");
    }
}

struct VelkLogger {
    level: AtomicU8,
    sink: RwLock<Arc<dyn LogSink>>,
}

static LOGGER: LazyLock<VelkLogger> = LazyLock::new(|| VelkLogger {
    level: AtomicU8::new(LogLevel::Info as u8),
    sink: RwLock::new(Arc::new(StderrSink)),
});

impl VelkLogger {
    fn level(&self) -> LogLevel {
        match self.level.load(Ordering::Relaxed) {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warning,
            _ => LogLevel::Error,
        }
    }
}

impl log::Log for VelkLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        LogLevel::from_level(metadata.level()) >= self.level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let sink = read(&self.sink).clone();
        sink.write(
            LogLevel::from_level(record.level()),
            record.file().unwrap_or("<unknown>"),
            record.line().unwrap_or(0),
            &record.args().to_string(),
        );
    }

    fn flush(&self) {}
}

/// Installs the runtime logger as the `log` crate's global backend.
///
/// Called by `instance()`; a second installation attempt (another logger
/// already set) is ignored.
pub(crate) fn init() {
    if log::set_logger(&*LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Trace);
    }
}

/// Adjusts the minimum level that reaches the sink.
pub fn set_level(level: LogLevel) {
    LOGGER.level.store(level as u8, Ordering::Relaxed);
}

/// The current minimum level.
pub fn level() -> LogLevel {
    LOGGER.level()
}

/// Replaces the sink, returning the previous one.
pub fn set_sink(sink: Arc<dyn LogSink>) -> Arc<dyn LogSink> {
    std::mem::replace(&mut *write(&LOGGER.sink), sink)
}
