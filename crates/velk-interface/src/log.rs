/// Severity levels for runtime diagnostics, ordered `Debug < Info <
/// Warning < Error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Verbose diagnostics (registry churn, lifecycle events).
    Debug = 0,
    /// Informational messages.
    Info = 1,
    /// Recoverable anomalies.
    Warning = 2,
    /// System-level failures (library load, dependency miss, plugin init).
    Error = 3,
}

impl LogLevel {
    /// Maps to the `log` crate's level.
    #[must_use]
    pub fn to_level(self) -> log::Level {
        match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }

    /// Maps from the `log` crate's level. `Trace` folds into `Debug`.
    #[must_use]
    pub fn from_level(level: log::Level) -> Self {
        match level {
            log::Level::Trace | log::Level::Debug => LogLevel::Debug,
            log::Level::Info => LogLevel::Info,
            log::Level::Warn => LogLevel::Warning,
            log::Level::Error => LogLevel::Error,
        }
    }
}

/// Destination for formatted log records.
///
/// The default sink writes to standard error; applications and tests may
/// install their own to capture or redirect diagnostics.
pub trait LogSink: Send + Sync {
    /// Writes one record. `file` and `line` locate the call site.
    fn write(&self, level: LogLevel, file: &str, line: u32, message: &str);
}
