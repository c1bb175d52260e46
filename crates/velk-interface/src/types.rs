use std::fmt;

/// Standard return codes for Velk operations.
///
/// Non-negative values indicate success; `succeeded`/`failed` are the
/// canonical predicates. [`ReturnValue::NothingToDo`] is success with "value
/// unchanged" semantics; callers that use it as a signal (for example to
/// suppress change notifications) must check for it explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ReturnValue {
    /// Operation succeeded.
    Success = 0,
    /// Operation succeeded but had no effect (e.g. value unchanged).
    NothingToDo = 1,
    /// Operation failed.
    Fail = -1,
    /// One or more arguments were invalid.
    InvalidArgument = -2,
    /// Write rejected: target is read-only.
    ReadOnly = -3,
}

impl ReturnValue {
    /// Returns true if the value indicates success (non-negative).
    #[must_use]
    pub const fn succeeded(self) -> bool {
        self as i16 >= 0
    }

    /// Returns true if the value indicates failure (negative).
    #[must_use]
    pub const fn failed(self) -> bool {
        (self as i16) < 0
    }
}

/// Returns true if the return value indicates success (non-negative).
#[must_use]
pub const fn succeeded(ret: ReturnValue) -> bool {
    ret.succeeded()
}

/// Returns true if the return value indicates failure (negative).
#[must_use]
pub const fn failed(ret: ReturnValue) -> bool {
    ret.failed()
}

bitflags::bitflags! {
    /// General-purpose object flags checked by runtime implementations.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ObjectFlags: u32 {
        /// Property rejects writes via `set_value`/`set_data`.
        const READ_ONLY = 1 << 0;
        /// Object is managed by a hive.
        const HIVE_MANAGED = 1 << 1;
    }
}

/// Selects how an invocation or write is dispatched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InvokeMode {
    /// Execute synchronously on the calling thread.
    #[default]
    Immediate,
    /// Queue for the next `update()` tick.
    Deferred,
}

/// A duration in microseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration {
    /// Microseconds.
    pub us: i64,
}

impl Duration {
    /// The zero duration.
    pub const ZERO: Duration = Duration { us: 0 };

    /// Constructs a `Duration` from microseconds.
    #[must_use]
    pub const fn from_micros(us: i64) -> Self {
        Self { us }
    }

    /// Constructs a `Duration` from seconds.
    #[must_use]
    pub fn from_seconds(s: f32) -> Self {
        Self {
            us: (s * 1_000_000.0) as i64,
        }
    }

    /// Constructs a `Duration` from milliseconds.
    #[must_use]
    pub fn from_milliseconds(ms: f32) -> Self {
        Self {
            us: (ms * 1_000.0) as i64,
        }
    }

    /// Converts to seconds.
    #[must_use]
    pub fn to_seconds(self) -> f32 {
        self.us as f32 / 1_000_000.0
    }

    /// Converts to milliseconds.
    #[must_use]
    pub fn to_milliseconds(self) -> f32 {
        self.us as f32 / 1_000.0
    }

    /// Returns true for the zero duration.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.us == 0
    }
}

/// A plugin version packed as major/minor/patch in one 32-bit integer.
///
/// Packed versions compare correctly with plain integer ordering.
#[must_use]
pub const fn pack_version(major: u16, minor: u8, patch: u8) -> u32 {
    ((major as u32) << 16) | ((minor as u32) << 8) | patch as u32
}

/// Extracts the major component of a packed version.
#[must_use]
pub const fn version_major(version: u32) -> u16 {
    (version >> 16) as u16
}

/// Extracts the minor component of a packed version.
#[must_use]
pub const fn version_minor(version: u32) -> u8 {
    (version >> 8) as u8
}

/// Extracts the patch component of a packed version.
#[must_use]
pub const fn version_patch(version: u32) -> u8 {
    version as u8
}

/// Formats a packed version as `major.minor.patch`.
#[must_use]
pub fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        version_major(version),
        version_minor(version),
        version_patch(version)
    )
}

impl fmt::Display for ReturnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReturnValue::Success => "Success",
            ReturnValue::NothingToDo => "NothingToDo",
            ReturnValue::Fail => "Fail",
            ReturnValue::InvalidArgument => "InvalidArgument",
            ReturnValue::ReadOnly => "ReadOnly",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_predicates() {
        assert!(succeeded(ReturnValue::Success));
        assert!(succeeded(ReturnValue::NothingToDo));
        assert!(failed(ReturnValue::Fail));
        assert!(failed(ReturnValue::InvalidArgument));
        assert!(failed(ReturnValue::ReadOnly));
    }

    #[test]
    fn version_packing_round_trips() {
        let v = pack_version(2, 1, 0);
        assert_eq!(version_major(v), 2);
        assert_eq!(version_minor(v), 1);
        assert_eq!(version_patch(v), 0);
        assert!(pack_version(3, 0, 0) > pack_version(2, 9, 9));
        assert_eq!(format_version(v), "2.1.0");
    }

    #[test]
    fn duration_conversions() {
        assert_eq!(Duration::from_seconds(1.5).us, 1_500_000);
        assert_eq!(Duration::from_milliseconds(2.0).us, 2_000);
        assert_eq!(Duration::from_micros(500_000).to_seconds(), 0.5);
    }
}
