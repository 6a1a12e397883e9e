use std::fmt;
use std::path::PathBuf;

use crate::counter::UnitClass;

/// Malformed input to identifier generation. Fatal to the allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Allocating-party id is not exactly 6 ASCII digits.
    InvalidArpId(String),
    /// Year prefix has more digits than the 10-digit sequence block.
    YearPrefixTooLong(String),
    /// Counter value does not fit the width left after the year prefix.
    SequenceOverflow { seq: u64, width: usize },
    /// The 17-digit base (or an 18-digit identifier) is malformed.
    InvalidDigits(String),
    /// Check digit does not match the recomputed one.
    CheckDigitMismatch { expected: u8, found: u8 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArpId(id) => {
                write!(f, "allocating party id must be 6 digits, got '{id}'")
            }
            Self::YearPrefixTooLong(prefix) => {
                write!(f, "year prefix '{prefix}' is longer than 10 digits")
            }
            Self::SequenceOverflow { seq, width } => {
                write!(f, "sequence overflow: {seq} does not fit in {width} digit(s)")
            }
            Self::InvalidDigits(msg) => write!(f, "invalid digits: {msg}"),
            Self::CheckDigitMismatch { expected, found } => {
                write!(f, "check digit mismatch: expected {expected}, found {found}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Failure reading, locking or persisting counter state.
#[derive(Debug)]
pub enum StoreError {
    Io { path: PathBuf, message: String },
    /// State file exists but cannot be parsed. Never reset silently.
    Corrupt { path: PathBuf, message: String },
    /// Another holder kept the lock file past the timeout.
    LockTimeout { path: PathBuf },
    /// Counter reached `u64::MAX`.
    CounterOverflow(UnitClass),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        Self::Io { path: path.into(), message: err.to_string() }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "counter state {}: {message}", path.display())
            }
            Self::Corrupt { path, message } => {
                write!(f, "counter state {} is corrupt: {message}", path.display())
            }
            Self::LockTimeout { path } => write!(
                f,
                "timed out waiting for counter lock {} (remove it if no other run is active)",
                path.display()
            ),
            Self::CounterOverflow(class) => write!(f, "{class} counter overflow"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Anything that can go wrong while allocating one identifier.
#[derive(Debug)]
pub enum AllocationError {
    Store(StoreError),
    Validation(ValidationError),
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{e}"),
            Self::Validation(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AllocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Validation(e) => Some(e),
        }
    }
}

impl From<StoreError> for AllocationError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<ValidationError> for AllocationError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}
