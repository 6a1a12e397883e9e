use std::fmt;

use despatch_sscc::{AllocationError, StoreError};
use serde::Serialize;

/// A required canonical field could not be resolved from any accepted header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaError {
    pub table: String,
    /// Canonical names of the unresolved required fields.
    pub missing: Vec<String>,
    /// Headers that were present, for diagnostics.
    pub headers: Vec<String>,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "table '{}': missing required field(s) {} (headers: {})",
            self.table,
            self.missing.join(", "),
            self.headers.join(", ")
        )
    }
}

impl std::error::Error for SchemaError {}

#[derive(Debug)]
pub enum DespatchError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (bad arp id, unknown header field, etc.).
    ConfigValidation(String),
    /// Input table could not be normalized.
    Schema(SchemaError),
    /// Identifier allocation failed. Never masked by the fallback path.
    Allocation(AllocationError),
    /// Malformed CSV or file read error.
    Io(String),
}

impl fmt::Display for DespatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::Schema(e) => write!(f, "schema error: {e}"),
            Self::Allocation(e) => write!(f, "sscc allocation failed: {e}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for DespatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Schema(e) => Some(e),
            Self::Allocation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SchemaError> for DespatchError {
    fn from(e: SchemaError) -> Self {
        Self::Schema(e)
    }
}

impl From<AllocationError> for DespatchError {
    fn from(e: AllocationError) -> Self {
        Self::Allocation(e)
    }
}

impl From<StoreError> for DespatchError {
    fn from(e: StoreError) -> Self {
        Self::Allocation(AllocationError::Store(e))
    }
}
