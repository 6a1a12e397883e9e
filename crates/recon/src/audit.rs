//! Append-only audit trail of matching decisions and anomalies.
//!
//! Every recorded event is also mirrored to the `log` facade.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DespatchError;

pub const LOG_TARGET: &str = "despatch::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    fn level(self) -> log::Level {
        match self {
            Self::Info => log::Level::Info,
            Self::Warn => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

/// Pipeline stage that raised the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Po,
    Mapping,
    Warehouse,
    Match,
    Fallback,
    Packing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Po => write!(f, "po"),
            Self::Mapping => write!(f, "mapping"),
            Self::Warehouse => write!(f, "warehouse"),
            Self::Match => write!(f, "match"),
            Self::Fallback => write!(f, "fallback"),
            Self::Packing => write!(f, "packing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at: String,
    pub severity: Severity,
    pub stage: Stage,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

impl AuditEvent {
    pub fn new(severity: Severity, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            at: chrono::Utc::now().to_rfc3339(),
            severity,
            stage,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn info(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, stage, message)
    }

    pub fn warn(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(Severity::Warn, stage, message)
    }

    pub fn error(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, stage, message)
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    fn mirror_to_log(&self) {
        let fields = serde_json::to_string(&self.fields).unwrap_or_default();
        log::log!(target: LOG_TARGET, self.severity.level(), "[{}] {} {fields}", self.stage, self.message);
    }
}

/// Destination for audit events. Implementors only append.
pub trait AuditSink {
    fn append(&mut self, event: AuditEvent);

    fn record(&mut self, event: AuditEvent) {
        event.mirror_to_log();
        self.append(event);
    }
}

/// In-memory audit log.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    events: Vec<AuditEvent>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn by_stage(&self, stage: Stage) -> impl Iterator<Item = &AuditEvent> {
        self.events.iter().filter(move |e| e.stage == stage)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.events.iter().filter(|e| e.severity == severity).count()
    }
}

impl AuditSink for AuditLog {
    fn append(&mut self, event: AuditEvent) {
        self.events.push(event);
    }
}

/// JSON-lines file opened in append mode, one event per line.
///
/// A failed write is logged and the run continues: the audit trail never
/// aborts a despatch run.
#[derive(Debug)]
pub struct JsonlAuditFile {
    path: PathBuf,
    file: File,
    written: usize,
}

impl JsonlAuditFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DespatchError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| DespatchError::Io(format!("{}: {e}", parent.display())))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DespatchError::Io(format!("{}: {e}", path.display())))?;
        Ok(Self { path, file, written: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events appended through this handle.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl AuditSink for JsonlAuditFile {
    fn append(&mut self, event: AuditEvent) {
        let result = serde_json::to_string(&event)
            .map_err(|e| e.to_string())
            .and_then(|line| writeln!(self.file, "{line}").map_err(|e| e.to_string()));
        match result {
            Ok(()) => self.written += 1,
            Err(e) => log::error!("audit write to {} failed: {e}", self.path.display()),
        }
    }
}

/// Fan out to two sinks, e.g. an in-memory log plus a file.
pub struct Tee<'a, A: AuditSink + ?Sized, B: AuditSink + ?Sized> {
    pub first: &'a mut A,
    pub second: &'a mut B,
}

impl<A: AuditSink + ?Sized, B: AuditSink + ?Sized> AuditSink for Tee<'_, A, B> {
    fn append(&mut self, event: AuditEvent) {
        self.first.append(event.clone());
        self.second.append(event);
    }
}

/// Read back a JSON-lines audit file, skipping unparseable lines.
pub fn read_jsonl(path: &Path) -> Result<Vec<AuditEvent>, DespatchError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| DespatchError::Io(format!("{}: {e}", path.display())))?;
    Ok(text
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
