//! `despatch-recon`: purchase-order to warehouse reconciliation engine.
//!
//! Receives pre-loaded tables, returns despatch-advice rows. Identifier
//! allocation goes through the `despatch-sscc` allocator seam; file formats
//! beyond CSV text are the caller's concern.

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod fallback;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod packing;
pub mod schema;
pub mod table;

pub use audit::{AuditEvent, AuditLog, AuditSink, JsonlAuditFile, Severity, Stage};
pub use config::DespatchConfig;
pub use engine::{
    build_despatch_advice, run_structured, DespatchAdvice, DespatchInputs, FallbackReason, Pipeline,
    ResolutionPath, StructuredOutcome,
};
pub use error::{DespatchError, SchemaError};
pub use model::{DespatchRow, MatchResult, MatchStatus, MatchSummary};
pub use packing::{PackedUnit, PackingPlan, Pallet};
pub use table::RawTable;
