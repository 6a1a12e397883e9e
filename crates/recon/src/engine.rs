use std::fmt;

use despatch_sscc::SsccAllocator;
use serde::Serialize;

use crate::audit::{AuditEvent, AuditSink, Stage};
use crate::config::{DespatchConfig, Schemas};
use crate::error::{DespatchError, SchemaError};
use crate::evidence::compute_summary;
use crate::fallback::fallback_pack;
use crate::matcher::match_orders;
use crate::model::{DespatchRow, MatchResult, MatchSummary};
use crate::normalize::{
    normalize_mapping, normalize_orders, normalize_warehouse, MappingEntry, MappingIndex, OrderLine,
    WarehouseMovement,
};
use crate::packing::{plan_lines, PackingPlan};
use crate::table::RawTable;

// ---------------------------------------------------------------------------
// Inputs and outcomes
// ---------------------------------------------------------------------------

/// The three input tables. The mapping table may be absent altogether.
#[derive(Debug, Clone, Copy)]
pub struct DespatchInputs<'a> {
    pub orders: &'a RawTable,
    pub mapping: Option<&'a RawTable>,
    pub warehouse: &'a RawTable,
}

/// Why structured matching could not be used.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FallbackReason {
    MissingMapping,
    Schema(SchemaError),
    NoRows,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingMapping => write!(f, "no mapping table supplied"),
            Self::Schema(e) => write!(f, "{e}"),
            Self::NoRows => write!(f, "matching produced no rows"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StructuredOutcome {
    Matched(Vec<MatchResult>),
    Unusable(FallbackReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    Structured,
    Fallback(FallbackReason),
}

impl ResolutionPath {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DespatchAdvice {
    pub path: ResolutionPath,
    pub rows: Vec<DespatchRow>,
    /// Match results; empty on the fallback path.
    pub matches: Vec<MatchResult>,
    pub summary: MatchSummary,
    /// Present when packing ran.
    pub packing: Option<PackingPlan>,
}

// ---------------------------------------------------------------------------
// Structured attempt
// ---------------------------------------------------------------------------

/// Match lines when both reference tables are usable.
pub fn run_structured(
    lines: &[OrderLine],
    mapping: Option<&Result<Vec<MappingEntry>, SchemaError>>,
    movements: &Result<Vec<WarehouseMovement>, SchemaError>,
    audit: &mut dyn AuditSink,
) -> StructuredOutcome {
    let mapping = match mapping {
        None => return StructuredOutcome::Unusable(FallbackReason::MissingMapping),
        Some(Err(e)) => return StructuredOutcome::Unusable(FallbackReason::Schema(e.clone())),
        Some(Ok(entries)) => entries,
    };
    let movements = match movements {
        Err(e) => return StructuredOutcome::Unusable(FallbackReason::Schema(e.clone())),
        Ok(m) => m,
    };

    let results = match_orders(lines, mapping, movements, audit);
    if results.is_empty() {
        StructuredOutcome::Unusable(FallbackReason::NoRows)
    } else {
        StructuredOutcome::Matched(results)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Normalize → match → (fallback) → optional packing.
pub struct Pipeline<'c> {
    config: &'c DespatchConfig,
    schemas: Schemas,
}

impl<'c> Pipeline<'c> {
    pub fn new(config: &'c DespatchConfig) -> Result<Self, DespatchError> {
        Ok(Self {
            config,
            schemas: config.schemas()?,
        })
    }

    pub fn run(
        &self,
        inputs: DespatchInputs<'_>,
        allocator: &mut dyn SsccAllocator,
        audit: &mut dyn AuditSink,
    ) -> Result<DespatchAdvice, DespatchError> {
        // Order lines are needed on both paths: a PO schema error is fatal
        let lines = match normalize_orders(inputs.orders, &self.schemas.po) {
            Ok(lines) => lines,
            Err(e) => {
                audit.record(schema_event(&e));
                return Err(e.into());
            }
        };

        let mapping = inputs
            .mapping
            .map(|table| normalize_mapping(table, &self.schemas.mapping));
        let movements = normalize_warehouse(
            inputs.warehouse,
            &self.schemas.warehouse,
            &self.config.warehouse.sale_movement_types,
        );
        for err in [mapping.as_ref().and_then(|m| m.as_ref().err()), movements.as_ref().err()]
            .into_iter()
            .flatten()
        {
            audit.record(schema_event(err));
        }

        let entries: &[MappingEntry] = match &mapping {
            Some(Ok(entries)) => entries,
            _ => &[],
        };
        let index = MappingIndex::new(entries);

        match run_structured(&lines, mapping.as_ref(), &movements, audit) {
            StructuredOutcome::Matched(matches) => {
                let summary = compute_summary(&matches);
                log::info!(
                    "matched {} lines: {} ok, {} qty_warning, {} no_mapping, {} no_match",
                    summary.total,
                    summary.ok,
                    summary.qty_warning,
                    summary.no_mapping,
                    summary.no_match
                );
                let mut rows: Vec<DespatchRow> = matches.iter().map(DespatchRow::from_match).collect();

                let packing = if self.config.packing.enabled {
                    let packable = lines
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| matches[*i].match_status.is_matched());
                    let plan = plan_lines(packable, &index, allocator, audit)?;
                    rows = expand_rows(rows, &plan);
                    Some(plan)
                } else {
                    None
                };

                Ok(DespatchAdvice {
                    path: ResolutionPath::Structured,
                    rows,
                    matches,
                    summary,
                    packing,
                })
            }
            StructuredOutcome::Unusable(reason) => {
                audit.record(
                    AuditEvent::warn(Stage::Fallback, "structured matching unusable, using fallback packing")
                        .field("reason", reason.to_string())
                        .field("lines", lines.len()),
                );

                let movements = movements.as_ref().ok().map(|m| m.as_slice());
                let mut rows = fallback_pack(
                    &lines,
                    entries,
                    movements,
                    &self.config.fallback.placeholder_prefix,
                    allocator,
                    audit,
                )?;

                let packing = if self.config.packing.enabled {
                    // Only rows whose identifiers were deferred
                    let deferred = lines
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| rows[*i].box_sscc.is_none());
                    let plan = plan_lines(deferred, &index, allocator, audit)?;
                    rows = expand_rows(rows, &plan);
                    Some(plan)
                } else {
                    None
                };

                Ok(DespatchAdvice {
                    path: ResolutionPath::Fallback(reason),
                    rows,
                    matches: Vec::new(),
                    summary: MatchSummary::default(),
                    packing,
                })
            }
        }
    }
}

/// Build despatch advice for `inputs` under `config`.
pub fn build_despatch_advice(
    config: &DespatchConfig,
    inputs: DespatchInputs<'_>,
    allocator: &mut dyn SsccAllocator,
    audit: &mut dyn AuditSink,
) -> Result<DespatchAdvice, DespatchError> {
    Pipeline::new(config)?.run(inputs, allocator, audit)
}

fn schema_event(err: &SchemaError) -> AuditEvent {
    let stage = match err.table.as_str() {
        "po" => Stage::Po,
        "mapping" => Stage::Mapping,
        _ => Stage::Warehouse,
    };
    AuditEvent::error(stage, "required columns missing")
        .field("table", err.table.as_str())
        .field("missing", err.missing.clone())
}

/// Replace each packed row with one row per box. Rows are one per order line.
fn expand_rows(rows: Vec<DespatchRow>, plan: &PackingPlan) -> Vec<DespatchRow> {
    let mut out = Vec::with_capacity(rows.len().max(plan.boxes.len()));
    for (line_index, row) in rows.into_iter().enumerate() {
        let mut boxes = plan.boxes_for_line(line_index).peekable();
        if boxes.peek().is_none() {
            out.push(row);
            continue;
        }
        for unit in boxes {
            out.push(DespatchRow {
                shipped_quantity: unit.quantity,
                box_sscc: Some(unit.sscc.clone()),
                pallet_sscc: Some(unit.pallet_sscc.clone()),
                ..row.clone()
            });
        }
    }
    out
}
