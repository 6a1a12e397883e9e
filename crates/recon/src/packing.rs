//! Box/pallet expansion of order quantities.
//!
//! Pallet identifiers are allocated before box identifiers so every box can
//! carry a back-reference to a pallet from the same planning pass.

use despatch_sscc::{AllocationError, Sscc, SsccAllocator};
use serde::Serialize;

use crate::audit::{AuditEvent, AuditSink, Stage};
use crate::normalize::{FactorSource, MappingIndex, OrderLine};

/// Lines needing more boxes than this are skipped before any identifier is
/// allocated. Every allocated identifier is burned for good.
pub const MAX_BOXES_PER_LINE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PackingFactors {
    pub units_per_box: u32,
    pub boxes_per_pallet: u32,
    pub source: FactorSource,
}

impl Default for PackingFactors {
    fn default() -> Self {
        Self { units_per_box: 1, boxes_per_pallet: 1, source: FactorSource::Default }
    }
}

impl PackingFactors {
    /// Factors for `line`: by item code, then by partial description, else 1/1.
    pub fn lookup(index: &MappingIndex<'_>, line: &OrderLine) -> Self {
        match index.lookup_for(line) {
            Some((entry, source)) => Self {
                units_per_box: entry.units_per_box.max(1),
                boxes_per_pallet: entry.boxes_per_pallet.max(1),
                source,
            },
            None => Self::default(),
        }
    }
}

/// One box.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackedUnit {
    /// Index of the order line this box belongs to.
    pub line_index: usize,
    pub po_number: String,
    pub item_code_source: String,
    pub target_item_code: String,
    pub quantity: f64,
    pub sscc: Sscc,
    pub pallet_sscc: Sscc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pallet {
    pub line_index: usize,
    pub po_number: String,
    pub sscc: Sscc,
    /// Boxes stacked on this pallet, in packing order.
    pub boxes: Vec<Sscc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PackingPlan {
    pub pallets: Vec<Pallet>,
    pub boxes: Vec<PackedUnit>,
}

impl PackingPlan {
    pub fn boxes_for_line(&self, line_index: usize) -> impl Iterator<Item = &PackedUnit> {
        self.boxes.iter().filter(move |b| b.line_index == line_index)
    }

    pub fn pallet(&self, sscc: &Sscc) -> Option<&Pallet> {
        self.pallets.iter().find(|p| &p.sscc == sscc)
    }
}

/// Plan every line.
pub fn plan_packing(
    lines: &[OrderLine],
    index: &MappingIndex<'_>,
    allocator: &mut dyn SsccAllocator,
    audit: &mut dyn AuditSink,
) -> Result<PackingPlan, AllocationError> {
    plan_lines(lines.iter().enumerate(), index, allocator, audit)
}

/// Plan a subset of lines, each keyed by its position in the full order list.
pub fn plan_lines<'l>(
    lines: impl IntoIterator<Item = (usize, &'l OrderLine)>,
    index: &MappingIndex<'_>,
    allocator: &mut dyn SsccAllocator,
    audit: &mut dyn AuditSink,
) -> Result<PackingPlan, AllocationError> {
    let mut plan = PackingPlan::default();
    for (line_index, line) in lines {
        pack_line(&mut plan, line_index, line, index, allocator, audit)?;
    }
    Ok(plan)
}

fn pack_line(
    plan: &mut PackingPlan,
    line_index: usize,
    line: &OrderLine,
    index: &MappingIndex<'_>,
    allocator: &mut dyn SsccAllocator,
    audit: &mut dyn AuditSink,
) -> Result<(), AllocationError> {
    let quantity = line.quantity_requested;
    if quantity <= 0.0 {
        audit.record(
            AuditEvent::warn(Stage::Packing, "non-positive quantity, line not packed")
                .field("po_number", line.po_number.as_str())
                .field("item_code_source", line.item_code_source.as_str())
                .field("quantity", quantity),
        );
        return Ok(());
    }

    let factors = PackingFactors::lookup(index, line);
    let target_item_code = index
        .get(&line.item_code_source)
        .map(|e| e.target_item_code.clone())
        .unwrap_or_default();

    let upb = f64::from(factors.units_per_box);
    let boxes_needed = (quantity / upb).ceil();
    if boxes_needed > MAX_BOXES_PER_LINE as f64 {
        audit.record(
            AuditEvent::error(Stage::Packing, "box count over limit, line not packed")
                .field("po_number", line.po_number.as_str())
                .field("item_code_source", line.item_code_source.as_str())
                .field("quantity", quantity)
                .field("units_per_box", factors.units_per_box)
                .field("limit", MAX_BOXES_PER_LINE),
        );
        return Ok(());
    }
    let box_count = boxes_needed as usize;
    let bpp = factors.boxes_per_pallet as usize;
    let pallet_count = box_count.div_ceil(bpp);

    let first_pallet = plan.pallets.len();
    for _ in 0..pallet_count {
        plan.pallets.push(Pallet {
            line_index,
            po_number: line.po_number.clone(),
            sscc: allocator.next_pallet()?,
            boxes: Vec::new(),
        });
    }

    let mut remaining = quantity;
    for box_index in 0..box_count {
        let box_qty = upb.min(remaining);
        remaining -= box_qty;

        let pallet_slot = first_pallet + (box_index / bpp).min(pallet_count - 1);
        let sscc = allocator.next_box()?;
        let pallet = &mut plan.pallets[pallet_slot];
        pallet.boxes.push(sscc.clone());

        plan.boxes.push(PackedUnit {
            line_index,
            po_number: line.po_number.clone(),
            item_code_source: line.item_code_source.clone(),
            target_item_code: target_item_code.clone(),
            quantity: box_qty,
            sscc,
            pallet_sscc: pallet.sscc.clone(),
        });
    }

    audit.record(
        AuditEvent::info(Stage::Packing, "line packed")
            .field("po_number", line.po_number.as_str())
            .field("item_code_source", line.item_code_source.as_str())
            .field("quantity", quantity)
            .field("units_per_box", factors.units_per_box)
            .field("boxes_per_pallet", factors.boxes_per_pallet)
            .field("boxes", box_count)
            .field("pallets", pallet_count)
            .field("factor_source", serde_json::to_value(factors.source).unwrap_or_default()),
    );
    Ok(())
}
