//! Degraded-mode packing used when structured matching is unusable.
//!
//! Always yields one row per order line. Mapped lines keep their target code
//! and defer identifiers to the packing planner; unmapped lines get a
//! placeholder target code and a box plus pallet identifier right away.

use despatch_sscc::{AllocationError, SsccAllocator};

use crate::audit::{AuditEvent, AuditSink, Stage};
use crate::model::{despatch_advice_id, DespatchRow};
use crate::normalize::{MappingEntry, MappingIndex, OrderLine, WarehouseMovement};

pub const DEFAULT_PLACEHOLDER_PREFIX: &str = "FAKE-";

pub fn fallback_pack(
    lines: &[OrderLine],
    mapping: &[MappingEntry],
    movements: Option<&[WarehouseMovement]>,
    placeholder_prefix: &str,
    allocator: &mut dyn SsccAllocator,
    audit: &mut dyn AuditSink,
) -> Result<Vec<DespatchRow>, AllocationError> {
    let index = MappingIndex::new(mapping);
    let mut rows = Vec::with_capacity(lines.len());

    for line in lines {
        let mut row = DespatchRow {
            po_number: line.po_number.clone(),
            item_code_source: line.item_code_source.clone(),
            target_item_code: String::new(),
            shipped_quantity: line.quantity_requested,
            lot: String::new(),
            manufacture_date: None,
            expiry_date: None,
            box_sscc: None,
            pallet_sscc: None,
            despatch_advice_id: String::new(),
            customer: String::new(),
            match_status: None,
        };

        match index.get(&line.item_code_source) {
            Some(entry) => row.target_item_code = entry.target_item_code.clone(),
            None => {
                row.target_item_code = placeholder_code(placeholder_prefix, &line.item_code_source);
                row.box_sscc = Some(allocator.next_box()?);
                row.pallet_sscc = Some(allocator.next_pallet()?);
                audit.record(
                    AuditEvent::warn(Stage::Fallback, "placeholder target code assigned")
                        .field("po_number", line.po_number.as_str())
                        .field("item_code_source", line.item_code_source.as_str())
                        .field("target_item_code", row.target_item_code.as_str()),
                );
            }
        }

        let movement = movements
            .unwrap_or(&[])
            .iter()
            .find(|m| m.target_item_code == row.target_item_code);
        if let Some(m) = movement {
            row.lot = m.lot.clone();
            row.manufacture_date = m.manufacture_date;
            row.expiry_date = m.expiry_date;
            row.customer = m.customer.clone();
        }
        let document_ref = movement.map(|m| m.document_ref.as_str()).unwrap_or("");
        row.despatch_advice_id = despatch_advice_id(document_ref, &line.po_number);

        rows.push(row);
    }

    Ok(rows)
}

/// `<prefix><source>`; a blank source yields the prefix without its trailing `-`.
pub fn placeholder_code(prefix: &str, source: &str) -> String {
    let source = source.trim();
    if source.is_empty() {
        let bare = prefix.trim_end_matches('-');
        if bare.is_empty() { prefix.to_string() } else { bare.to_string() }
    } else {
        format!("{prefix}{source}")
    }
}
