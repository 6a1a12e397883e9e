use std::collections::HashMap;

use serde_json::Value;

use crate::audit::{AuditEvent, AuditSink, Stage};
use crate::model::{MatchResult, MatchStatus};
use crate::normalize::{MappingIndex, MappingEntry, OrderLine, WarehouseMovement};

/// Match every order line to its mapping entry and most recent sale movement.
///
/// Produces exactly one result per line, in input order. Soft failures
/// (no mapping, no movement, short quantity) are reported through
/// `match_status` and the audit sink; they never abort.
pub fn match_orders(
    lines: &[OrderLine],
    mapping: &[MappingEntry],
    movements: &[WarehouseMovement],
    audit: &mut dyn AuditSink,
) -> Vec<MatchResult> {
    let index = MappingIndex::new(mapping);

    // Candidates per target code, in input order. A blank item column matches nothing.
    let mut by_target: HashMap<&str, Vec<&WarehouseMovement>> = HashMap::new();
    for movement in movements.iter().filter(|m| !m.target_item_code.trim().is_empty()) {
        by_target.entry(movement.target_item_code.as_str()).or_default().push(movement);
    }

    lines
        .iter()
        .map(|line| match_line(line, &index, &by_target, audit))
        .collect()
}

fn match_line(
    line: &OrderLine,
    index: &MappingIndex<'_>,
    by_target: &HashMap<&str, Vec<&WarehouseMovement>>,
    audit: &mut dyn AuditSink,
) -> MatchResult {
    let mut result = MatchResult {
        po_number: line.po_number.clone(),
        item_code_source: line.item_code_source.clone(),
        target_item_code: String::new(),
        quantity: line.quantity_requested,
        lot: String::new(),
        manufacture_date: None,
        expiry_date: None,
        document_ref: String::new(),
        customer: String::new(),
        match_status: MatchStatus::NoMapping,
    };

    let Some(entry) = index.get(&line.item_code_source) else {
        audit.record(
            AuditEvent::warn(Stage::Mapping, "item code has no mapping")
                .field("po_number", line.po_number.as_str())
                .field("item_code_source", line.item_code_source.as_str()),
        );
        return result;
    };
    result.target_item_code = entry.target_item_code.clone();

    let candidates = by_target
        .get(entry.target_item_code.as_str())
        .map(|v| v.as_slice())
        .unwrap_or(&[]);
    let Some(best) = select_movement(candidates) else {
        result.match_status = MatchStatus::NoMatch;
        audit.record(
            AuditEvent::warn(Stage::Warehouse, "no outbound sale movements for item")
                .field("po_number", line.po_number.as_str())
                .field("item_code_source", line.item_code_source.as_str())
                .field("target_item_code", entry.target_item_code.as_str()),
        );
        return result;
    };

    result.match_status = if best.quantity.abs() < line.quantity_requested {
        MatchStatus::QtyWarning
    } else {
        MatchStatus::Ok
    };
    result.lot = best.lot.clone();
    result.manufacture_date = best.manufacture_date;
    result.expiry_date = best.expiry_date;
    result.document_ref = best.document_ref.clone();
    result.customer = best.customer.clone();

    let movement_date = best
        .movement_date
        .map(|d| Value::from(d.to_string()))
        .unwrap_or(Value::Null);
    audit.record(
        AuditEvent::info(Stage::Match, "movement selected")
            .field("po_number", line.po_number.as_str())
            .field("item_code_source", line.item_code_source.as_str())
            .field("target_item_code", entry.target_item_code.as_str())
            .field("document_ref", best.document_ref.as_str())
            .field("lot", best.lot.as_str())
            .field("movement_date", movement_date)
            .field("qty_requested", line.quantity_requested)
            .field("qty_movement", best.quantity)
            .field("status", result.match_status.to_string()),
    );

    result
}

/// Most recent movement; on equal dates the earliest in input order wins.
/// Undated movements rank below dated ones.
pub fn select_movement<'a>(candidates: &[&'a WarehouseMovement]) -> Option<&'a WarehouseMovement> {
    let mut best: Option<&'a WarehouseMovement> = None;
    for &candidate in candidates {
        match best {
            Some(current) if candidate.movement_date <= current.movement_date => {}
            _ => best = Some(candidate),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditLog, Severity};
    use chrono::NaiveDate;

    fn line(po: &str, item: &str, qty: f64) -> OrderLine {
        OrderLine {
            po_number: po.into(),
            item_code_source: item.into(),
            quantity_requested: qty,
            description: None,
            price_unit: None,
            currency: None,
            delivery_date: None,
        }
    }

    fn map(source: &str, target: &str) -> MappingEntry {
        MappingEntry {
            source_item_code: source.into(),
            target_item_code: target.into(),
            description: String::new(),
            units_per_box: 1,
            boxes_per_pallet: 1,
        }
    }

    fn mv(target: &str, doc: &str, qty: f64, date: Option<&str>) -> WarehouseMovement {
        WarehouseMovement {
            document_type: "Albarán venta".into(),
            document_ref: doc.into(),
            target_item_code: target.into(),
            lot: format!("LOT-{doc}"),
            manufacture_date: NaiveDate::from_ymd_opt(2024, 1, 10),
            expiry_date: NaiveDate::from_ymd_opt(2026, 1, 10),
            quantity: qty,
            customer: "ACME".into(),
            movement_date: date.map(|d| {
                NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap().and_hms_opt(0, 0, 0).unwrap()
            }),
        }
    }

    #[test]
    fn no_mapping_leaves_everything_blank() {
        let mut audit = AuditLog::new();
        let out = match_orders(
            &[line("45001", "AS-404", 5.0)],
            &[map("AS-1", "NAV-1")],
            &[mv("NAV-1", "ALB-1", 10.0, Some("2024-02-01"))],
            &mut audit,
        );
        assert_eq!(out.len(), 1);
        let r = &out[0];
        assert_eq!(r.match_status, MatchStatus::NoMapping);
        assert_eq!(r.target_item_code, "");
        assert_eq!(r.lot, "");
        assert_eq!(r.manufacture_date, None);
        assert_eq!(r.expiry_date, None);
        assert_eq!(r.quantity, 5.0);

        assert_eq!(audit.len(), 1);
        let event = &audit.events()[0];
        assert_eq!(event.severity, Severity::Warn);
        assert_eq!(event.get("item_code_source"), Some(&Value::from("AS-404")));
    }

    #[test]
    fn no_match_keeps_target_code() {
        let mut audit = AuditLog::new();
        let out = match_orders(
            &[line("45001", "AS-1", 5.0)],
            &[map("AS-1", "NAV-1")],
            &[mv("NAV-2", "ALB-1", 10.0, Some("2024-02-01"))],
            &mut audit,
        );
        assert_eq!(out[0].match_status, MatchStatus::NoMatch);
        assert_eq!(out[0].target_item_code, "NAV-1");
        assert_eq!(out[0].lot, "");
        assert_eq!(out[0].document_ref, "");
        assert_eq!(audit.by_stage(Stage::Warehouse).count(), 1);
    }

    #[test]
    fn most_recent_movement_wins() {
        let mut audit = AuditLog::new();
        let out = match_orders(
            &[line("45001", "AS-1", 5.0)],
            &[map("AS-1", "NAV-1")],
            &[
                mv("NAV-1", "OLD", 10.0, Some("2024-02-01")),
                mv("NAV-1", "NEW", 10.0, Some("2024-03-01")),
                mv("NAV-1", "UNDATED", 10.0, None),
            ],
            &mut audit,
        );
        assert_eq!(out[0].match_status, MatchStatus::Ok);
        assert_eq!(out[0].document_ref, "NEW");
        assert_eq!(out[0].lot, "LOT-NEW");
        assert_eq!(out[0].customer, "ACME");

        let event = audit.by_stage(Stage::Match).next().unwrap();
        assert_eq!(event.get("document_ref"), Some(&Value::from("NEW")));
        assert_eq!(event.get("status"), Some(&Value::from("ok")));
    }

    #[test]
    fn equal_dates_first_in_input_wins() {
        let a = mv("NAV-1", "FIRST", 10.0, Some("2024-03-01"));
        let b = mv("NAV-1", "SECOND", 10.0, Some("2024-03-01"));
        assert_eq!(select_movement(&[&a, &b]).unwrap().document_ref, "FIRST");

        let u1 = mv("NAV-1", "U1", 1.0, None);
        let u2 = mv("NAV-1", "U2", 1.0, None);
        assert_eq!(select_movement(&[&u1, &u2]).unwrap().document_ref, "U1");
        assert!(select_movement(&[]).is_none());
    }

    #[test]
    fn short_quantity_warns_by_magnitude() {
        let mut audit = AuditLog::new();
        let lines = [line("1", "AS-1", 10.0), line("2", "AS-2", 10.0), line("3", "AS-3", 10.0)];
        let out = match_orders(
            &lines,
            &[map("AS-1", "NAV-1"), map("AS-2", "NAV-2"), map("AS-3", "NAV-3")],
            &[
                // Outbound movements are often negative: only magnitude counts
                mv("NAV-1", "A", -8.0, Some("2024-03-01")),
                mv("NAV-2", "B", -10.0, Some("2024-03-01")),
                mv("NAV-3", "C", 12.0, Some("2024-03-01")),
            ],
            &mut audit,
        );
        assert_eq!(out[0].match_status, MatchStatus::QtyWarning);
        assert_eq!(out[1].match_status, MatchStatus::Ok);
        assert_eq!(out[2].match_status, MatchStatus::Ok);
        // Requested quantity is reported untouched
        assert_eq!(out[0].quantity, 10.0);
    }

    #[test]
    fn first_mapping_entry_wins() {
        let mut audit = AuditLog::new();
        let out = match_orders(
            &[line("1", "AS-1", 1.0)],
            &[map("AS-1", "NAV-1"), map("AS-1", "NAV-2")],
            &[mv("NAV-2", "X", 1.0, Some("2024-03-01"))],
            &mut audit,
        );
        assert_eq!(out[0].target_item_code, "NAV-1");
        assert_eq!(out[0].match_status, MatchStatus::NoMatch);
    }

    #[test]
    fn blank_target_code_is_no_mapping() {
        let mut audit = AuditLog::new();
        let out = match_orders(
            &[line("45001", "AS-1", 5.0)],
            &[map("AS-1", "")],
            &[mv("", "ALB-X", 5.0, Some("2024-02-01"))],
            &mut audit,
        );
        assert_eq!(out[0].match_status, MatchStatus::NoMapping);
        assert_eq!(out[0].target_item_code, "");
        assert_eq!(out[0].document_ref, "");
        assert_eq!(out[0].lot, "");
        assert_eq!(audit.by_stage(Stage::Mapping).count(), 1);
    }
}
