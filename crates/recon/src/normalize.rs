//! Raw tables → typed records.
//!
//! Coercion never fails a row: unparseable quantities become 0 and
//! unparseable dates become `None`. Only schema resolution can fail.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::error::SchemaError;
use crate::schema::*;
use crate::table::RawTable;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderLine {
    pub po_number: String,
    pub item_code_source: String,
    pub quantity_requested: f64,
    pub description: Option<String>,
    pub price_unit: Option<f64>,
    pub currency: Option<String>,
    pub delivery_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingEntry {
    pub source_item_code: String,
    pub target_item_code: String,
    pub description: String,
    pub units_per_box: u32,
    pub boxes_per_pallet: u32,
}

impl MappingEntry {
    pub fn is_mapped(&self) -> bool {
        !self.target_item_code.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehouseMovement {
    pub document_type: String,
    pub document_ref: String,
    pub target_item_code: String,
    pub lot: String,
    pub manufacture_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub quantity: f64,
    pub customer: String,
    pub movement_date: Option<NaiveDateTime>,
}

// ---------------------------------------------------------------------------
// Table normalization
// ---------------------------------------------------------------------------

pub fn normalize_orders(table: &RawTable, schema: &TableSchema) -> Result<Vec<OrderLine>, SchemaError> {
    let cols = schema.resolve(&table.headers)?;
    Ok(data_rows(table)
        .map(|row| OrderLine {
            po_number: cols.cell(row, PO_NUMBER).to_string(),
            item_code_source: cols.cell(row, ITEM_CODE).to_string(),
            quantity_requested: parse_quantity(cols.cell(row, QUANTITY)),
            description: cols.opt_cell(row, DESCRIPTION),
            price_unit: cols.opt_cell(row, PRICE_UNIT).map(|p| parse_quantity(&p)),
            currency: cols.opt_cell(row, CURRENCY),
            delivery_date: parse_day(cols.cell(row, DELIVERY_DATE)),
        })
        .collect())
}

pub fn normalize_mapping(table: &RawTable, schema: &TableSchema) -> Result<Vec<MappingEntry>, SchemaError> {
    let cols = schema.resolve(&table.headers)?;
    Ok(data_rows(table)
        .map(|row| MappingEntry {
            source_item_code: cols.cell(row, SOURCE_ITEM_CODE).to_string(),
            target_item_code: cols.cell(row, TARGET_ITEM_CODE).to_string(),
            description: cols.cell(row, DESCRIPTION).to_string(),
            units_per_box: packing_factor(cols.cell(row, UNITS_PER_BOX)),
            boxes_per_pallet: packing_factor(cols.cell(row, BOXES_PER_PALLET)),
        })
        .collect())
}

/// Normalize warehouse rows, keeping only outbound-sale movement types.
///
/// A row is kept when its document type contains any of `sale_patterns`
/// (case-insensitive). Everything else is dropped without logging.
pub fn normalize_warehouse(
    table: &RawTable,
    schema: &TableSchema,
    sale_patterns: &[String],
) -> Result<Vec<WarehouseMovement>, SchemaError> {
    let cols = schema.resolve(&table.headers)?;
    let patterns: Vec<String> = sale_patterns.iter().map(|p| p.to_lowercase()).collect();

    Ok(data_rows(table)
        .filter(|row| {
            let doc_type = cols.cell(row, DOCUMENT_TYPE).to_lowercase();
            patterns.iter().any(|p| doc_type.contains(p.as_str()))
        })
        .map(|row| WarehouseMovement {
            document_type: cols.cell(row, DOCUMENT_TYPE).to_string(),
            document_ref: cols.cell(row, DOCUMENT_REF).to_string(),
            target_item_code: cols.cell(row, TARGET_ITEM_CODE).to_string(),
            lot: cols.cell(row, LOT).to_string(),
            manufacture_date: parse_day(cols.cell(row, MANUFACTURE_DATE)),
            expiry_date: parse_day(cols.cell(row, EXPIRY_DATE)),
            quantity: parse_quantity(cols.cell(row, QUANTITY)),
            customer: cols.cell(row, CUSTOMER).to_string(),
            movement_date: parse_date_time(cols.cell(row, MOVEMENT_DATE)),
        })
        .collect())
}

/// Rows with at least one non-blank cell. Spreadsheet exports often trail empty rows.
fn data_rows(table: &RawTable) -> impl Iterator<Item = &Vec<String>> {
    table.rows.iter().filter(|row| row.iter().any(|c| !c.trim().is_empty()))
}

// ---------------------------------------------------------------------------
// Mapping lookup
// ---------------------------------------------------------------------------

/// How packing factors were found for an order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorSource {
    ItemCode,
    Description,
    Default,
}

/// Source-code index over mapping entries. First entry per code wins.
///
/// An entry with a blank target code still supplies packing factors but does
/// not count as a mapping.
pub struct MappingIndex<'a> {
    entries: &'a [MappingEntry],
    by_code: HashMap<&'a str, &'a MappingEntry>,
    mapped: HashMap<&'a str, &'a MappingEntry>,
}

impl<'a> MappingIndex<'a> {
    pub fn new(entries: &'a [MappingEntry]) -> Self {
        let mut by_code = HashMap::new();
        let mut mapped = HashMap::new();
        for entry in entries {
            let code = entry.source_item_code.as_str();
            by_code.entry(code).or_insert(entry);
            if entry.is_mapped() {
                mapped.entry(code).or_insert(entry);
            }
        }
        Self { entries, by_code, mapped }
    }

    /// Mapping for a source code, if it has a non-blank target.
    pub fn get(&self, source_item_code: &str) -> Option<&'a MappingEntry> {
        self.mapped.get(source_item_code).copied()
    }

    /// Item-code lookup, then the first entry whose description contains the
    /// line's description (case-insensitive).
    pub fn lookup_for(&self, line: &OrderLine) -> Option<(&'a MappingEntry, FactorSource)> {
        if let Some(entry) = self.by_code.get(line.item_code_source.as_str()) {
            return Some((*entry, FactorSource::ItemCode));
        }
        let desc = line.description.as_deref()?.trim().to_lowercase();
        if desc.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.description.to_lowercase().contains(&desc))
            .map(|e| (e, FactorSource::Description))
    }
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

/// Numeric coercion. Accepts `,` as decimal separator; anything else becomes 0.
pub fn parse_quantity(value: &str) -> f64 {
    let v = value.trim();
    let parsed = v
        .parse::<f64>()
        .ok()
        .or_else(|| v.replace(',', ".").parse::<f64>().ok());
    match parsed {
        Some(q) if q.is_finite() => q,
        _ => 0.0,
    }
}

/// Packing factor: integer part of the value, at least 1.
fn packing_factor(value: &str) -> u32 {
    let q = parse_quantity(value);
    if q >= 1.0 && q <= f64::from(u32::MAX) {
        q as u32
    } else {
        1
    }
}

/// Day-first date: `dd/mm/yyyy`, `dd-mm-yy`, `dd.mm.yyyy`, or ISO `yyyy-mm-dd`.
/// A trailing time component is ignored.
pub fn parse_day(value: &str) -> Option<NaiveDate> {
    parse_date_time(value).map(|dt| dt.date())
}

/// Day-first date with optional `HH:MM[:SS[.fff]]` time.
pub fn parse_date_time(value: &str) -> Option<NaiveDateTime> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    let (date_part, time_part) = match v.split_once(|c: char| c == ' ' || c == 'T') {
        Some((d, t)) => (d, Some(t.trim())),
        None => (v, None),
    };

    let date = parse_date_part(date_part)?;
    let time = match time_part {
        None | Some("") => NaiveTime::MIN,
        Some(t) => ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(t, fmt).ok())?,
    };
    Some(date.and_time(time))
}

fn parse_date_part(value: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = value.split(|c: char| matches!(c, '/' | '-' | '.')).collect();
    let [a, b, c] = parts.as_slice() else {
        return None;
    };
    if ![a, b, c].iter().all(|p| !p.is_empty() && p.bytes().all(|x| x.is_ascii_digit())) {
        return None;
    }

    let (year, month, day) = if a.len() == 4 {
        (a.parse::<i32>().ok()?, b.parse().ok()?, c.parse().ok()?)
    } else {
        let year = match c.len() {
            2 => 2000 + c.parse::<i32>().ok()?,
            4 => c.parse::<i32>().ok()?,
            _ => return None,
        };
        (year, b.parse().ok()?, a.parse().ok()?)
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("250"), 250.0);
        assert_eq!(parse_quantity(" 12.5 "), 12.5);
        assert_eq!(parse_quantity("12,5"), 12.5);
        assert_eq!(parse_quantity("-3"), -3.0);
        assert_eq!(parse_quantity("abc"), 0.0);
        assert_eq!(parse_quantity(""), 0.0);
        assert_eq!(parse_quantity("NaN"), 0.0);
        assert_eq!(parse_quantity("inf"), 0.0);
    }

    #[test]
    fn factors_floor_at_one() {
        assert_eq!(packing_factor("100"), 100);
        assert_eq!(packing_factor("12.9"), 12);
        assert_eq!(packing_factor("0"), 1);
        assert_eq!(packing_factor("-4"), 1);
        assert_eq!(packing_factor(""), 1);
    }

    #[test]
    fn dates_are_day_first() {
        assert_eq!(parse_day("05/03/2024"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_day("05-03-24"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_day("05.03.2024"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_day("2024-03-05"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_day("31/12/2025 00:00:00"), Some(ymd(2025, 12, 31)));
    }

    #[test]
    fn bad_dates_are_none() {
        assert_eq!(parse_day(""), None);
        assert_eq!(parse_day("13/13/2024"), None);
        assert_eq!(parse_day("soon"), None);
        assert_eq!(parse_day("1/2"), None);
        assert_eq!(parse_date_time("05/03/2024 25:99"), None);
    }

    #[test]
    fn times_are_kept() {
        let dt = parse_date_time("05/03/2024 14:30").unwrap();
        assert_eq!(dt, ymd(2024, 3, 5).and_hms_opt(14, 30, 0).unwrap());
        let iso = parse_date_time("2024-03-05T08:15:00").unwrap();
        assert_eq!(iso, ymd(2024, 3, 5).and_hms_opt(8, 15, 0).unwrap());
    }

    #[test]
    fn warehouse_keeps_only_sales() {
        let table = RawTable::from_rows(
            &["Tipo documento", "Nº documento", "PN GECI", "Lote", "Cantidad", "Fecha registro"],
            &[
                &["Albarán venta", "ALB-1", "NAV-1", "L1", "-10", "01/02/2024"],
                &["Transferencia", "TR-1", "NAV-1", "L1", "10", "01/02/2024"],
                &["SALE DISPATCH NOTE", "SDN-1", "NAV-2", "L2", "5", "02/02/2024"],
                &["", "", "", "", "", ""],
            ],
        );
        let patterns = vec!["sale dispatch note".to_string(), "venta".to_string()];
        let rows = normalize_warehouse(&table, &TableSchema::warehouse(), &patterns).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].document_ref, "ALB-1");
        assert_eq!(rows[0].quantity, -10.0);
        assert_eq!(rows[0].manufacture_date, None);
        assert_eq!(rows[0].customer, "");
        assert_eq!(rows[1].document_ref, "SDN-1");
    }

    #[test]
    fn order_optional_fields() {
        let table = RawTable::from_rows(
            &["PO", "Item Number", "Requested quantity", "Currency", "Net Price", "Promised date"],
            &[
                &["4500001", "AS-1", "10", "EUR", "2,50", "15/04/2024"],
                &["4500002", "AS-2", "x", "", "", ""],
            ],
        );
        let lines = normalize_orders(&table, &TableSchema::purchase_orders()).unwrap();
        assert_eq!(lines[0].currency.as_deref(), Some("EUR"));
        assert_eq!(lines[0].price_unit, Some(2.5));
        assert_eq!(lines[0].delivery_date, Some(ymd(2024, 4, 15)));
        assert_eq!(lines[0].description, None);
        assert_eq!(lines[1].quantity_requested, 0.0);
        assert_eq!(lines[1].currency, None);
    }

    #[test]
    fn order_schema_failure() {
        let table = RawTable::from_rows(&["PO", "Something"], &[]);
        let err = normalize_orders(&table, &TableSchema::purchase_orders()).unwrap_err();
        assert_eq!(err.missing, vec![ITEM_CODE, QUANTITY]);
    }

    fn entry(source: &str, target: &str, desc: &str) -> MappingEntry {
        MappingEntry {
            source_item_code: source.into(),
            target_item_code: target.into(),
            description: desc.into(),
            units_per_box: 1,
            boxes_per_pallet: 1,
        }
    }

    fn line(item: &str, desc: Option<&str>) -> OrderLine {
        OrderLine {
            po_number: "PO1".into(),
            item_code_source: item.into(),
            quantity_requested: 1.0,
            description: desc.map(String::from),
            price_unit: None,
            currency: None,
            delivery_date: None,
        }
    }

    #[test]
    fn mapping_first_entry_wins() {
        let entries = vec![entry("AS-1", "NAV-1", ""), entry("AS-1", "NAV-9", "")];
        let index = MappingIndex::new(&entries);
        assert_eq!(index.get("AS-1").unwrap().target_item_code, "NAV-1");
        assert!(index.get("AS-2").is_none());
    }

    #[test]
    fn blank_target_is_not_a_mapping() {
        let entries = vec![
            entry("AS-1", "  ", "Sealant"),
            entry("AS-2", "", ""),
            entry("AS-2", "NAV-2", ""),
        ];
        let index = MappingIndex::new(&entries);
        assert!(index.get("AS-1").is_none());
        assert_eq!(index.get("AS-2").unwrap().target_item_code, "NAV-2");

        // Factors still come from the first row for the code
        let (e, src) = index.lookup_for(&line("AS-1", None)).unwrap();
        assert_eq!((e.description.as_str(), src), ("Sealant", FactorSource::ItemCode));
    }

    #[test]
    fn mapping_description_fallback() {
        let entries = vec![entry("AS-1", "NAV-1", "Sealant Tube 50ml"), entry("AS-2", "NAV-2", "Primer")];
        let index = MappingIndex::new(&entries);

        let (e, src) = index.lookup_for(&line("AS-2", None)).unwrap();
        assert_eq!((e.target_item_code.as_str(), src), ("NAV-2", FactorSource::ItemCode));

        let (e, src) = index.lookup_for(&line("ZZ", Some("sealant tube"))).unwrap();
        assert_eq!((e.target_item_code.as_str(), src), ("NAV-1", FactorSource::Description));

        assert!(index.lookup_for(&line("ZZ", Some("  "))).is_none());
        assert!(index.lookup_for(&line("ZZ", None)).is_none());
    }
}
