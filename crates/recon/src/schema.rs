//! Declarative canonical-field tables and header resolution.
//!
//! Each input table declares, per canonical field, the header spellings it
//! accepts. A table is resolved once, eagerly, before any row is read:
//! either every required field maps to a column or the whole table fails
//! with a [`SchemaError`].

use std::collections::HashMap;

use crate::error::SchemaError;

// Canonical field names
pub const PO_NUMBER: &str = "po_number";
pub const ITEM_CODE: &str = "item_code";
pub const QUANTITY: &str = "quantity";
pub const DESCRIPTION: &str = "description";
pub const PRICE_UNIT: &str = "price_unit";
pub const CURRENCY: &str = "currency";
pub const DELIVERY_DATE: &str = "delivery_date";
pub const SOURCE_ITEM_CODE: &str = "source_item_code";
pub const TARGET_ITEM_CODE: &str = "target_item_code";
pub const UNITS_PER_BOX: &str = "units_per_box";
pub const BOXES_PER_PALLET: &str = "boxes_per_pallet";
pub const DOCUMENT_TYPE: &str = "document_type";
pub const DOCUMENT_REF: &str = "document_ref";
pub const LOT: &str = "lot";
pub const MANUFACTURE_DATE: &str = "manufacture_date";
pub const EXPIRY_DATE: &str = "expiry_date";
pub const CUSTOMER: &str = "customer";
pub const MOVEMENT_DATE: &str = "movement_date";

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    /// Accepted header spellings, in priority order.
    pub variants: Vec<String>,
}

impl FieldSpec {
    fn new(name: &'static str, required: bool, variants: &[&str]) -> Self {
        Self {
            name,
            required,
            variants: variants.iter().map(|v| v.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl TableSchema {
    /// Purchase-order lines.
    pub fn purchase_orders() -> Self {
        Self {
            table: "po",
            fields: vec![
                FieldSpec::new(PO_NUMBER, true, &["PO", "PO Number", "PO_PoNumber"]),
                FieldSpec::new(
                    ITEM_CODE,
                    true,
                    &["Item Number", "Customer Material Number", "Material Number"],
                ),
                FieldSpec::new(
                    QUANTITY,
                    true,
                    &["Requested quantity", "Ordered Quantity", "Quantity"],
                ),
                FieldSpec::new(DESCRIPTION, false, &["PO Line Desc.", "Description"]),
                FieldSpec::new(PRICE_UNIT, false, &["Price Unit", "Net Price"]),
                FieldSpec::new(CURRENCY, false, &["Currency"]),
                FieldSpec::new(
                    DELIVERY_DATE,
                    false,
                    &["Promised date", "Requested date", "Delivery Date"],
                ),
            ],
        }
    }

    /// Source → target item-code cross references.
    pub fn mapping() -> Self {
        Self {
            table: "mapping",
            fields: vec![
                FieldSpec::new(
                    SOURCE_ITEM_CODE,
                    true,
                    &["Codigo_SAP_ItemNumber", "Item_AS", "ItemNumber_AS"],
                ),
                FieldSpec::new(
                    TARGET_ITEM_CODE,
                    true,
                    &["Codigo_Navision", "Item_Nav", "ItemNumber_Nav"],
                ),
                FieldSpec::new(DESCRIPTION, false, &["Descripcion", "Description"]),
                FieldSpec::new(UNITS_PER_BOX, false, &["UnitsPerBox", "Units per box"]),
                FieldSpec::new(BOXES_PER_PALLET, false, &["BoxesPerPallet", "Boxes per pallet"]),
            ],
        }
    }

    /// Warehouse movement ledger.
    pub fn warehouse() -> Self {
        Self {
            table: "warehouse",
            fields: vec![
                FieldSpec::new(
                    DOCUMENT_TYPE,
                    true,
                    &["Tipo documento", "Tipo movimiento", "Tipo", "Document Type"],
                ),
                FieldSpec::new(
                    DOCUMENT_REF,
                    true,
                    &["Nº documento", "No documento", "Nº doc.", "Albarán", "Document No."],
                ),
                FieldSpec::new(
                    TARGET_ITEM_CODE,
                    true,
                    &["PN GECI", "Nº producto", "Producto", "Item"],
                ),
                FieldSpec::new(LOT, true, &["Nº lote", "Lote", "Lot"]),
                FieldSpec::new(
                    MANUFACTURE_DATE,
                    false,
                    &["Fecha Fabricación", "Fecha fabricacion", "Fecha_Fabricacion", "Manufacture Date"],
                ),
                FieldSpec::new(
                    EXPIRY_DATE,
                    false,
                    &["Fecha caducidad", "Fecha Caducidad", "Fecha_Caducidad", "Expiry Date"],
                ),
                FieldSpec::new(QUANTITY, true, &["Cantidad", "Qty", "Quantity"]),
                FieldSpec::new(CUSTOMER, false, &["Nombre cliente", "Cliente", "Customer"]),
                FieldSpec::new(MOVEMENT_DATE, true, &["Fecha registro", "Fecha", "Posting Date"]),
            ],
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Append extra accepted spellings for `field`. Returns false for an unknown field.
    pub fn add_variants(&mut self, field: &str, variants: &[String]) -> bool {
        match self.fields.iter_mut().find(|f| f.name == field) {
            Some(spec) => {
                spec.variants.extend(variants.iter().cloned());
                true
            }
            None => false,
        }
    }

    /// Map every field to its column. Fails listing all unresolved required fields.
    pub fn resolve(&self, headers: &[String]) -> Result<ResolvedSchema, SchemaError> {
        let keys: Vec<String> = headers.iter().map(|h| header_key(h)).collect();
        let mut columns = HashMap::new();
        let mut missing = Vec::new();

        for field in &self.fields {
            let found = field.variants.iter().find_map(|variant| {
                let wanted = header_key(variant);
                keys.iter().position(|k| *k == wanted)
            });
            match found {
                Some(idx) => {
                    columns.insert(field.name, idx);
                }
                None if field.required => missing.push(field.name.to_string()),
                None => {}
            }
        }

        if !missing.is_empty() {
            return Err(SchemaError {
                table: self.table.to_string(),
                missing,
                headers: headers.to_vec(),
            });
        }

        Ok(ResolvedSchema { columns })
    }
}

/// Column index per resolved canonical field.
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    columns: HashMap<&'static str, usize>,
}

impl ResolvedSchema {
    pub fn column(&self, field: &str) -> Option<usize> {
        self.columns.get(field).copied()
    }

    /// Trimmed cell for `field`; empty when the field is unresolved or the row is short.
    pub fn cell<'r>(&self, row: &'r [String], field: &str) -> &'r str {
        self.column(field)
            .and_then(|idx| row.get(idx))
            .map(|c| c.trim())
            .unwrap_or("")
    }

    /// Like [`cell`](Self::cell) but `None` when blank.
    pub fn opt_cell(&self, row: &[String], field: &str) -> Option<String> {
        let value = self.cell(row, field);
        (!value.is_empty()).then(|| value.to_string())
    }
}

/// Comparison key: BOM stripped, trimmed, lowercased, inner whitespace collapsed.
pub fn header_key(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
