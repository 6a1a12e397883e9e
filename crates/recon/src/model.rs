use std::fmt;

use chrono::NaiveDate;
use despatch_sscc::Sscc;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Match results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Ok,
    QtyWarning,
    NoMapping,
    NoMatch,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::QtyWarning => write!(f, "qty_warning"),
            Self::NoMapping => write!(f, "no_mapping"),
            Self::NoMatch => write!(f, "no_match"),
        }
    }
}

impl MatchStatus {
    /// A warehouse movement was selected for the line.
    pub fn is_matched(self) -> bool {
        matches!(self, Self::Ok | Self::QtyWarning)
    }
}

/// One per order line. Blank fields are empty strings / `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub po_number: String,
    pub item_code_source: String,
    pub target_item_code: String,
    /// Requested quantity, as ordered.
    pub quantity: f64,
    pub lot: String,
    pub manufacture_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub document_ref: String,
    pub customer: String,
    pub match_status: MatchStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    pub total: usize,
    pub ok: usize,
    pub qty_warning: usize,
    pub no_mapping: usize,
    pub no_match: usize,
}

// ---------------------------------------------------------------------------
// Despatch output
// ---------------------------------------------------------------------------

/// Row handed to the external despatch-advice writer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DespatchRow {
    pub po_number: String,
    pub item_code_source: String,
    pub target_item_code: String,
    pub shipped_quantity: f64,
    pub lot: String,
    pub manufacture_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    /// Box (UE) identifier.
    pub box_sscc: Option<Sscc>,
    /// Pallet (UX) identifier.
    pub pallet_sscc: Option<Sscc>,
    pub despatch_advice_id: String,
    pub customer: String,
    /// `None` for rows produced by the fallback path.
    pub match_status: Option<MatchStatus>,
}

impl DespatchRow {
    pub fn from_match(m: &MatchResult) -> Self {
        Self {
            po_number: m.po_number.clone(),
            item_code_source: m.item_code_source.clone(),
            target_item_code: m.target_item_code.clone(),
            shipped_quantity: m.quantity,
            lot: m.lot.clone(),
            manufacture_date: m.manufacture_date,
            expiry_date: m.expiry_date,
            box_sscc: None,
            pallet_sscc: None,
            despatch_advice_id: despatch_advice_id(&m.document_ref, &m.po_number),
            customer: m.customer.clone(),
            match_status: Some(m.match_status),
        }
    }
}

/// The warehouse document reference, or `DA-<po>` when there is none.
pub fn despatch_advice_id(document_ref: &str, po_number: &str) -> String {
    if document_ref.is_empty() {
        format!("DA-{po_number}")
    } else {
        document_ref.to_string()
    }
}
