//! Raw input tables: a header row plus string cells.
//!
//! The engine never reads spreadsheets itself. Callers hand over tables
//! already extracted from CSV or xlsx; CSV text can be loaded here.

use crate::error::DespatchError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Build from string slices. Handy for tests and in-memory callers.
    pub fn from_rows(headers: &[&str], rows: &[&[&str]]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Parse CSV text, sniffing the delimiter from the first lines.
    pub fn from_csv_str(data: &str) -> Result<Self, DespatchError> {
        let data = data.strip_prefix('\u{feff}').unwrap_or(data);
        Self::from_csv_str_with_delimiter(data, sniff_delimiter(data))
    }

    pub fn from_csv_str_with_delimiter(data: &str, delimiter: u8) -> Result<Self, DespatchError> {
        let data = data.strip_prefix('\u{feff}').unwrap_or(data);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(data.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| DespatchError::Io(e.to_string()))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| DespatchError::Io(e.to_string()))?;
            rows.push(record.iter().map(|c| c.to_string()).collect());
        }

        Ok(Self { headers, rows })
    }
}

/// Delimiters tried on the header row, in order of preference. Purchase-order
/// exports use `;` because their quantities carry `,` decimals.
const DELIMITERS: [u8; 4] = [b';', b',', b'\t', b'|'];

/// Pick the delimiter from the header row alone.
///
/// Data rows are ignored: comma decimals and free-text descriptions make
/// their field counts unreliable. The delimiter that splits the header into
/// the most fields wins; ties go to the earlier entry in [`DELIMITERS`].
fn sniff_delimiter(content: &str) -> u8 {
    let Some(header) = content.lines().find(|l| !l.trim().is_empty()) else {
        return b',';
    };

    let mut best = (b',', 1);
    for delim in DELIMITERS {
        let fields = header_fields(header, delim);
        if fields > best.1 {
            best = (delim, fields);
        }
    }
    best.0
}

fn header_fields(header: &str, delimiter: u8) -> usize {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_reader(header.as_bytes())
        .records()
        .next()
        .and_then(Result::ok)
        .map_or(1, |r| r.len())
}
