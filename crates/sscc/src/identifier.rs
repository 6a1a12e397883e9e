//! SSCC-18 composition and check digit.
//!
//! Layout: `0` extension digit, 6-digit allocating-party id, 10-digit
//! sequence block (year prefix + zero-padded counter), check digit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const EXTENSION_DIGIT: char = '0';
pub const ARP_ID_LEN: usize = 6;
pub const SEQUENCE_BLOCK_LEN: usize = 10;
pub const SSCC_LEN: usize = 18;

/// A validated 18-digit identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sscc(String);

impl Sscc {
    /// Parse an externally supplied identifier, verifying length and check digit.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.len() != SSCC_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::InvalidDigits(format!(
                "identifier must be {SSCC_LEN} digits, got '{s}'"
            )));
        }
        let (base, last) = s.split_at(SSCC_LEN - 1);
        let expected = check_digit(base)?;
        let found = last.as_bytes()[0] - b'0';
        if expected != found {
            return Err(ValidationError::CheckDigitMismatch { expected, found });
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The sequence block (digits 8–17).
    pub fn sequence_block(&self) -> &str {
        &self.0[1 + ARP_ID_LEN..SSCC_LEN - 1]
    }
}

impl fmt::Display for Sscc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Sscc {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Mod-10 check digit over a 17-digit base, weights 3,1,3,... from the right.
pub fn check_digit(base17: &str) -> Result<u8, ValidationError> {
    if base17.len() != SSCC_LEN - 1 || !base17.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidDigits(format!(
            "base must be {} digits, got '{base17}'",
            SSCC_LEN - 1
        )));
    }
    let total: u32 = base17
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let weight = if i % 2 == 0 { 3 } else { 1 };
            u32::from(b - b'0') * weight
        })
        .sum();
    Ok(((10 - total % 10) % 10) as u8)
}

/// Year prefix (digits only) followed by `seq` zero-padded to the remaining width.
pub fn sequence_block(year_prefix: &str, seq: u64) -> Result<String, ValidationError> {
    let prefix: String = year_prefix.chars().filter(|c| c.is_ascii_digit()).collect();
    if prefix.len() > SEQUENCE_BLOCK_LEN {
        return Err(ValidationError::YearPrefixTooLong(year_prefix.to_string()));
    }
    let width = SEQUENCE_BLOCK_LEN - prefix.len();
    let fits = match 10u64.checked_pow(width as u32) {
        Some(limit) => seq < limit,
        None => true,
    };
    if !fits {
        return Err(ValidationError::SequenceOverflow { seq, width });
    }
    if width == 0 {
        return Ok(prefix);
    }
    Ok(format!("{prefix}{seq:0width$}"))
}

pub fn validate_arp_id(arp_id: &str) -> Result<(), ValidationError> {
    if arp_id.len() == ARP_ID_LEN && arp_id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidArpId(arp_id.to_string()))
    }
}

/// Build a full SSCC from its parts.
pub fn make_sscc(arp_id: &str, seq: u64, year_prefix: &str) -> Result<Sscc, ValidationError> {
    validate_arp_id(arp_id)?;
    let block = sequence_block(year_prefix, seq)?;
    let base = format!("{EXTENSION_DIGIT}{arp_id}{block}");
    let cd = check_digit(&base)?;
    Ok(Sscc(format!("{base}{cd}")))
}
