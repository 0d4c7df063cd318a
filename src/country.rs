//! Dense country table: `countryId -> ISO alpha-3 code` plus the inverse.
//!
//! The table is dense because the blob stores it positionally: the entry at
//! index `k` is the code for id `k`, and gaps hold the empty code.
//! Id 0 is reserved for "no country" and always maps to the empty code.

use crate::error::{AtlasError, Result};

/// Fixed code width in the table and the blob.
pub const CODE_LEN: usize = 3;

/// Dense `countryId -> ISO code` mapping with a sorted inverse index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryTable {
    codes: Vec<[u8; CODE_LEN]>,
    // (code, id) sorted by code, empty entries excluded.
    by_code: Vec<([u8; CODE_LEN], u16)>,
}

const EMPTY_CODE: [u8; CODE_LEN] = [b' '; CODE_LEN];

impl CountryTable {
    /// Table containing only the reserved ocean entry.
    pub fn empty() -> Self {
        Self {
            codes: vec![EMPTY_CODE],
            by_code: Vec::new(),
        }
    }

    /// Build from `(id, code)` pairs; ids may arrive in any order and with
    /// gaps, which are filled with the empty code. Id 0 must not be claimed.
    pub fn from_pairs(pairs: &[(u16, String)]) -> Result<Self> {
        let mut codes = vec![EMPTY_CODE];
        for &(id, ref code) in pairs {
            if id == 0 {
                return Err(AtlasError::InvalidConfig(
                    "country id 0 is reserved for ocean".into(),
                ));
            }
            if !code.is_ascii() || code.len() > CODE_LEN {
                return Err(AtlasError::InvalidConfig(format!(
                    "country code {code:?} is not a short ASCII code"
                )));
            }
            let idx = usize::from(id);
            if idx >= codes.len() {
                codes.resize(idx + 1, EMPTY_CODE);
            }
            let mut fixed = EMPTY_CODE;
            fixed[..code.len()].copy_from_slice(code.as_bytes());
            codes[idx] = fixed;
        }
        Ok(Self::from_dense(codes))
    }

    /// Build from an already-dense code list (index = id), as decoded from
    /// a blob header.
    pub fn from_dense(codes: Vec<[u8; CODE_LEN]>) -> Self {
        let mut by_code: Vec<([u8; CODE_LEN], u16)> = codes
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, code)| **code != EMPTY_CODE)
            .map(|(id, code)| (*code, id as u16))
            .collect();
        by_code.sort_unstable();
        Self { codes, by_code }
    }

    /// Number of entries, the reserved id 0 included.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        // Entry 0 always exists.
        false
    }

    /// ISO code for an id; empty for ocean, gaps, and out-of-range ids.
    pub fn code(&self, id: u16) -> &str {
        let raw = self
            .codes
            .get(usize::from(id))
            .map(|c| c.as_slice())
            .unwrap_or(&EMPTY_CODE);
        // Stored codes are validated ASCII.
        std::str::from_utf8(raw).unwrap_or("").trim_end()
    }

    /// Id for a code, 0 if unknown. Codes shorter than the fixed width match
    /// their space-padded form.
    pub fn id_for_code(&self, code: &str) -> u16 {
        if !code.is_ascii() || code.len() > CODE_LEN {
            return 0;
        }
        let mut fixed = EMPTY_CODE;
        fixed[..code.len()].copy_from_slice(code.as_bytes());
        match self.by_code.binary_search_by_key(&fixed, |&(c, _)| c) {
            Ok(pos) => self.by_code[pos].1,
            Err(_) => 0,
        }
    }

    /// Raw fixed-width rows in id order, for the serializer.
    pub fn dense_codes(&self) -> &[[u8; CODE_LEN]] {
        &self.codes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_zero() {
        let table = CountryTable::empty();
        assert_eq!(table.len(), 1);
        assert_eq!(table.code(0), "");
        assert_eq!(table.id_for_code(""), 0);
    }

    #[test]
    fn test_from_pairs_with_gaps() {
        let table =
            CountryTable::from_pairs(&[(3, "FRA".into()), (1, "USA".into())]).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.code(1), "USA");
        assert_eq!(table.code(2), "");
        assert_eq!(table.code(3), "FRA");
        assert_eq!(table.code(9), "");
    }

    #[test]
    fn test_inverse_lookup() {
        let table =
            CountryTable::from_pairs(&[(1, "USA".into()), (2, "BRA".into()), (3, "FRA".into())])
                .unwrap();
        assert_eq!(table.id_for_code("BRA"), 2);
        assert_eq!(table.id_for_code("FRA"), 3);
        assert_eq!(table.id_for_code("XXX"), 0);
        assert_eq!(table.id_for_code("WAYTOOLONG"), 0);
    }

    #[test]
    fn test_short_codes_space_padded() {
        let table = CountryTable::from_pairs(&[(1, "NO".into())]).unwrap();
        assert_eq!(table.code(1), "NO");
        assert_eq!(table.id_for_code("NO"), 1);
    }

    #[test]
    fn test_rejects_reserved_id() {
        assert!(CountryTable::from_pairs(&[(0, "BAD".into())]).is_err());
    }

    #[test]
    fn test_rejects_wide_code() {
        assert!(CountryTable::from_pairs(&[(1, "TOOWIDE".into())]).is_err());
    }
}
