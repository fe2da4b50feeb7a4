//! The `CASETBL` payload a `switch` instruction's operand points at.

use crate::error::AmxResult;
use crate::types::Cell;

/// One decoded case table: a default target plus a list of
/// `(value, address)` pairs, both addresses already normalized to be
/// relative to the start of the code section (the file stores them as
/// absolute addresses only in the original plugin ABI; here they come
/// in already relative, matching every other address this crate uses).
#[derive(Debug, Clone)]
pub struct CaseTable {
    /// `(value, address)` for each case, not including the default.
    cases: Vec<(Cell, Cell)>,
    default_address: Cell,
}

impl CaseTable {
    /// Read a case table out of a code section, starting right after a
    /// `switch` instruction's operand (i.e. `address` is the absolute
    /// offset a `switch`'s single operand resolves to).
    ///
    /// Layout: one cell holding the case count, then `count + 1`
    /// `(value, address)` pairs where the first pair is the default
    /// (its value slot is unused).
    pub fn read(code: &[u8], address: usize) -> AmxResult<Self> {
        let count = read_cell(code, address)?;
        let num_records = count as usize + 1;

        let mut default_address = 0;
        let mut cases = Vec::with_capacity(num_records.saturating_sub(1));

        for i in 0..num_records {
            let record_offset = address + (1 + i * 2) * std::mem::size_of::<Cell>();
            let value = read_cell(code, record_offset)?;
            let addr = read_cell(code, record_offset + std::mem::size_of::<Cell>())?;
            if i == 0 {
                default_address = addr;
            } else {
                cases.push((value, addr));
            }
        }

        Ok(Self {
            cases,
            default_address,
        })
    }

    pub fn num_cases(&self) -> usize {
        self.cases.len()
    }

    pub fn value(&self, index: usize) -> Cell {
        self.cases[index].0
    }

    pub fn address(&self, index: usize) -> Cell {
        self.cases[index].1
    }

    pub fn default_address(&self) -> Cell {
        self.default_address
    }

    pub fn min_value(&self) -> Option<Cell> {
        self.cases.iter().map(|(v, _)| *v).min()
    }

    pub fn max_value(&self) -> Option<Cell> {
        self.cases.iter().map(|(v, _)| *v).max()
    }
}

fn read_cell(code: &[u8], offset: usize) -> AmxResult<Cell> {
    if offset + 4 > code.len() {
        return Err(crate::error::AmxRuntimeError::InvalidMemoryAccess(offset));
    }
    Ok(Cell::from_le_bytes([
        code[offset],
        code[offset + 1],
        code[offset + 2],
        code[offset + 3],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell_bytes(values: &[i32]) -> Vec<u8> {
        let mut out = Vec::new();
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    #[test]
    fn reads_default_and_cases() {
        let code = cell_bytes(&[
            2,  // 2 cases
            0, 10,  // default (value ignored), address 10
            1, 20,  // case value 1 -> address 20
            2, 30,  // case value 2 -> address 30
        ]);
        let table = CaseTable::read(&code, 0).unwrap();
        assert_eq!(table.num_cases(), 2);
        assert_eq!(table.default_address(), 10);
        assert_eq!(table.value(0), 1);
        assert_eq!(table.address(0), 20);
        assert_eq!(table.min_value(), Some(1));
        assert_eq!(table.max_value(), Some(2));
    }

    #[test]
    fn handles_no_cases() {
        let code = cell_bytes(&[0, 0, 99]);
        let table = CaseTable::read(&code, 0).unwrap();
        assert_eq!(table.num_cases(), 0);
        assert_eq!(table.default_address(), 99);
        assert_eq!(table.min_value(), None);
    }
}
