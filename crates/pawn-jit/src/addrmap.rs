//! The address map: one `{amx_address, jit_offset}` entry per decoded
//! instruction, sorted by AMX address, stored right after the RIB in
//! the code buffer. Grounded in `InstrTableEntry` plus the
//! `GetJITInstrPtr`/`GetANXAddressByJITInstrPtr` binary-search helpers
//! in `compiler_impl.cpp`.

use std::mem::size_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct AddressMapEntry {
    pub amx_address: u32,
    pub jit_offset: u32,
}

pub const ENTRY_SIZE: usize = size_of::<AddressMapEntry>();

/// Build the sorted table from the `{amx address -> code offset}`
/// recordings a compile pass makes as it translates each instruction.
pub fn build_sorted(mut entries: Vec<AddressMapEntry>) -> Vec<AddressMapEntry> {
    entries.sort_by_key(|e| e.amx_address);
    entries
}

/// Binary search from an AMX address to the generated code offset for
/// that instruction. Mirrors `GetJITInstrPtr`.
pub fn lookup_by_amx_address(table: &[AddressMapEntry], amx_address: u32) -> Option<u32> {
    table
        .binary_search_by_key(&amx_address, |e| e.amx_address)
        .ok()
        .map(|i| table[i].jit_offset)
}

/// Binary search from a generated code offset back to the AMX address
/// it was translated from. The table is sorted by AMX address, not by
/// offset, so this is a linear scan in the reference implementation's
/// reverse helper too (offsets are not monotonic with respect to AMX
/// addresses once conditional branches reorder blocks) - kept as a
/// linear scan here for the same reason.
pub fn lookup_by_jit_offset(table: &[AddressMapEntry], jit_offset: u32) -> Option<u32> {
    table
        .iter()
        .find(|e| e.jit_offset == jit_offset)
        .map(|e| e.amx_address)
}

/// Emit `entries.len()` zeroed dummy slots, to be filled in after
/// assembly once every instruction's final code offset is known.
pub fn emit_placeholder(asm: &mut crate::assembler::Assembler, count: usize) {
    for _ in 0..count {
        asm.dd(0);
        asm.dd(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(addr: u32, off: u32) -> AddressMapEntry {
        AddressMapEntry {
            amx_address: addr,
            jit_offset: off,
        }
    }

    #[test]
    fn sorts_by_amx_address() {
        let table = build_sorted(vec![entry(40, 12), entry(0, 0), entry(20, 6)]);
        assert_eq!(table, vec![entry(0, 0), entry(20, 6), entry(40, 12)]);
    }

    #[test]
    fn forward_and_reverse_lookup_round_trip() {
        let table = build_sorted(vec![entry(0, 0), entry(20, 6), entry(40, 12)]);
        assert_eq!(lookup_by_amx_address(&table, 20), Some(6));
        assert_eq!(lookup_by_amx_address(&table, 21), None);
        assert_eq!(lookup_by_jit_offset(&table, 12), Some(40));
    }
}
