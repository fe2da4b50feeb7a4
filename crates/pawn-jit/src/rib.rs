//! The Runtime Information Block: a fixed record at offset 0 of every
//! compiled module's code buffer, grounded in `CompilerImpl`'s
//! `EmitRuntimeInfo`/post-assembly patching pass.
//!
//! This is a trimmed version of the reference layout: the original's
//! `ebp_save`/`esp_save`/`amx_ebp`/`amx_esp` slots exist to let
//! generated code itself perform the native-stack <-> AMX-stack swap
//! on every call and every `sysreq`. Here that swap happens exactly
//! once, in [`crate::exec::call_entry_point`]'s inline assembly bridge,
//! so only the fields generated code actually reads survive: the live
//! AMX pointer (read by `LCTRL`/`SCTRL`/`SYSREQ`/`HEAP` lowering) and
//! the native-register rollback pair `call_entry_point` stashes here
//! right before jumping in, so the halt trampoline can unwind back to
//! it without going back through Rust. `ResetStk`/`ResetHea` are not
//! duplicated here - those already live on `AmxRegisters` itself
//! (`reset_stk`/`reset_hea`), which is what `rollback()` operates on.

use std::mem::size_of;

use crate::assembler::{Assembler, Label};

pub const RIB_FIELD_COUNT: usize = 5;
pub const RIB_SIZE: usize = RIB_FIELD_COUNT * size_of::<u32>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum RibField {
    AmxPtr = 0,
    ResetEbp = 1,
    ResetEsp = 2,
    InstrTablePtr = 3,
    InstrTableSize = 4,
}

/// Labels bound to each RIB field's byte offset, for generated code
/// that needs to read a field via `Assembler::mov_r_abs`/`lea_r_abs`.
#[derive(Debug, Clone, Copy)]
pub struct RibLabels {
    pub amx_ptr: Label,
    pub reset_ebp: Label,
    pub reset_esp: Label,
    pub instr_table_ptr: Label,
    pub instr_table_size: Label,
}

/// Read/write view over the RIB sitting at the front of a mapped code
/// buffer. `base` must point at a region at least [`RIB_SIZE`] bytes
/// long.
pub struct Rib {
    base: *mut u8,
}

impl Rib {
    /// # Safety
    /// `base` must point at a writable region of at least [`RIB_SIZE`]
    /// bytes for the lifetime of the returned `Rib`.
    pub unsafe fn at(base: *mut u8) -> Self {
        Self { base }
    }

    fn slot(&self, field: RibField) -> *mut u32 {
        unsafe { self.base.add(field as usize * size_of::<u32>()) as *mut u32 }
    }

    pub fn get(&self, field: RibField) -> u32 {
        unsafe { self.slot(field).read_unaligned() }
    }

    pub fn set(&mut self, field: RibField, value: u32) {
        unsafe { self.slot(field).write_unaligned(value) }
    }

    /// Patch the pointer-valued fields from buffer-relative offsets
    /// (recorded while still being assembled) into absolute addresses,
    /// now that the buffer has a final home in memory, and plant the
    /// live AMX pointer this compile is bound to.
    pub fn relocate(&mut self, code_base: usize, amx_ptr: usize) {
        let table_off = self.get(RibField::InstrTablePtr) as usize;
        self.set(RibField::InstrTablePtr, (code_base + table_off) as u32);
        self.set(RibField::AmxPtr, amx_ptr as u32);
    }
}

/// Emit the RIB at the current position of the code buffer (must be
/// position 0), binding a label to each field's offset so later
/// lowering can reference them. `instr_table_size` is known up front
/// (the decoded instruction count) and baked in directly; the other
/// fields are filled in later (`ResetEbp`/`ResetEsp` at each call by
/// `call_entry_point`, `AmxPtr`/`InstrTablePtr` by [`Rib::relocate`]).
pub fn emit_placeholder(asm: &mut Assembler, instr_count: u32) -> RibLabels {
    let amx_ptr = asm.new_label();
    let reset_ebp = asm.new_label();
    let reset_esp = asm.new_label();
    let instr_table_ptr = asm.new_label();
    let instr_table_size = asm.new_label();

    asm.bind(amx_ptr);
    asm.dd(0);
    asm.bind(reset_ebp);
    asm.dd(0);
    asm.bind(reset_esp);
    asm.dd(0);
    asm.bind(instr_table_ptr);
    asm.dd(0);
    asm.bind(instr_table_size);
    asm.dd(instr_count);

    RibLabels {
        amx_ptr,
        reset_ebp,
        reset_esp,
        instr_table_ptr,
        instr_table_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_offsets_match_declaration_order() {
        assert_eq!(RibField::AmxPtr as usize, 0);
        assert_eq!(RibField::InstrTableSize as usize, 4);
        assert_eq!(RIB_SIZE, 20);
    }

    #[test]
    fn relocate_turns_offsets_into_absolute_pointers() {
        let mut buf = vec![0u8; RIB_SIZE];
        let mut rib = unsafe { Rib::at(buf.as_mut_ptr()) };
        rib.set(RibField::InstrTablePtr, 0x100);
        rib.relocate(0x1000, 0xdead_beef);
        assert_eq!(rib.get(RibField::InstrTablePtr), 0x1100);
        assert_eq!(rib.get(RibField::AmxPtr), 0xdead_beef);
    }

    #[test]
    fn emit_placeholder_binds_labels_at_field_offsets() {
        let mut asm = Assembler::new();
        let labels = emit_placeholder(&mut asm, 42);
        asm.patch_all();
        let code = asm.into_code();
        assert_eq!(code.len(), RIB_SIZE);
        assert_eq!(
            u32::from_le_bytes(code[16..20].try_into().unwrap()),
            42,
            "instr_table_size baked in directly"
        );
        let _ = labels.amx_ptr;
        let _ = labels.reset_ebp;
        let _ = labels.reset_esp;
        let _ = labels.instr_table_size;
    }
}
