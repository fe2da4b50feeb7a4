//! `extern "C"` functions generated code calls into.
//!
//! Everything that genuinely needs a host callback - dispatching a
//! native, or resolving a dynamic (runtime-only-known) jump target -
//! goes through one of these, reached via [`crate::assembler::Assembler::call_extern`].
//! Their addresses are fixed for the life of the process, so a
//! generated `call` to one needs no relocation once emitted.

use crate::addrmap::{lookup_by_amx_address, lookup_by_jit_offset, AddressMapEntry};
use pawn_amx::types::{AmxError, Cell};
use pawn_amx::AmxRegisters;

/// Resolve an AMX code address to the absolute address of its
/// translated instruction. Used by `JUMP.PRI`, `SCTRL` (set CIP), and
/// `ExecContHelper`'s sleep-resume path. Returns 0 if the address
/// isn't the start of any decoded instruction (generated code treats
/// that as "continue as if nothing happened", matching the reference
/// interpreter's behavior for a jump to a non-instruction boundary).
///
/// # Safety
/// `table` must point at `len` valid [`AddressMapEntry`] values sorted
/// by `amx_address`, each already holding an *absolute* `jit_offset`
/// pointer (see [`crate::compiler`]'s relocation pass).
pub unsafe extern "C" fn jit_lookup_address(
    table: *const AddressMapEntry,
    len: u32,
    amx_address: u32,
) -> u32 {
    let slice = unsafe { std::slice::from_raw_parts(table, len as usize) };
    lookup_by_amx_address(slice, amx_address).unwrap_or(0)
}

/// Reverse of [`jit_lookup_address`]: map a return address somewhere
/// inside generated code back to the AMX address it corresponds to,
/// used to persist `CIP` when entering `sleep` mode.
///
/// # Safety
/// Same as [`jit_lookup_address`].
pub unsafe extern "C" fn jit_reverse_lookup(
    table: *const AddressMapEntry,
    len: u32,
    code_ptr: u32,
) -> u32 {
    let slice = unsafe { std::slice::from_raw_parts(table, len as usize) };
    lookup_by_jit_offset(slice, code_ptr).unwrap_or(0)
}

/// Dispatch a native call via the host's callback. `params` points at
/// the AMX-convention argument block (argument count in bytes,
/// followed by the arguments themselves); `result` receives the
/// native's return value on success. Returns an [`AmxError`] code (0
/// for none).
///
/// # Safety
/// `amx` must be a valid, exclusively-held pointer; `params` must
/// point at a live argument block; `result` must be writable.
pub unsafe extern "C" fn jit_sysreq(
    amx: *mut AmxRegisters,
    index: Cell,
    params: *const Cell,
    result: *mut Cell,
) -> i32 {
    let regs = unsafe { &mut *amx };
    let Some(callback) = regs.callback else {
        return AmxError::Callback as i32;
    };
    let mut out: Cell = 0;
    let status = unsafe { callback(amx, index, &mut out, params) };
    if status == AmxError::None as i32 {
        unsafe { *result = out };
    }
    status
}
