//! The host-facing entry point into a compiled module (`exec`) and the
//! one stack-switch every call makes.
//!
//! A reference JIT design emits `exec_helper` as generated code
//! reached by a `call`, re-executed on every single public/native
//! call. This collapses that into one Rust function plus a small
//! raw-asm bridge, since the swap only ever has to happen once per
//! `exec` invocation here (every nested AMX `call`/`sysreq` inside
//! generated code stays on the same, already-swapped stack - see
//! `translator.rs` and `compiler.rs::emit_trampolines`). The bridge
//! itself follows the save-registers/switch-stack/call/restore shape
//! of a coroutine context switch, adapted from one resumed many times
//! to a one-shot call-and-return.

use log::{debug, trace, warn};

use pawn_amx::module::AmxModule;
use pawn_amx::types::{AmxError, AmxFlags, Cell, AMX_EXEC_MAIN};
use pawn_amx::AmxRegisters;

use crate::compiler::JitModule;
use crate::rib::RibField;

/// Call public function `index` of a compiled module (or
/// [`AMX_EXEC_MAIN`] for the program entry point): validate, resolve,
/// push the argument-size cell, transfer to generated code, unwind,
/// report - matching `amx_Exec`'s contract in the reference runtime.
///
/// `data_base` is the native pointer backing the guest's data section
/// (`dat`) - the address `ebp`/`esp`/every `LOAD`/`STOR` are computed
/// relative to once inside generated code (`ebx` in the register
/// convention; see `DESIGN.md`). The caller (`pawn-cli`'s module
/// loader) owns this allocation; it must be at least
/// `amx.stp` bytes (the data section plus heap and stack) and must
/// never move while `amx`/`module` are in use, since generated code
/// embeds no indirection to recover it other than what this function
/// passes in on each call.
///
/// Arguments the guest function expects must already be pushed onto
/// the guest stack (`data_base + amx.stk`, descending) by the caller,
/// with `amx.paramcount` set to their total size in bytes - the same
/// convention `amx_Push`/`amx_Exec` use in the reference runtime.
///
/// # Safety
/// `data_base` must point at a writable region of at least `amx.stp`
/// bytes. `amx` must be the same register file `module` was compiled
/// against, and must not move for the duration of the call.
pub unsafe fn exec(
    module: &mut JitModule,
    amx_module: &AmxModule,
    amx: &mut AmxRegisters,
    data_base: *mut u8,
    index: Cell,
    retval: Option<&mut Cell>,
) -> AmxError {
    if amx.hea >= amx.stk {
        warn!("exec: stack/heap collision (hea={}, stk={})", amx.hea, amx.stk);
        return AmxError::StackErr;
    }
    if amx.stk > amx.stp {
        warn!("exec: stack underflow (stk={}, stp={})", amx.stk, amx.stp);
        return AmxError::StackLow;
    }
    if amx.hea < amx.hlw {
        warn!("exec: heap underflow (hea={}, hlw={})", amx.hea, amx.hlw);
        return AmxError::HeapLow;
    }
    if !AmxFlags::from_bits(amx_module.header().flags).ntvreg {
        warn!("exec: not every native is registered");
        return AmxError::NotFound;
    }

    let amx_address = if index == AMX_EXEC_MAIN {
        amx_module.header().cip as u32
    } else {
        match amx_module.public_address(index as usize) {
            Some(addr) if addr != 0 => addr,
            _ => {
                warn!("exec: public index {index} does not resolve to a code address");
                return AmxError::NotFound;
            }
        }
    };

    let Some(target) = module.entry_address(amx_address) else {
        warn!("exec: amx address {amx_address:#x} has no compiled entry point");
        return AmxError::Index;
    };
    debug!("exec: index={index} -> amx {amx_address:#x} -> jit {target:#x}");

    // Pre-call snapshot: on a runtime fault we roll stk/hea back to
    // exactly this, so a caller that entered `a` and faulted observes
    // the same state as if the call had never pushed anything (see
    // DESIGN.md, testable property 4).
    amx.mark_reset_point();

    let push_size = amx.paramcount;
    amx.stk -= 4;
    unsafe {
        (data_base.add(amx.stk as usize) as *mut Cell).write_unaligned(push_size);
    }
    amx.paramcount = 0;

    let ebp_init = unsafe { data_base.add(amx.frm as usize) } as usize;
    let esp_init = unsafe { data_base.add(amx.stk as usize) } as usize;

    let mut rib = module.rib_mut();
    let outer_reset_ebp = rib.get(RibField::ResetEbp);
    let outer_reset_esp = rib.get(RibField::ResetEsp);
    rib.set(RibField::ResetEbp, ebp_init as u32);
    rib.set(RibField::ResetEsp, (esp_init - 4) as u32);
    drop(rib);

    trace!("exec: entering generated code at {target:#x}");
    let (pri, final_ebp, final_esp) = call_entry_point(target, ebp_init, esp_init, data_base);
    trace!("exec: returned from generated code, pri={pri:#x}");

    let mut rib = module.rib_mut();
    rib.set(RibField::ResetEbp, outer_reset_ebp);
    rib.set(RibField::ResetEsp, outer_reset_esp);
    drop(rib);

    amx.pri = pri;
    amx.frm = (final_ebp as isize - data_base as isize) as Cell;
    amx.stk = (final_esp as isize - data_base as isize) as Cell;

    let error = AmxError::from(amx.error);
    amx.error = AmxError::None as i32;

    if error != AmxError::None {
        // `halt_helper` only pops the native return-address pair; it
        // never peels the pushed argument cells back off the AMX
        // stack the way a normal `RETN` would, so the stk/hea sync
        // above can leave stale values behind a fault. Roll forward
        // to the pre-call snapshot instead of trusting it.
        amx.rollback();
        warn!("exec: generated code halted with {error}");
    }

    error
}

/// Switch onto the guest stack, `call` into generated code, switch
/// back. Returns `(pri, final_ebp, final_esp)` - the guest's `eax` at
/// return, and the native pointers the guest's own frame/stack ended
/// up at (from which `exec` recovers `amx.frm`/`amx.stk`).
///
/// `_data_base` is unused by the bridge itself (every address it
/// needs was already resolved to a native pointer by the caller); it
/// is threaded through only so callers that don't otherwise hold a
/// live reference to the mapping can't drop it out from under this
/// call.
#[cfg(target_arch = "x86")]
fn call_entry_point(
    target: usize,
    ebp_init: usize,
    esp_init: usize,
    _data_base: *mut u8,
) -> (Cell, usize, usize) {
    let mut out_ebp: u32 = 0;
    let mut out_esp: u32 = 0;
    let pri: i32;
    unsafe {
        pri = pawn_jit_call_entry(
            target as u32,
            ebp_init as u32,
            esp_init as u32,
            &mut out_ebp,
            &mut out_esp,
        );
    }
    (pri, out_ebp as usize, out_esp as usize)
}

#[cfg(not(target_arch = "x86"))]
fn call_entry_point(
    _target: usize,
    _ebp_init: usize,
    _esp_init: usize,
    _data_base: *mut u8,
) -> (Cell, usize, usize) {
    unreachable!("generated code only runs on x86 (32-bit); no other target is supported")
}

#[cfg(target_arch = "x86")]
unsafe extern "C" {
    /// `int pawn_jit_call_entry(uint32_t target, uint32_t ebp_init, uint32_t esp_init, uint32_t *out_ebp, uint32_t *out_esp)`
    ///
    /// Defined in the `global_asm!` block below. Saves the callee-saved
    /// registers the caller expects, swaps `ebp`/`esp` onto the guest
    /// stack, `call`s `target`, records where the guest left `ebp`/
    /// `esp`, swaps back, and returns `eax` (the guest's PRI) as its
    /// own return value.
    fn pawn_jit_call_entry(
        target: u32,
        ebp_init: u32,
        esp_init: u32,
        out_ebp: *mut u32,
        out_esp: *mut u32,
    ) -> i32;
}

#[cfg(target_arch = "x86")]
std::arch::global_asm!(
    ".intel_syntax noprefix",
    ".global pawn_jit_call_entry",
    "pawn_jit_call_entry:",
    "push ebp",
    "push ebx",
    "push esi",
    "push edi",
    // cdecl args, shifted by the four pushes above (16 bytes):
    // [esp+20]=target [esp+24]=ebp_init [esp+28]=esp_init
    // [esp+32]=out_ebp [esp+36]=out_esp
    "mov eax, [esp+20]",
    "mov ecx, [esp+24]",
    "mov edx, [esp+28]",
    "mov ebx, ebp", // stash host ebp
    "mov esi, esp", // stash host esp - also doubles as the base for
    // the out_ebp/out_esp reads below, since esp itself
    // is about to point at the guest stack.
    "mov ebp, ecx",
    "mov esp, edx",
    "call eax", // guest stack is live from here until the next line
    "mov edi, [esi+32]",
    "mov [edi], ebp",
    "mov edi, [esi+36]",
    "mov [edi], esp",
    "mov ebp, ebx", // restore host ebp
    "mov esp, esi", // restore host esp
    "pop edi",
    "pop esi",
    "pop ebx",
    "pop ebp",
    "ret",
);

#[cfg(test)]
mod tests {
    use super::*;
    use pawn_amx::header::{write_header, AmxHeader};
    use pawn_amx::instructions::Opcode;

    fn header_for(code_len: i32, stack_bytes: i32) -> AmxHeader {
        let header_size = write_header(&AmxHeader::new()).len() as i32;
        let mut header = AmxHeader::new();
        header.cod = header_size;
        header.dat = header.cod + code_len;
        header.hea = header.dat + 4;
        header.stp = header.hea + stack_bytes;
        header.cip = 0; // logical address of the first instruction, relative to `cod`
        header.defsize = 8;
        header.publics = header.dat;
        header.natives = header.dat;
        header.libraries = header.dat;
        header.pubvars = header.dat;
        header.tags = header.dat;
        header.nametable = header.dat;
        header.flags = 0x1000; // NTVREG
        header
    }

    /// `PROC; CONST.PRI 42; RETN` - a public that returns a constant.
    fn assemble_constant_return() -> Vec<u8> {
        let instrs: [(Opcode, Option<i32>); 3] = [
            (Opcode::Proc, None),
            (Opcode::ConstPri, Some(42)),
            (Opcode::Retn, None),
        ];
        let code_len = instrs
            .iter()
            .map(|(_, op)| if op.is_some() { 8 } else { 4 })
            .sum();
        let header = header_for(code_len, 1024);
        let mut image = write_header(&header);
        for (op, operand) in instrs {
            image.extend_from_slice(&(op as i32).to_le_bytes());
            if let Some(v) = operand {
                image.extend_from_slice(&v.to_le_bytes());
            }
        }
        image.extend_from_slice(&0i32.to_le_bytes()); // initial data cell
        image
    }

    #[test]
    #[cfg(target_arch = "x86")]
    fn scenario_a_constant_return() {
        let image = assemble_constant_return();
        let module = AmxModule::load(image).unwrap();
        let mut amx = AmxRegisters::from_module(&module);

        // `data_base` anchors data-relative address 0, i.e. the start
        // of `dat` - the same origin `amx.frm`/`amx.stk`/`amx.hea` are
        // all counted from, so the initial data content lands at
        // offset 0, and the buffer only needs to span `amx.stp` bytes.
        let mut data = vec![0u8; amx.stp as usize];
        data[..module.initial_data().len()].copy_from_slice(module.initial_data());

        let mut jit = JitModule::compile(&module, &mut amx as *mut _).unwrap();
        let mut retval = 0;
        let status = unsafe {
            exec(
                &mut jit,
                &module,
                &mut amx,
                data.as_mut_ptr(),
                AMX_EXEC_MAIN,
                Some(&mut retval),
            )
        };
        assert_eq!(status, AmxError::None);
        assert_eq!(amx.pri, 42);
        assert_eq!(amx.error, AmxError::None as i32);
    }

    #[test]
    fn stack_heap_collision_is_rejected_before_entering_generated_code() {
        let image = assemble_constant_return();
        let module = AmxModule::load(image).unwrap();
        let mut amx = AmxRegisters::from_module(&module);
        amx.hea = amx.stk; // force the collision guard
        let mut data = vec![0u8; amx.stp as usize];

        let mut jit = JitModule::compile(&module, &mut amx as *mut _).unwrap();
        let status = unsafe {
            exec(
                &mut jit,
                &module,
                &mut amx,
                data.as_mut_ptr(),
                AMX_EXEC_MAIN,
                None,
            )
        };
        assert_eq!(status, AmxError::StackErr);
    }
}
