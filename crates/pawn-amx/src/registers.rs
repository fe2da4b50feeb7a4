//! The mutable register file a running AMX carries.
//!
//! This is deliberately split out of the read-only [`crate::AmxModule`]:
//! the module is the bytecode and symbol tables loaded once from a
//! file, while `AmxRegisters` is what an interpreter or a JIT-compiled
//! function actually mutates on every step. Both `pawn-jit`'s
//! `exec_helper` trampoline and a plain bytecode interpreter read and
//! write the same fields here.

use crate::module::AmxModule;
use crate::types::{CallbackFunction, Cell};

/// Live AMX register state, addressed the same way the reference
/// interpreter and the JIT-compiled trampolines address it.
///
/// `repr(C)` is load-bearing: `pawn-jit`'s trampolines index these
/// fields by byte offset from generated machine code (via
/// `std::mem::offset_of!`), so the layout must be fixed and match what
/// the assembler was told to expect.
#[derive(Debug, Clone)]
#[repr(C)]
pub struct AmxRegisters {
    /// Primary register (PRI).
    pub pri: Cell,
    /// Alternate register (ALT).
    pub alt: Cell,
    /// Stack frame pointer (FRM), relative to the data section.
    pub frm: Cell,
    /// Stack pointer (STK), relative to the data section.
    pub stk: Cell,
    /// Heap pointer (HEA), relative to the data section.
    pub hea: Cell,
    /// Heap low-water mark (HLW).
    pub hlw: Cell,
    /// Stack top (STP), relative to the data section.
    pub stp: Cell,
    /// Code instruction pointer (CIP), relative to the code section.
    pub cip: Cell,
    /// Saved STK at the point where `reset.hea`/`reset.stk` would
    /// unwind to, used by the halt trampoline to roll back state to
    /// the last `sysreq`/`call` boundary on a runtime fault.
    pub reset_stk: Cell,
    pub reset_hea: Cell,
    /// Number of parameters on the current call (pushed before PROC).
    pub paramcount: Cell,
    /// Last error code set by a trap or the host.
    pub error: i32,
    /// Host-supplied native dispatcher, invoked by `SYSREQ.C`/`SYSREQ.D`.
    pub callback: Option<CallbackFunction>,
    /// Host-owned scratch slots, mirroring the reference `AMX` struct's
    /// `userdata[AMX_USERNUM]` array. Generated code never reads these;
    /// they exist so a `callback` function - a bare `extern "C" fn`
    /// with no closure environment - can recover whatever state it
    /// needs (e.g. a native registry) from the `amx` pointer it is
    /// always handed. See `pawn-cli`'s host module.
    pub userdata: [usize; AMX_USERNUM],
}

/// Number of host-owned scratch slots, matching the reference ABI.
pub const AMX_USERNUM: usize = 4;

impl AmxRegisters {
    /// Registers as they stand right after `module`'s header is parsed
    /// and before any code runs: CIP at the code entry point, STK/FRM
    /// empty at the top of the stack (it grows down from STP), HEA at
    /// its declared start.
    ///
    /// `AmxHeader`'s `cod`/`dat`/`hea`/`stp` are absolute offsets into
    /// the file image (they locate and size the sections), so the data
    /// registers here are rebased to be relative to `dat` instead,
    /// matching every `pawn-jit` data lowering (relative to `dat`) -
    /// see `DESIGN.md`'s note on the `data_base` register convention.
    /// `cip`, by contrast, is already a logical code address (relative
    /// to `cod`) at the file-format level, the same space `Decoder`
    /// addresses instructions in and jump/call targets are encoded in
    /// - it is carried through unmodified, matching the reference
    /// `AMXPtr::GetPublicAddress`'s direct use of `hdr->cip`.
    pub fn from_module(module: &AmxModule) -> Self {
        let header = module.header();
        let stack_top = header.stp - header.dat;
        Self {
            pri: 0,
            alt: 0,
            frm: stack_top,
            stk: stack_top,
            hea: header.hea - header.dat,
            hlw: 0,
            stp: stack_top,
            cip: header.cip,
            reset_stk: stack_top,
            reset_hea: header.hea - header.dat,
            paramcount: 0,
            error: 0,
            callback: None,
            userdata: [0; AMX_USERNUM],
        }
    }

    /// Record the current STK/HEA as the rollback point used on a
    /// runtime fault, mirroring the reference `amx_Exec`'s behavior of
    /// snapshotting these registers right before a public call.
    pub fn mark_reset_point(&mut self) {
        self.reset_stk = self.stk;
        self.reset_hea = self.hea;
    }

    /// Roll STK/HEA back to the last marked reset point. Used by the
    /// halt trampoline so a caught fault leaves the AMX stack/heap
    /// exactly as they were before the call that faulted.
    pub fn rollback(&mut self) {
        self.stk = self.reset_stk;
        self.hea = self.reset_hea;
    }
}
