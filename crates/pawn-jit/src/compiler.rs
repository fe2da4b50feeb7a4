//! Drives a module through decode, translation, and relocation into a
//! runnable [`JitModule`] - the `pawn-jit` counterpart to
//! `CompilerImpl::Compile` in the reference implementation.
//!
//! Assembly happens in three passes against one [`Assembler`]: the RIB
//! and address-map placeholders and the three dispatch trampolines go
//! in first (so their labels exist before any opcode lowering
//! references them), then every decoded instruction is translated in
//! address order, then `patch_all`/`patch_absolute` resolve every jump
//! and RIB reference against the buffer's real, final address.

use pawn_amx::module::AmxModule;
use pawn_amx::AmxRegisters;

use crate::addrmap::{self, AddressMapEntry};
use crate::assembler::{Assembler, Cond, Reg};
use crate::error::JitResult;
use crate::memory::ExecutableBuffer;
use crate::offsets;
use crate::rib::{self, Rib, RibLabels};
use crate::runtime_helpers;
use crate::translator::{HelperLabels, Translator};

/// A compiled module: executable machine code, bound to one
/// [`AmxRegisters`] instance, plus the address map
/// [`crate::exec::call_entry_point`] needs to find a public's entry
/// point and generated code needs to resolve dynamic jumps.
pub struct JitModule {
    buffer: ExecutableBuffer,
    address_map: Vec<AddressMapEntry>,
}

impl JitModule {
    /// Translate every instruction in `module`'s code section and map
    /// the result executable, bound to `amx`. `amx` must outlive this
    /// `JitModule` and must not move for as long as it's in use: the
    /// compiled code reads and writes through the raw pointer.
    pub fn compile(module: &AmxModule, amx: *mut AmxRegisters) -> JitResult<Self> {
        Self::compile_with_debug(module, amx, 0)
    }

    /// As [`compile`](Self::compile), but honoring a host's `jit_debug`
    /// bitmask (bit 1: embed `int3` at `BREAK` opcodes).
    pub fn compile_with_debug(
        module: &AmxModule,
        amx: *mut AmxRegisters,
        debug_flags: u32,
    ) -> JitResult<Self> {
        let instructions = module.decode_all()?;

        let mut asm = Assembler::new();
        let rib_labels = rib::emit_placeholder(&mut asm, instructions.len() as u32);

        let table_label = asm.new_label();
        asm.bind(table_label);
        let table_offset = asm.label_offset(table_label).expect("just bound");
        addrmap::emit_placeholder(&mut asm, instructions.len());

        let helpers = emit_trampolines(&mut asm, &rib_labels);

        let translator = Translator::new(
            module,
            rib_labels,
            helpers,
            table_label,
            instructions.len() as u32,
            debug_flags & 0x2 != 0,
        );
        let recorded = translator.translate(&mut asm, &instructions)?;

        asm.patch_all().expect("every label bound during translation");

        let size = asm.offset();
        let mut buffer = ExecutableBuffer::reserve(size)?;
        let code_base = buffer.base_address();

        asm.patch_absolute(code_base)
            .expect("every abs-fixup label bound during translation");

        let mut code = asm.into_code();

        let address_map = addrmap::build_sorted(
            recorded
                .iter()
                .map(|&(amx_address, offset)| AddressMapEntry {
                    amx_address: amx_address as u32,
                    jit_offset: (code_base + offset) as u32,
                })
                .collect(),
        );
        write_address_map(&mut code, table_offset, &address_map);

        {
            let mut rib = unsafe { Rib::at(code.as_mut_ptr()) };
            rib.relocate(code_base, amx as usize);
        }

        buffer.write(&code);
        buffer.make_writable_executable()?;

        Ok(Self {
            buffer,
            address_map,
        })
    }

    /// Absolute address of the generated code for the instruction at
    /// `amx_address`, if that address starts a decoded instruction.
    pub fn entry_address(&self, amx_address: u32) -> Option<usize> {
        addrmap::lookup_by_amx_address(&self.address_map, amx_address).map(|a| a as usize)
    }

    /// AMX address a generated-code return address corresponds to,
    /// used to persist `CIP` when a running module enters sleep mode.
    pub fn amx_address_of(&self, jit_address: usize) -> Option<u32> {
        let offset = jit_address.checked_sub(self.buffer.base_address())? as u32;
        addrmap::lookup_by_jit_offset(&self.address_map, offset)
    }

    /// The RIB sitting at the front of the mapping, for
    /// [`crate::exec::call_entry_point`] to stash the native-register
    /// rollback pair into right before every call.
    pub(crate) fn rib_mut(&mut self) -> Rib {
        unsafe { Rib::at(self.buffer.as_mut_ptr()) }
    }

    /// Absolute address of the mapped code, to enter via inline asm.
    pub(crate) fn base_address(&self) -> usize {
        self.buffer.base_address()
    }
}

/// Bake the sorted `{amx_address, jit_offset}` table into the
/// placeholder slots reserved right after the RIB.
fn write_address_map(code: &mut [u8], table_offset: usize, sorted: &[AddressMapEntry]) {
    for (i, entry) in sorted.iter().enumerate() {
        let at = table_offset + i * addrmap::ENTRY_SIZE;
        code[at..at + 4].copy_from_slice(&entry.amx_address.to_le_bytes());
        code[at + 4..at + 8].copy_from_slice(&entry.jit_offset.to_le_bytes());
    }
}

/// Emit the three dispatch trampolines every call/sysreq/halt site
/// reaches through a plain `call_label`, instead of inlining the same
/// handful of instructions at every one of those sites. Internal
/// calling convention, not the C ABI: the caller's payload travels in
/// `edx` (a native index, a resolved function pointer, or an error
/// code), and every push/call here runs against the live AMX stack
/// (`esp` doubles as `STK`), the same way `PROC`/`CALL`/`RETN` already
/// do - see `translator.rs`.
fn emit_trampolines(asm: &mut Assembler, rib: &RibLabels) -> HelperLabels {
    let halt = asm.new_label();
    let sysreq_c = asm.new_label();
    let sysreq_d = asm.new_label();

    // halt(edi = error code): stash the error, then pop the native
    // register pair `call_entry_point` saved in the RIB right before
    // its own `call` into generated code, unwinding arbitrarily many
    // nested AMX calls back to that one native `ret`.
    asm.bind(halt);
    asm.mov_r_abs(Reg::Esi, rib.amx_ptr);
    asm.mov_mr(Reg::Esi, offsets::ERROR, Reg::Edi);
    asm.mov_r_abs(Reg::Eax, rib.reset_esp);
    asm.mov_rr(Reg::Esp, Reg::Eax);
    asm.mov_r_abs(Reg::Eax, rib.reset_ebp);
    asm.mov_rr(Reg::Ebp, Reg::Eax);
    asm.ret();

    // sysreq_c(edx = native index): dispatch through the host callback,
    // since this data model never resolves a native's address at
    // compile time (see DESIGN.md). PRI receives the result; a nonzero
    // status tail-jumps into `halt` instead of returning.
    asm.bind(sysreq_c);
    // `call_label` just pushed a return address onto the live AMX
    // stack, so the argument block itself starts one cell past `esp`.
    asm.lea(Reg::Edi, Reg::Esp, 4); // params: the live AMX stack top
    asm.mov_r_abs(Reg::Esi, rib.amx_ptr);
    asm.push_i(0); // reserve a result cell
    asm.mov_rr(Reg::Eax, Reg::Esp); // &result
    asm.push_r(Reg::Eax);
    asm.push_r(Reg::Edi);
    asm.push_r(Reg::Edx);
    asm.push_r(Reg::Esi);
    asm.call_extern(runtime_helpers::jit_sysreq as usize);
    asm.add_ri(Reg::Esp, 16);
    asm.mov_rr(Reg::Edx, Reg::Eax); // save status
    asm.pop_r(Reg::Eax); // PRI = result
    let ok = asm.new_label();
    asm.test_rr(Reg::Edx, Reg::Edx);
    asm.jcc_label(Cond::Zero, ok);
    asm.mov_rr(Reg::Edi, Reg::Edx);
    asm.jmp_label(halt);
    asm.bind(ok);
    asm.ret();

    // sysreq_d(edx = already-resolved native function pointer): call
    // it directly against the `NativeFunction` ABI.
    asm.bind(sysreq_d);
    // Same return-address offset as `sysreq_c` above.
    asm.lea(Reg::Edi, Reg::Esp, 4);
    asm.mov_r_abs(Reg::Esi, rib.amx_ptr);
    asm.push_r(Reg::Edi);
    asm.push_r(Reg::Esi);
    asm.call_reg(Reg::Edx);
    asm.add_ri(Reg::Esp, 8);
    asm.ret();

    HelperLabels {
        halt,
        sysreq_c,
        sysreq_d,
    }
}
