//! Opcode-by-opcode lowering from decoded AMX instructions to x86.
//!
//! Grounded in a reference JIT's `CompilerImpl::EmitInstr` dispatch
//! switch: each match arm below lowers the same opcode that JIT does,
//! adapted to this crate's register convention (`esp`/`ebp` hold
//! absolute pointers into the data section directly, so frame/stack
//! addressing never needs an `ebx` add/sub - only `LCTRL`/`SCTRL`
//! convert to/from the DAT-relative values AMX code itself sees) and
//! to a trimmed RIB plus Rust-side `sysreq`/address-lookup helpers
//! instead of a fully inlined stack swap on every call.

use log::{debug, error, trace};

use pawn_amx::instructions::{Instruction, Opcode};
use pawn_amx::module::AmxModule;
use pawn_amx::types::AmxError;

use crate::assembler::{Assembler, Cond, Label, Reg};
use crate::error::{JitError, JitResult};
use crate::intrinsics;
use crate::offsets;
use crate::rib::RibLabels;
use crate::runtime_helpers;

/// Labels for the shared trampolines every lowered opcode may call
/// into: the fault-unwind path and the two `sysreq` dispatchers.
/// Addresses of dynamic jump/call targets are resolved inline via
/// [`runtime_helpers::jit_lookup_address`] rather than through a
/// fourth trampoline, since that path needs no unwinding.
#[derive(Debug, Clone, Copy)]
pub struct HelperLabels {
    pub halt: Label,
    pub sysreq_c: Label,
    pub sysreq_d: Label,
}

/// Lowers a decoded instruction stream into x86 machine code.
pub struct Translator<'a> {
    module: &'a AmxModule,
    rib: RibLabels,
    helpers: HelperLabels,
    table_label: Label,
    instr_count: u32,
    /// `jit_debug` bit 1: embed an `int3` at every `BREAK` opcode
    /// instead of lowering it to nothing, so a debugger attached to the
    /// host traps at guest breakpoints the way the reference compiler's
    /// debug build does.
    embed_breakpoints: bool,
}

impl<'a> Translator<'a> {
    pub fn new(
        module: &'a AmxModule,
        rib: RibLabels,
        helpers: HelperLabels,
        table_label: Label,
        instr_count: u32,
        embed_breakpoints: bool,
    ) -> Self {
        Self {
            module,
            rib,
            helpers,
            embed_breakpoints,
            table_label,
            instr_count,
        }
    }

    /// Lower every instruction, returning `(amx_address, jit_offset)`
    /// pairs in emission order - one per decoded instruction, including
    /// `CASETBL` payloads, which emit no code of their own but still
    /// need an address-map entry (a `SWITCH` target never points at a
    /// payload, but the map's "exactly one entry per instruction"
    /// invariant doesn't carve out an exception for it).
    pub fn translate(
        &self,
        asm: &mut Assembler,
        instructions: &[Instruction],
    ) -> JitResult<Vec<(i32, usize)>> {
        debug!("translate: lowering {} instructions", instructions.len());
        let mut map = Vec::with_capacity(instructions.len());
        for instr in instructions {
            if instr.opcode == Opcode::Proc {
                debug!("translate: function boundary at amx {:#x}", instr.address);
                asm.align(16);
            }
            let label = asm.label_for_address(instr.address as i32);
            asm.bind(label);
            map.push((instr.address as i32, asm.offset()));
            trace!(
                "translate: {:#x} {} -> jit offset {}",
                instr.address,
                instr.opcode.mnemonic(),
                asm.offset()
            );
            self.emit(asm, instr).map_err(|err| {
                error!("translate: aborting at amx {:#x}: {err}", instr.address);
                err
            })?;
        }
        debug!(
            "translate: emitted {} bytes for {} instructions",
            asm.offset(),
            instructions.len()
        );
        Ok(map)
    }

    fn read_amx_field(&self, asm: &mut Assembler, dst: Reg, field: i32) {
        asm.mov_r_abs(dst, self.rib.amx_ptr);
        asm.mov_rm(dst, dst, field);
    }

    fn write_amx_field(&self, asm: &mut Assembler, field: i32, src: Reg, scratch: Reg) {
        asm.mov_r_abs(scratch, self.rib.amx_ptr);
        asm.mov_mr(scratch, field, src);
    }

    /// Resolve an AMX address held in `eax` to its translated entry
    /// point, leaving the result (0 if unresolved) in `eax`.
    fn emit_lookup(&self, asm: &mut Assembler) {
        asm.lea_r_abs(Reg::Edx, self.table_label);
        asm.push_r(Reg::Edx);
        asm.push_i(self.instr_count);
        asm.push_r(Reg::Eax);
        asm.call_extern(runtime_helpers::jit_lookup_address as usize);
        asm.add_ri(Reg::Esp, 12);
    }

    /// `JUMP.PRI`/`SCTRL 6`: jump to the address in `eax`, or continue
    /// with the next instruction if it isn't the start of any decoded
    /// one - matches the reference interpreter's tolerance of a jump
    /// to a non-instruction boundary.
    fn emit_dynamic_jump(&self, asm: &mut Assembler) {
        self.emit_lookup(asm);
        let cont = asm.new_label();
        asm.test_rr(Reg::Eax, Reg::Eax);
        asm.jcc_label(Cond::Zero, cont);
        asm.jmp_reg(Reg::Eax);
        asm.bind(cont);
    }

    fn emit_halt(&self, asm: &mut Assembler, code: i32) {
        asm.mov_ri(Reg::Edi, code as u32);
        asm.call_label(self.helpers.halt);
    }

    fn emit(&self, asm: &mut Assembler, instr: &Instruction) -> JitResult<()> {
        use Reg::*;
        let op = |i: usize| instr.operand(i);

        match instr.opcode {
            Opcode::LoadPri => asm.mov_rm(Eax, Ebx, op(0)),
            Opcode::LoadAlt => asm.mov_rm(Ecx, Ebx, op(0)),
            Opcode::LoadSPri => asm.mov_rm(Eax, Ebp, op(0)),
            Opcode::LoadSAlt => asm.mov_rm(Ecx, Ebp, op(0)),
            Opcode::LrefPri => {
                asm.mov_rm(Edx, Ebx, op(0));
                asm.mov_rm_sib(Eax, Ebx, Edx, 1);
            }
            Opcode::LrefAlt => {
                asm.mov_rm(Edx, Ebx, op(0));
                asm.mov_rm_sib(Ecx, Ebx, Edx, 1);
            }
            Opcode::LrefSPri => {
                asm.mov_rm(Edx, Ebp, op(0));
                asm.mov_rm_sib(Eax, Ebx, Edx, 1);
            }
            Opcode::LrefSAlt => {
                asm.mov_rm(Edx, Ebp, op(0));
                asm.mov_rm_sib(Ecx, Ebx, Edx, 1);
            }
            Opcode::LoadI => asm.mov_rm_sib(Eax, Ebx, Eax, 1),
            Opcode::LodbI => match op(0) {
                1 => asm.movzx_r32_sib8(Eax, Ebx, Eax, 1),
                2 => asm.movzx_r32_sib16(Eax, Ebx, Eax, 1),
                4 => asm.mov_rm_sib(Eax, Ebx, Eax, 1),
                _ => return Err(JitError::UnsupportedOpcode(instr.opcode)),
            },
            Opcode::ConstPri => asm.mov_ri(Eax, op(0) as u32),
            Opcode::ConstAlt => asm.mov_ri(Ecx, op(0) as u32),
            Opcode::AddrPri => {
                asm.lea(Eax, Ebp, op(0));
                asm.sub_rr(Eax, Ebx);
            }
            Opcode::AddrAlt => {
                asm.lea(Ecx, Ebp, op(0));
                asm.sub_rr(Ecx, Ebx);
            }
            Opcode::StorPri => asm.mov_mr(Ebx, op(0), Eax),
            Opcode::StorAlt => asm.mov_mr(Ebx, op(0), Ecx),
            Opcode::StorSPri => asm.mov_mr(Ebp, op(0), Eax),
            Opcode::StorSAlt => asm.mov_mr(Ebp, op(0), Ecx),
            Opcode::SrefPri => {
                asm.mov_rm(Edx, Ebx, op(0));
                asm.mov_sib_r(Ebx, Edx, 1, Eax);
            }
            Opcode::SrefAlt => {
                asm.mov_rm(Edx, Ebx, op(0));
                asm.mov_sib_r(Ebx, Edx, 1, Ecx);
            }
            Opcode::SrefSPri => {
                asm.mov_rm(Edx, Ebp, op(0));
                asm.mov_sib_r(Ebx, Edx, 1, Eax);
            }
            Opcode::SrefSAlt => {
                asm.mov_rm(Edx, Ebp, op(0));
                asm.mov_sib_r(Ebx, Edx, 1, Ecx);
            }
            Opcode::StorI => asm.mov_sib_r(Ebx, Ecx, 1, Eax),
            Opcode::StrbI => match op(0) {
                1 => asm.mov_sib8_r(Ebx, Ecx, 1, Eax),
                2 => asm.mov_sib16_r(Ebx, Ecx, 1, Eax),
                4 => asm.mov_sib_r(Ebx, Ecx, 1, Eax),
                _ => return Err(JitError::UnsupportedOpcode(instr.opcode)),
            },
            Opcode::Lidx => {
                asm.lea_sib(Edx, Ebx, Ecx, 1);
                asm.mov_rm_sib(Eax, Edx, Eax, 4);
            }
            Opcode::Idxaddr => asm.lea_sib(Eax, Ecx, Eax, 4),
            Opcode::LidxB => {
                let shift = op(0) as u8;
                asm.shl_i(Eax, shift);
                asm.lea_sib(Edx, Ebx, Ecx, 1);
                asm.mov_rm_sib(Eax, Edx, Eax, 1);
            }
            Opcode::IdxaddrB => {
                let shift = op(0) as u8;
                asm.shl_i(Eax, shift);
                asm.add_rr(Eax, Ecx);
            }
            Opcode::AlignPri | Opcode::AlignAlt => {
                // Host is little-endian; the partial-cell realignment
                // `ALIGN.*` performs on big-endian targets is a no-op here.
            }
            Opcode::Lctrl => match op(0) {
                0 => asm.mov_ri(Eax, self.module.header().cod as u32),
                1 => asm.mov_ri(Eax, self.module.header().dat as u32),
                2 => self.read_amx_field(asm, Eax, offsets::HEA),
                3 => self.read_amx_field(asm, Eax, offsets::STP),
                4 => {
                    asm.mov_rr(Eax, Esp);
                    asm.sub_rr(Eax, Ebx);
                }
                5 => {
                    asm.mov_rr(Eax, Ebp);
                    asm.sub_rr(Eax, Ebx);
                }
                6 => asm.mov_ri(Eax, (instr.address + instr.size()) as u32),
                _ => return Err(JitError::UnsupportedOpcode(instr.opcode)),
            },
            Opcode::Sctrl => match op(0) {
                2 => self.write_amx_field(asm, offsets::HEA, Eax, Edx),
                4 => asm.lea_sib(Esp, Ebx, Eax, 1),
                5 => asm.lea_sib(Ebp, Ebx, Eax, 1),
                6 => self.emit_dynamic_jump(asm),
                _ => return Err(JitError::UnsupportedOpcode(instr.opcode)),
            },
            Opcode::MovePri => asm.mov_rr(Eax, Ecx),
            Opcode::MoveAlt => asm.mov_rr(Ecx, Eax),
            Opcode::Xchg => asm.xchg_rr(Eax, Ecx),
            Opcode::PushPri => asm.push_r(Eax),
            Opcode::PushAlt => asm.push_r(Ecx),
            Opcode::PushC => asm.push_i(op(0) as u32),
            Opcode::Push => asm.push_m(Ebx, op(0)),
            Opcode::PushS => asm.push_m(Ebp, op(0)),
            Opcode::PopPri => asm.pop_r(Eax),
            Opcode::PopAlt => asm.pop_r(Ecx),
            Opcode::Stack => {
                asm.mov_rr(Ecx, Esp);
                asm.sub_rr(Ecx, Ebx);
                let n = op(0);
                if n >= 0 {
                    asm.add_ri(Esp, n);
                } else {
                    asm.sub_ri(Esp, -n);
                }
            }
            Opcode::Heap => {
                asm.mov_r_abs(Edx, self.rib.amx_ptr);
                asm.mov_rm(Ecx, Edx, offsets::HEA);
                let n = op(0);
                if n >= 0 {
                    asm.add_mi(Edx, offsets::HEA, n);
                } else {
                    asm.sub_mi(Edx, offsets::HEA, -n);
                }
            }
            Opcode::Proc => {
                // The pushed frame must stay AMX-relative - guest code
                // can read its caller's frame slot directly (LOAD.S at
                // offset 0), so it has to see what the reference
                // interpreter would have stored there, not a native
                // pointer.
                asm.push_r(Ebp);
                asm.mov_rr(Ebp, Esp);
                asm.sub_mr(Esp, 0, Ebx);
            }
            Opcode::Ret => {
                asm.pop_r(Ebp);
                asm.add_rr(Ebp, Ebx);
                asm.ret();
            }
            Opcode::Retn => {
                asm.pop_r(Ebp);
                asm.add_rr(Ebp, Ebx);
                asm.pop_r(Edx);
                asm.add_rm(Esp, Esp, 0);
                asm.add_ri(Esp, 4);
                asm.push_r(Edx);
                asm.ret();
            }
            Opcode::Call => {
                let target = asm.label_for_address(op(0));
                asm.call_label(target);
            }
            Opcode::CallPri => {
                self.emit_lookup(asm);
                let found = asm.new_label();
                asm.test_rr(Eax, Eax);
                asm.jcc_label(Cond::Ne, found);
                self.emit_halt(asm, AmxError::InvalidInstruction as i32);
                asm.bind(found);
                asm.call_reg(Eax);
            }
            Opcode::Jump => {
                let target = asm.label_for_address(op(0));
                asm.jmp_label(target);
            }
            Opcode::JumpPri => self.emit_dynamic_jump(asm),
            Opcode::Jzer => {
                asm.test_rr(Eax, Eax);
                let t = asm.label_for_address(op(0));
                asm.jcc_label(Cond::Zero, t);
            }
            Opcode::Jnz => {
                asm.test_rr(Eax, Eax);
                let t = asm.label_for_address(op(0));
                asm.jcc_label(Cond::NotZero, t);
            }
            Opcode::Jeq => self.emit_cmp_jump(asm, instr, Cond::Eq),
            Opcode::Jneq => self.emit_cmp_jump(asm, instr, Cond::Ne),
            Opcode::Jless => self.emit_cmp_jump(asm, instr, Cond::Below),
            Opcode::Jleq => self.emit_cmp_jump(asm, instr, Cond::BelowEq),
            Opcode::Jgrtr => self.emit_cmp_jump(asm, instr, Cond::Above),
            Opcode::Jgeq => self.emit_cmp_jump(asm, instr, Cond::AboveEq),
            Opcode::Jsless => self.emit_cmp_jump(asm, instr, Cond::Less),
            Opcode::Jsleq => self.emit_cmp_jump(asm, instr, Cond::LessEq),
            Opcode::Jsgrtr => self.emit_cmp_jump(asm, instr, Cond::Greater),
            Opcode::Jsgeq => self.emit_cmp_jump(asm, instr, Cond::GreaterEq),
            Opcode::Shl => asm.shl_cl(Eax),
            Opcode::Shr => asm.shr_cl(Eax),
            Opcode::Sshr => asm.sar_cl(Eax),
            Opcode::ShlCPri => asm.shl_i(Eax, op(0) as u8),
            Opcode::ShlCAlt => asm.shl_i(Ecx, op(0) as u8),
            Opcode::ShrCPri => asm.shr_i(Eax, op(0) as u8),
            // Open question resolved: use a logical shr here, not the
            // reference's `shl` - see DESIGN.md.
            Opcode::ShrCAlt => asm.shr_i(Ecx, op(0) as u8),
            Opcode::Smul => asm.imul_rr(Eax, Ecx),
            Opcode::Sdiv => {
                asm.cdq();
                asm.idiv(Ecx);
                asm.mov_rr(Ecx, Edx);
            }
            Opcode::SdivAlt => {
                asm.mov_rr(Edi, Eax);
                asm.mov_rr(Eax, Ecx);
                asm.cdq();
                asm.idiv(Edi);
                asm.mov_rr(Ecx, Edx);
            }
            Opcode::Umul => asm.mul_full(Ecx),
            Opcode::Udiv => {
                asm.xor_rr(Edx, Edx);
                asm.div(Ecx);
                asm.mov_rr(Ecx, Edx);
            }
            Opcode::UdivAlt => {
                asm.mov_rr(Edi, Eax);
                asm.mov_rr(Eax, Ecx);
                asm.xor_rr(Edx, Edx);
                asm.div(Edi);
                asm.mov_rr(Ecx, Edx);
            }
            Opcode::Add => asm.add_rr(Eax, Ecx),
            Opcode::Sub => asm.sub_rr(Eax, Ecx),
            Opcode::SubAlt => {
                asm.mov_rr(Edx, Ecx);
                asm.sub_rr(Edx, Eax);
                asm.mov_rr(Eax, Edx);
            }
            Opcode::And => asm.and_rr(Eax, Ecx),
            Opcode::Or => asm.or_rr(Eax, Ecx),
            Opcode::Xor => asm.xor_rr(Eax, Ecx),
            Opcode::Not => {
                asm.test_rr(Eax, Eax);
                asm.setcc_movzx_eax(Cond::Eq);
            }
            Opcode::Neg => asm.neg(Eax),
            Opcode::Invert => asm.not_(Eax),
            Opcode::AddC => asm.add_ri(Eax, op(0)),
            Opcode::SmulC => asm.imul_ri(Eax, Eax, op(0)),
            Opcode::ZeroPri => asm.xor_self(Eax),
            Opcode::ZeroAlt => asm.xor_self(Ecx),
            Opcode::Zero => asm.mov_mi(Ebx, op(0), 0),
            Opcode::ZeroS => asm.mov_mi(Ebp, op(0), 0),
            Opcode::SignPri => asm.movsx_r32_r8(Eax, Eax),
            Opcode::SignAlt => asm.movsx_r32_r8(Ecx, Ecx),
            Opcode::Eq => self.emit_cmp(asm, Cond::Eq),
            Opcode::Neq => self.emit_cmp(asm, Cond::Ne),
            Opcode::Less => self.emit_cmp(asm, Cond::Below),
            Opcode::Leq => self.emit_cmp(asm, Cond::BelowEq),
            Opcode::Grtr => self.emit_cmp(asm, Cond::Above),
            Opcode::Geq => self.emit_cmp(asm, Cond::AboveEq),
            Opcode::Sless => self.emit_cmp(asm, Cond::Less),
            Opcode::Sleq => self.emit_cmp(asm, Cond::LessEq),
            Opcode::Sgrtr => self.emit_cmp(asm, Cond::Greater),
            Opcode::Sgeq => self.emit_cmp(asm, Cond::GreaterEq),
            Opcode::EqCPri => {
                asm.cmp_ri(Eax, op(0));
                asm.setcc_movzx_eax(Cond::Eq);
            }
            Opcode::EqCAlt => {
                asm.cmp_ri(Ecx, op(0));
                asm.setcc_movzx_eax(Cond::Eq);
            }
            Opcode::IncPri => asm.inc_r(Eax),
            Opcode::IncAlt => asm.inc_r(Ecx),
            Opcode::Inc => asm.inc_m(Ebx, op(0)),
            Opcode::IncS => asm.inc_m(Ebp, op(0)),
            Opcode::IncI => asm.inc_m_sib(Ebx, Eax, 1),
            Opcode::DecPri => asm.dec_r(Eax),
            Opcode::DecAlt => asm.dec_r(Ecx),
            Opcode::Dec => asm.dec_m(Ebx, op(0)),
            Opcode::DecS => asm.dec_m(Ebp, op(0)),
            Opcode::DecI => asm.dec_m_sib(Ebx, Eax, 1),
            Opcode::Movs => {
                let n = op(0) as u32;
                asm.push_r(Ecx);
                asm.lea_sib(Esi, Ebx, Eax, 1);
                asm.lea_sib(Edi, Ebx, Ecx, 1);
                if n % 4 == 0 {
                    asm.mov_ri(Ecx, n / 4);
                    asm.rep_movsd();
                } else if n % 2 == 0 {
                    asm.mov_ri(Ecx, n / 2);
                    asm.rep_movsw();
                } else {
                    asm.mov_ri(Ecx, n);
                    asm.rep_movsb();
                }
                asm.pop_r(Ecx);
            }
            Opcode::Cmps => {
                let n = op(0) as u32;
                asm.push_r(Ecx);
                asm.lea_sib(Esi, Ebx, Eax, 1);
                asm.lea_sib(Edi, Ebx, Ecx, 1);
                asm.mov_ri(Ecx, n);
                asm.repe_cmpsb();
                let done = asm.new_label();
                asm.mov_ri(Eax, (-1i32) as u32);
                asm.jcc_label(Cond::Below, done);
                asm.mov_ri(Eax, 0);
                asm.jcc_label(Cond::Eq, done);
                asm.mov_ri(Eax, 1);
                asm.bind(done);
                asm.pop_r(Ecx);
            }
            Opcode::Fill => {
                let n = op(0) as u32;
                asm.push_r(Ecx);
                asm.lea_sib(Edi, Ebx, Ecx, 1);
                asm.mov_ri(Ecx, n / 4);
                asm.rep_stosd();
                asm.pop_r(Ecx);
            }
            Opcode::Halt => self.emit_halt(asm, op(0)),
            Opcode::Bounds => {
                let bound = op(0);
                let ok = asm.new_label();
                asm.cmp_ri(Eax, bound);
                asm.jcc_label(Cond::BelowEq, ok);
                self.emit_halt(asm, AmxError::Bounds as i32);
                asm.bind(ok);
            }
            Opcode::SysreqPri => {
                asm.mov_rr(Edx, Eax);
                asm.call_label(self.helpers.sysreq_c);
            }
            Opcode::SysreqC => {
                let index = op(0) as usize;
                let name = self
                    .module
                    .native_name(index)
                    .ok_or(JitError::UnknownNative(op(0)))?;
                if name == "heapspace" {
                    asm.mov_r_abs(Edx, self.rib.amx_ptr);
                    asm.mov_rm(Eax, Edx, offsets::STP);
                    asm.mov_rm(Edi, Edx, offsets::HEA);
                    asm.sub_rr(Eax, Edi);
                } else if let Some(emit) = intrinsics::lookup(name) {
                    emit(asm);
                } else {
                    asm.mov_ri(Edx, index as u32);
                    asm.call_label(self.helpers.sysreq_c);
                }
            }
            Opcode::SysreqD => {
                asm.mov_ri(Edx, op(0) as u32);
                asm.call_label(self.helpers.sysreq_d);
            }
            Opcode::Switch => {
                let table_addr = op(0) as usize;
                let case_table = self.module.case_table_at(table_addr)?;
                for i in 0..case_table.num_cases() {
                    asm.cmp_ri(Eax, case_table.value(i));
                    let target = asm.label_for_address(case_table.address(i));
                    asm.jcc_label(Cond::Eq, target);
                }
                let default_target = asm.label_for_address(case_table.default_address());
                asm.jmp_label(default_target);
            }
            Opcode::Casetbl => {}
            Opcode::SwapPri => asm.xchg_m_r(Esp, 0, Eax),
            Opcode::SwapAlt => asm.xchg_m_r(Esp, 0, Ecx),
            Opcode::PushAdr => {
                asm.lea(Edx, Ebp, op(0));
                asm.sub_rr(Edx, Ebx);
                asm.push_r(Edx);
            }
            Opcode::Nop => asm.nop(),
            Opcode::Break => {
                if self.embed_breakpoints {
                    asm.int3();
                }
            }
            Opcode::None
            | Opcode::PushR
            | Opcode::File
            | Opcode::Line
            | Opcode::Symbol
            | Opcode::Srange
            | Opcode::Symtag
            | Opcode::Jrel => return Err(JitError::UnsupportedOpcode(instr.opcode)),
        }
        Ok(())
    }

    fn emit_cmp(&self, asm: &mut Assembler, cond: Cond) {
        asm.cmp_rr(Reg::Eax, Reg::Ecx);
        asm.setcc_movzx_eax(cond);
    }

    fn emit_cmp_jump(&self, asm: &mut Assembler, instr: &Instruction, cond: Cond) {
        asm.cmp_rr(Reg::Eax, Reg::Ecx);
        let target = asm.label_for_address(instr.operand(0));
        asm.jcc_label(cond, target);
    }
}
