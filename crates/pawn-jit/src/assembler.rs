//! A small x86-32 assembler: just enough instruction encodings to
//! lower every AMX opcode, plus an AMX-address-keyed label table.
//!
//! This plays the role `asmjit::X86Assembler` plays in the reference
//! compiler, but hand-rolled and scoped down to 32-bit registers only
//! (no REX prefixes, no SIB scale other than 1/2/4/8).

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Eax,
    Ecx,
    Edx,
    Ebx,
    Esp,
    Ebp,
    Esi,
    Edi,
}

impl Reg {
    fn code(self) -> u8 {
        match self {
            Reg::Eax => 0,
            Reg::Ecx => 1,
            Reg::Edx => 2,
            Reg::Ebx => 3,
            Reg::Esp => 4,
            Reg::Ebp => 5,
            Reg::Esi => 6,
            Reg::Edi => 7,
        }
    }
}

/// Condition codes used by `Jcc`/`Setcc`, named after the signed or
/// unsigned comparison they test for (matching the AMX compare-opcode
/// naming, not the raw mnemonic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Below,
    BelowEq,
    Above,
    AboveEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Zero,
    NotZero,
}

impl Cond {
    fn tttn(self) -> u8 {
        match self {
            Cond::Eq | Cond::Zero => 0x4,
            Cond::Ne | Cond::NotZero => 0x5,
            Cond::Below => 0x2,
            Cond::BelowEq => 0x6,
            Cond::Above => 0x7,
            Cond::AboveEq => 0x3,
            Cond::Less => 0xc,
            Cond::LessEq => 0xe,
            Cond::Greater => 0xf,
            Cond::GreaterEq => 0xd,
        }
    }
}

/// A forward-or-backward reference to a position in the code stream.
/// AMX addresses are the natural key (every instruction decoded from
/// the code section has one), but the trampolines also need a handful
/// of labels that have no AMX address - those get ids from the
/// internal counter instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

enum PendingKind {
    Rel32,
}

struct Pending {
    patch_at: usize,
    label: Label,
    kind: PendingKind,
}

pub struct Assembler {
    code: Vec<u8>,
    next_label: u32,
    by_address: HashMap<i32, Label>,
    bound: HashMap<Label, usize>,
    pending: Vec<Pending>,
    /// Code offsets holding a disp32 that must become an absolute
    /// runtime address once this buffer has a final home in memory -
    /// used for every RIB-slot reference (`mov eax, [amx_ptr_label_]`
    /// and friends in the reference compiler).
    abs_fixups: Vec<(usize, Label)>,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            next_label: 0,
            by_address: HashMap::new(),
            bound: HashMap::new(),
            pending: Vec::new(),
            abs_fixups: Vec::new(),
        }
    }

    pub fn abs_fixups(&self) -> &[(usize, Label)] {
        &self.abs_fixups
    }

    /// Turn every absolute-addressing fixup into the real runtime
    /// address of its label, now that the code has been copied to
    /// `code_base` (the base address of the mapped executable buffer).
    /// Must run after [`Self::patch_all`] so every label is bound.
    pub fn patch_absolute(&mut self, code_base: usize) -> Result<(), Label> {
        for &(at, label) in &self.abs_fixups {
            let offset = *self.bound.get(&label).ok_or(label)?;
            let addr = (code_base + offset) as u32;
            self.code[at..at + 4].copy_from_slice(&addr.to_le_bytes());
        }
        Ok(())
    }

    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn new_label(&mut self) -> Label {
        let id = Label(self.next_label);
        self.next_label += 1;
        id
    }

    /// Get or create the label bound to a given AMX code address. Every
    /// jump/call whose destination is an AMX address goes through this
    /// so that forward references (jumping to an instruction not yet
    /// translated) resolve to the same label as the eventual `bind`.
    pub fn label_for_address(&mut self, address: i32) -> Label {
        if let Some(&l) = self.by_address.get(&address) {
            return l;
        }
        let l = self.new_label();
        self.by_address.insert(address, l);
        l
    }

    pub fn bind(&mut self, label: Label) {
        self.bound.insert(label, self.code.len());
    }

    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.bound.get(&label).copied()
    }

    /// Resolve every recorded jump/call displacement against the final
    /// bound offsets. Must be called once, after every opcode in the
    /// function has been translated and every label bound.
    pub fn patch_all(&mut self) -> Result<(), Label> {
        for p in &self.pending {
            let target = *self.bound.get(&p.label).ok_or(p.label)?;
            match p.kind {
                PendingKind::Rel32 => {
                    let next_ip = p.patch_at + 4;
                    let rel = target as i64 - next_ip as i64;
                    let bytes = (rel as i32).to_le_bytes();
                    let at = p.patch_at;
                    self.code[at..at + 4].copy_from_slice(&bytes);
                }
            }
        }
        Ok(())
    }

    pub fn into_code(self) -> Vec<u8> {
        self.code
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    // -- raw emission helpers --

    fn b(&mut self, byte: u8) {
        self.code.push(byte);
    }

    fn dword(&mut self, v: u32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn modrm_reg_reg(&mut self, reg: Reg, rm: Reg) {
        self.b(0xc0 | (reg.code() << 3) | rm.code());
    }

    /// `[rm + disp]`, choosing the shortest disp8/disp32/no-disp form,
    /// and emitting the SIB byte `[esp]` always needs.
    fn modrm_mem(&mut self, reg_field: u8, base: Reg, disp: i32) {
        let needs_sib = base == Reg::Esp;
        let mod_bits: u8 = if disp == 0 && base != Reg::Ebp {
            0b00
        } else if (-128..=127).contains(&disp) {
            0b01
        } else {
            0b10
        };
        let rm = if needs_sib { 0b100 } else { base.code() };
        self.b((mod_bits << 6) | (reg_field << 3) | rm);
        if needs_sib {
            self.b(0x24); // scale=1, index=none, base=esp
        }
        match mod_bits {
            0b00 => {}
            0b01 => self.b(disp as i8 as u8),
            _ => self.dword(disp as u32),
        }
    }

    fn modrm_sib(&mut self, reg_field: u8, base: Reg, index: Reg, scale: u8, disp: i32) {
        let ss = match scale {
            1 => 0,
            2 => 1,
            4 => 2,
            8 => 3,
            _ => panic!("invalid scale {scale}"),
        };
        let mod_bits: u8 = if disp == 0 && base != Reg::Ebp {
            0b00
        } else if (-128..=127).contains(&disp) {
            0b01
        } else {
            0b10
        };
        self.b((mod_bits << 6) | (reg_field << 3) | 0b100);
        self.b((ss << 6) | (index.code() << 3) | base.code());
        match mod_bits {
            0b00 => {}
            0b01 => self.b(disp as i8 as u8),
            _ => self.dword(disp as u32),
        }
    }

    // -- mov --

    pub fn mov_rr(&mut self, dst: Reg, src: Reg) {
        self.b(0x89);
        self.modrm_reg_reg(src, dst);
    }

    pub fn mov_ri(&mut self, dst: Reg, imm: u32) {
        self.b(0xb8 + dst.code());
        self.dword(imm);
    }

    pub fn xor_self(&mut self, dst: Reg) {
        self.b(0x31);
        self.modrm_reg_reg(dst, dst);
    }

    pub fn mov_rm(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.b(0x8b);
        self.modrm_mem(dst.code(), base, disp);
    }

    pub fn mov_mr(&mut self, base: Reg, disp: i32, src: Reg) {
        self.b(0x89);
        self.modrm_mem(src.code(), base, disp);
    }

    pub fn mov_mi(&mut self, base: Reg, disp: i32, imm: u32) {
        self.b(0xc7);
        self.modrm_mem(0, base, disp);
        self.dword(imm);
    }

    pub fn mov_rm_sib(&mut self, dst: Reg, base: Reg, index: Reg, scale: u8) {
        self.b(0x8b);
        self.modrm_sib(dst.code(), base, index, scale, 0);
    }

    /// `mov [base + index*scale], src` - the indexed store `STOR_I`/
    /// `SREF_*` need once the target address has been computed into a
    /// register rather than known as a disp32 at emit time.
    pub fn mov_sib_r(&mut self, base: Reg, index: Reg, scale: u8, src: Reg) {
        self.b(0x89);
        self.modrm_sib(src.code(), base, index, scale, 0);
    }

    pub fn movzx_r32_sib8(&mut self, dst: Reg, base: Reg, index: Reg, scale: u8) {
        self.b(0x0f);
        self.b(0xb6);
        self.modrm_sib(dst.code(), base, index, scale, 0);
    }

    pub fn movzx_r32_sib16(&mut self, dst: Reg, base: Reg, index: Reg, scale: u8) {
        self.b(0x0f);
        self.b(0xb7);
        self.modrm_sib(dst.code(), base, index, scale, 0);
    }

    pub fn mov_sib8_r(&mut self, base: Reg, index: Reg, scale: u8, src: Reg) {
        self.b(0x88);
        self.modrm_sib(src.code(), base, index, scale, 0);
    }

    pub fn mov_sib16_r(&mut self, base: Reg, index: Reg, scale: u8, src: Reg) {
        self.b(0x66);
        self.b(0x89);
        self.modrm_sib(src.code(), base, index, scale, 0);
    }

    pub fn inc_m_sib(&mut self, base: Reg, index: Reg, scale: u8) {
        self.b(0xff);
        self.modrm_sib(0, base, index, scale, 0);
    }

    pub fn dec_m_sib(&mut self, base: Reg, index: Reg, scale: u8) {
        self.b(0xff);
        self.modrm_sib(1, base, index, scale, 0);
    }

    pub fn lea(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.b(0x8d);
        self.modrm_mem(dst.code(), base, disp);
    }

    pub fn lea_sib(&mut self, dst: Reg, base: Reg, index: Reg, scale: u8) {
        self.b(0x8d);
        self.modrm_sib(dst.code(), base, index, scale, 0);
    }

    // byte/word memory access, used by LODB_I/STRB_I/MOVS/CMPS sizing

    pub fn movzx_r32_m8(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.b(0x0f);
        self.b(0xb6);
        self.modrm_mem(dst.code(), base, disp);
    }

    pub fn movzx_r32_m16(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.b(0x0f);
        self.b(0xb7);
        self.modrm_mem(dst.code(), base, disp);
    }

    pub fn mov_m8_r32(&mut self, base: Reg, disp: i32, src: Reg) {
        self.b(0x88);
        self.modrm_mem(src.code(), base, disp);
    }

    pub fn mov_m16_r32(&mut self, base: Reg, disp: i32, src: Reg) {
        self.b(0x66);
        self.b(0x89);
        self.modrm_mem(src.code(), base, disp);
    }

    pub fn movsx_r32_r8(&mut self, dst: Reg, src: Reg) {
        self.b(0x0f);
        self.b(0xbe);
        self.modrm_reg_reg(dst, src);
    }

    // -- stack --

    pub fn push_r(&mut self, r: Reg) {
        self.b(0x50 + r.code());
    }

    pub fn pop_r(&mut self, r: Reg) {
        self.b(0x58 + r.code());
    }

    pub fn push_i(&mut self, imm: u32) {
        self.b(0x68);
        self.dword(imm);
    }

    pub fn push_m(&mut self, base: Reg, disp: i32) {
        self.b(0xff);
        self.modrm_mem(6, base, disp);
    }

    pub fn pop_m(&mut self, base: Reg, disp: i32) {
        self.b(0x8f);
        self.modrm_mem(0, base, disp);
    }

    pub fn xchg_m_r(&mut self, base: Reg, disp: i32, r: Reg) {
        self.b(0x87);
        self.modrm_mem(r.code(), base, disp);
    }

    // -- arithmetic/logic (reg,reg) --

    fn alu_rr(&mut self, opcode: u8, dst: Reg, src: Reg) {
        self.b(opcode);
        self.modrm_reg_reg(src, dst);
    }

    pub fn add_rr(&mut self, dst: Reg, src: Reg) {
        self.alu_rr(0x01, dst, src);
    }
    pub fn sub_rr(&mut self, dst: Reg, src: Reg) {
        self.alu_rr(0x29, dst, src);
    }

    /// `op dst, [base+disp]` - the `0x03`/`0x2b`-class reg-from-memory
    /// forms `RETN` needs (`add esp, [esp]`).
    fn alu_rm(&mut self, opcode: u8, dst: Reg, base: Reg, disp: i32) {
        self.b(opcode);
        self.modrm_mem(dst.code(), base, disp);
    }
    pub fn add_rm(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.alu_rm(0x03, dst, base, disp);
    }

    /// `sub [base+disp], src` - `PROC`'s frame-relativization needs
    /// the reverse direction of `add_mi`/`sub_mi` (a register operand,
    /// not an immediate).
    fn alu_mr(&mut self, opcode: u8, base: Reg, disp: i32, src: Reg) {
        self.b(opcode);
        self.modrm_mem(src.code(), base, disp);
    }
    pub fn sub_mr(&mut self, base: Reg, disp: i32, src: Reg) {
        self.alu_mr(0x29, base, disp, src);
    }
    pub fn and_rr(&mut self, dst: Reg, src: Reg) {
        self.alu_rr(0x21, dst, src);
    }
    pub fn or_rr(&mut self, dst: Reg, src: Reg) {
        self.alu_rr(0x09, dst, src);
    }
    pub fn xor_rr(&mut self, dst: Reg, src: Reg) {
        self.alu_rr(0x31, dst, src);
    }
    pub fn cmp_rr(&mut self, a: Reg, b: Reg) {
        self.alu_rr(0x39, a, b);
    }
    pub fn test_rr(&mut self, a: Reg, b: Reg) {
        self.alu_rr(0x85, a, b);
    }
    pub fn xchg_rr(&mut self, a: Reg, b: Reg) {
        if a == Reg::Eax {
            self.b(0x90 + b.code());
        } else if b == Reg::Eax {
            self.b(0x90 + a.code());
        } else {
            self.b(0x87);
            self.modrm_reg_reg(a, b);
        }
    }

    fn alu_ri(&mut self, ext: u8, dst: Reg, imm: i32) {
        self.b(0x81);
        self.modrm_reg_reg_ext(ext, dst);
        self.dword(imm as u32);
    }

    fn modrm_reg_reg_ext(&mut self, ext: u8, rm: Reg) {
        self.b(0xc0 | (ext << 3) | rm.code());
    }

    pub fn add_ri(&mut self, dst: Reg, imm: i32) {
        self.alu_ri(0, dst, imm);
    }
    pub fn sub_ri(&mut self, dst: Reg, imm: i32) {
        self.alu_ri(5, dst, imm);
    }
    pub fn and_ri(&mut self, dst: Reg, imm: i32) {
        self.alu_ri(4, dst, imm);
    }
    pub fn xor_ri(&mut self, dst: Reg, imm: i32) {
        self.alu_ri(6, dst, imm);
    }
    pub fn cmp_ri(&mut self, dst: Reg, imm: i32) {
        self.alu_ri(7, dst, imm);
    }

    pub fn add_mi(&mut self, base: Reg, disp: i32, imm: i32) {
        self.b(0x81);
        self.modrm_mem(0, base, disp);
        self.dword(imm as u32);
    }
    pub fn sub_mi(&mut self, base: Reg, disp: i32, imm: i32) {
        self.b(0x81);
        self.modrm_mem(5, base, disp);
        self.dword(imm as u32);
    }

    pub fn imul_rr(&mut self, dst: Reg, src: Reg) {
        self.b(0x0f);
        self.b(0xaf);
        self.modrm_reg_reg(dst, src);
    }

    pub fn imul_ri(&mut self, dst: Reg, src: Reg, imm: i32) {
        self.b(0x69);
        self.modrm_reg_reg(dst, src);
        self.dword(imm as u32);
    }

    /// One-operand `imul`/`mul`/`idiv`/`div` (`F7 /n`), operating
    /// against `edx:eax` per the standard x86 convention.
    fn f7(&mut self, ext: u8, r: Reg) {
        self.b(0xf7);
        self.modrm_reg_reg_ext(ext, r);
    }

    pub fn imul_full(&mut self, r: Reg) {
        self.f7(5, r);
    }
    pub fn mul_full(&mut self, r: Reg) {
        self.f7(4, r);
    }
    pub fn idiv(&mut self, r: Reg) {
        self.f7(7, r);
    }
    pub fn div(&mut self, r: Reg) {
        self.f7(6, r);
    }
    pub fn neg(&mut self, r: Reg) {
        self.f7(3, r);
    }
    pub fn not_(&mut self, r: Reg) {
        self.f7(2, r);
    }

    pub fn cdq(&mut self) {
        self.b(0x99);
    }

    pub fn inc_r(&mut self, r: Reg) {
        self.b(0x40 + r.code());
    }
    pub fn dec_r(&mut self, r: Reg) {
        self.b(0x48 + r.code());
    }
    pub fn inc_m(&mut self, base: Reg, disp: i32) {
        self.b(0xff);
        self.modrm_mem(0, base, disp);
    }
    pub fn dec_m(&mut self, base: Reg, disp: i32) {
        self.b(0xff);
        self.modrm_mem(1, base, disp);
    }

    pub fn shl_cl(&mut self, r: Reg) {
        self.b(0xd3);
        self.modrm_reg_reg_ext(4, r);
    }
    pub fn shr_cl(&mut self, r: Reg) {
        self.b(0xd3);
        self.modrm_reg_reg_ext(5, r);
    }
    pub fn sar_cl(&mut self, r: Reg) {
        self.b(0xd3);
        self.modrm_reg_reg_ext(7, r);
    }
    pub fn shl_i(&mut self, r: Reg, imm: u8) {
        self.b(0xc1);
        self.modrm_reg_reg_ext(4, r);
        self.b(imm);
    }
    pub fn shr_i(&mut self, r: Reg, imm: u8) {
        self.b(0xc1);
        self.modrm_reg_reg_ext(5, r);
        self.b(imm);
    }
    pub fn sar_i(&mut self, r: Reg, imm: u8) {
        self.b(0xc1);
        self.modrm_reg_reg_ext(7, r);
        self.b(imm);
    }

    /// `setCC al` followed by `movzx eax, al`, the idiom every AMX
    /// compare opcode lowers to.
    pub fn setcc_movzx_eax(&mut self, cond: Cond) {
        self.b(0x0f);
        self.b(0x90 | cond.tttn());
        self.modrm_reg_reg_ext(0, Reg::Eax); // setcc al (reg field unused)
        self.b(0x0f);
        self.b(0xb6);
        self.modrm_reg_reg(Reg::Eax, Reg::Eax);
    }

    // -- control flow --

    pub fn call_label(&mut self, label: Label) {
        self.b(0xe8);
        let patch_at = self.code.len();
        self.dword(0);
        self.pending.push(Pending {
            patch_at,
            label,
            kind: PendingKind::Rel32,
        });
    }

    pub fn jmp_label(&mut self, label: Label) {
        self.b(0xe9);
        let patch_at = self.code.len();
        self.dword(0);
        self.pending.push(Pending {
            patch_at,
            label,
            kind: PendingKind::Rel32,
        });
    }

    pub fn jcc_label(&mut self, cond: Cond, label: Label) {
        self.b(0x0f);
        self.b(0x80 | cond.tttn());
        let patch_at = self.code.len();
        self.dword(0);
        self.pending.push(Pending {
            patch_at,
            label,
            kind: PendingKind::Rel32,
        });
    }

    pub fn call_reg(&mut self, r: Reg) {
        self.b(0xff);
        self.modrm_reg_reg_ext(2, r);
    }

    /// Call a fixed, process-lifetime absolute address - how generated
    /// code reaches `pawn_jit::runtime_helpers` functions. `edx` is
    /// clobbered as the call target register; callers that still need
    /// a live value in `edx` across a sysreq/jump helper call save it
    /// on the native stack first (every lowering that uses this does).
    pub fn call_extern(&mut self, addr: usize) {
        self.mov_ri(Reg::Edx, addr as u32);
        self.call_reg(Reg::Edx);
    }

    pub fn jmp_reg(&mut self, r: Reg) {
        self.b(0xff);
        self.modrm_reg_reg_ext(4, r);
    }

    pub fn ret(&mut self) {
        self.b(0xc3);
    }

    pub fn nop(&mut self) {
        self.b(0x90);
    }

    pub fn int3(&mut self) {
        self.b(0xcc);
    }

    pub fn rep_movsd(&mut self) {
        self.b(0xf3);
        self.b(0xa5);
    }
    pub fn rep_movsw(&mut self) {
        self.b(0xf3);
        self.b(0x66);
        self.b(0xa5);
    }
    pub fn rep_movsb(&mut self) {
        self.b(0xf3);
        self.b(0xa4);
    }
    pub fn rep_stosd(&mut self) {
        self.b(0xf3);
        self.b(0xab);
    }
    pub fn repe_cmpsb(&mut self) {
        self.b(0xf3);
        self.b(0xa6);
    }

    /// Pad with single-byte `nop`s until `offset()` is a multiple of
    /// `align` - used to 16-byte align every `OP_PROC` entry point.
    pub fn align(&mut self, align: usize) {
        while self.code.len() % align != 0 {
            self.nop();
        }
    }

    /// Emit a raw little-endian dword of data (not an instruction) -
    /// used for the RIB and address-map slots, which sit in the code
    /// buffer but are never executed.
    pub fn dd(&mut self, v: u32) {
        self.dword(v);
    }

    // -- x87, used only by the intrinsic substitutions for float.* --

    pub fn fld_m32(&mut self, base: Reg, disp: i32) {
        self.b(0xd9);
        self.modrm_mem(0, base, disp);
    }
    pub fn fstp_m32(&mut self, base: Reg, disp: i32) {
        self.b(0xd9);
        self.modrm_mem(3, base, disp);
    }
    pub fn fild_m32(&mut self, base: Reg, disp: i32) {
        self.b(0xdb);
        self.modrm_mem(0, base, disp);
    }
    pub fn fistp_m32(&mut self, base: Reg, disp: i32) {
        self.b(0xdb);
        self.modrm_mem(3, base, disp);
    }
    pub fn fadd_m32(&mut self, base: Reg, disp: i32) {
        self.b(0xd8);
        self.modrm_mem(0, base, disp);
    }
    pub fn fsub_m32(&mut self, base: Reg, disp: i32) {
        self.b(0xd8);
        self.modrm_mem(4, base, disp);
    }
    pub fn fmul_m32(&mut self, base: Reg, disp: i32) {
        self.b(0xd8);
        self.modrm_mem(1, base, disp);
    }
    pub fn fdiv_m32(&mut self, base: Reg, disp: i32) {
        self.b(0xd8);
        self.modrm_mem(6, base, disp);
    }
    pub fn fabs_(&mut self) {
        self.b(0xd9);
        self.b(0xe1);
    }
    pub fn fsqrt(&mut self) {
        self.b(0xd9);
        self.b(0xfa);
    }
    pub fn fld1(&mut self) {
        self.b(0xd9);
        self.b(0xe8);
    }
    pub fn fyl2x(&mut self) {
        self.b(0xd9);
        self.b(0xf1);
    }
    pub fn fxch(&mut self) {
        self.b(0xd9);
        self.b(0xc9);
    }
    pub fn fdivp(&mut self) {
        self.b(0xde);
        self.b(0xf9);
    }
    pub fn fcompp(&mut self) {
        self.b(0xde);
        self.b(0xd9);
    }
    pub fn fnstsw_ax(&mut self) {
        self.b(0xdf);
        self.b(0xe0);
    }
    pub fn sahf(&mut self) {
        self.b(0x9e);
    }
    pub fn test_ah_imm8(&mut self, imm: u8) {
        // F6 /0 with the ModRM rm field set to AH (100).
        self.b(0xf6);
        self.b(0xc4);
        self.b(imm);
    }

    pub fn xchg_ah_al(&mut self) {
        self.b(0x86);
        self.b(0xe0);
    }

    pub fn ror_i(&mut self, r: Reg, imm: u8) {
        self.b(0xc1);
        self.b(0xc8 | r.code());
        self.b(imm);
    }

    // -- absolute-addressed memory operands (RIB slots) --

    /// `mov r32, [label]`, where `label` names an absolute memory slot
    /// (a RIB field) rather than a jump target.
    pub fn mov_r_abs(&mut self, dst: Reg, label: Label) {
        self.b(0x8b);
        self.b((dst.code() << 3) | 0b101);
        let at = self.code.len();
        self.dword(0);
        self.abs_fixups.push((at, label));
    }

    /// `mov [label], r32`.
    pub fn mov_abs_r(&mut self, label: Label, src: Reg) {
        self.b(0x89);
        self.b((src.code() << 3) | 0b101);
        let at = self.code.len();
        self.dword(0);
        self.abs_fixups.push((at, label));
    }

    /// `lea r32, [label]` - the address of the slot itself, not its
    /// contents (used to pass `&rib` to helper functions).
    pub fn lea_r_abs(&mut self, dst: Reg, label: Label) {
        self.b(0x8d);
        self.b((dst.code() << 3) | 0b101);
        let at = self.code.len();
        self.dword(0);
        self.abs_fixups.push((at, label));
    }

    /// `push [label]`.
    pub fn push_abs(&mut self, label: Label) {
        self.b(0xff);
        self.b(0b110_101);
        let at = self.code.len();
        self.dword(0);
        self.abs_fixups.push((at, label));
    }

    /// `pop [label]`.
    pub fn pop_abs(&mut self, label: Label) {
        self.b(0x8f);
        self.b(0b000_101);
        let at = self.code.len();
        self.dword(0);
        self.abs_fixups.push((at, label));
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_mov_reg_reg() {
        let mut a = Assembler::new();
        a.mov_rr(Reg::Ecx, Reg::Eax);
        assert_eq!(a.code(), &[0x89, 0xc1]);
    }

    #[test]
    fn encodes_mov_disp() {
        let mut a = Assembler::new();
        a.mov_rm(Reg::Eax, Reg::Ebx, 16);
        assert_eq!(a.code(), &[0x8b, 0x43, 0x10]);
    }

    #[test]
    fn resolves_forward_jump() {
        let mut a = Assembler::new();
        let target = a.new_label();
        a.jmp_label(target);
        a.nop();
        a.bind(target);
        a.patch_all().unwrap();
        let code = a.into_code();
        // jmp rel32 is 5 bytes; after the single nop, the bound offset
        // is 6, so rel = 6 - 5 = 1.
        assert_eq!(&code[0..1], &[0xe9]);
        assert_eq!(i32::from_le_bytes(code[1..5].try_into().unwrap()), 1);
    }

    #[test]
    fn amx_address_labels_are_stable() {
        let mut a = Assembler::new();
        let l1 = a.label_for_address(40);
        let l2 = a.label_for_address(40);
        assert_eq!(l1, l2);
    }
}
