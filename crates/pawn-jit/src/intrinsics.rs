//! Inlined native functions.
//!
//! A small, closed set of `float*`/core natives get compiled inline
//! instead of going through `SYSREQ`'s callback dispatch, grounded in
//! `CompilerImpl::EmitIntrinsic`'s dispatch table. Each one reads its
//! arguments directly off the AMX stack at the offsets the calling
//! convention guarantees (`[esp+4]` is the first argument, `[esp]`
//! itself holds the argument count pushed by the call site) and
//! leaves its result in `eax`; nothing here touches `esp` - the
//! `PUSH.C`/`STACK` pair bracketing the call already account for it.

use crate::assembler::{Assembler, Cond, Reg};

const ARG0: i32 = 4;
const ARG1: i32 = 8;
const ARG2: i32 = 12;

/// Look up an inlineable native by name. Returns `None` for anything
/// that must go through the ordinary `SYSREQ` callback path.
///
/// `heapspace` is deliberately excluded: it is the one intrinsic that
/// needs to read a RIB slot (the live AMX pointer) rather than just
/// the argument stack, so the translator emits it directly - see
/// [`is_intrinsic`] for membership testing that includes it.
pub fn lookup(name: &str) -> Option<fn(&mut Assembler)> {
    Some(match name {
        "float" => emit_float,
        "floatabs" => emit_floatabs,
        "floatadd" => emit_floatadd,
        "floatsub" => emit_floatsub,
        "floatmul" => emit_floatmul,
        "floatdiv" => emit_floatdiv,
        "floatsqroot" => emit_floatsqroot,
        "floatlog" => emit_floatlog,
        "floatcmp" => emit_floatcmp,
        "clamp" => emit_clamp,
        "numargs" => emit_numargs,
        "min" => emit_min,
        "max" => emit_max,
        "swapchars" => emit_swapchars,
        _ => return None,
    })
}

/// Whether `name` is one of the closed set of inlined natives,
/// including `heapspace` (handled specially by the translator).
pub fn is_intrinsic(name: &str) -> bool {
    name == "heapspace" || lookup(name).is_some()
}

fn emit_float(asm: &mut Assembler) {
    asm.fild_m32(Reg::Esp, ARG0);
    asm.fstp_m32(Reg::Esp, ARG0);
    asm.mov_rm(Reg::Eax, Reg::Esp, ARG0);
}

fn emit_floatabs(asm: &mut Assembler) {
    asm.fld_m32(Reg::Esp, ARG0);
    asm.fabs_();
    asm.fstp_m32(Reg::Esp, ARG0);
    asm.mov_rm(Reg::Eax, Reg::Esp, ARG0);
}

fn emit_floatadd(asm: &mut Assembler) {
    asm.fld_m32(Reg::Esp, ARG0);
    asm.fadd_m32(Reg::Esp, ARG1);
    asm.fstp_m32(Reg::Esp, ARG0);
    asm.mov_rm(Reg::Eax, Reg::Esp, ARG0);
}

fn emit_floatsub(asm: &mut Assembler) {
    asm.fld_m32(Reg::Esp, ARG0);
    asm.fsub_m32(Reg::Esp, ARG1);
    asm.fstp_m32(Reg::Esp, ARG0);
    asm.mov_rm(Reg::Eax, Reg::Esp, ARG0);
}

fn emit_floatmul(asm: &mut Assembler) {
    asm.fld_m32(Reg::Esp, ARG0);
    asm.fmul_m32(Reg::Esp, ARG1);
    asm.fstp_m32(Reg::Esp, ARG0);
    asm.mov_rm(Reg::Eax, Reg::Esp, ARG0);
}

fn emit_floatdiv(asm: &mut Assembler) {
    asm.fld_m32(Reg::Esp, ARG0);
    asm.fdiv_m32(Reg::Esp, ARG1);
    asm.fstp_m32(Reg::Esp, ARG0);
    asm.mov_rm(Reg::Eax, Reg::Esp, ARG0);
}

fn emit_floatsqroot(asm: &mut Assembler) {
    asm.fld_m32(Reg::Esp, ARG0);
    asm.fsqrt();
    asm.fstp_m32(Reg::Esp, ARG0);
    asm.mov_rm(Reg::Eax, Reg::Esp, ARG0);
}

/// `floatlog(value, base)`, via the standard `log_base(x) =
/// log2(x)/log2(base)` identity (`fyl2x` only ever computes `y*log2(x)`).
fn emit_floatlog(asm: &mut Assembler) {
    asm.fld1();
    asm.fld_m32(Reg::Esp, ARG0);
    asm.fyl2x(); // ST0 = log2(value)
    asm.fld1();
    asm.fld_m32(Reg::Esp, ARG1);
    asm.fyl2x(); // ST0 = log2(base), ST1 = log2(value)
    asm.fdivp(); // ST0 = log2(value) / log2(base)
    asm.fstp_m32(Reg::Esp, ARG0);
    asm.mov_rm(Reg::Eax, Reg::Esp, ARG0);
}

/// `floatcmp(a, b)`: -1/0/1, using `sahf` to fold the FPU condition
/// bits (`C0`/`C2`/`C3`) directly into `CF`/`PF`/`ZF`.
fn emit_floatcmp(asm: &mut Assembler) {
    let done = asm.new_label();
    let not_less = asm.new_label();

    asm.fld_m32(Reg::Esp, ARG1); // ST0 = b
    asm.fld_m32(Reg::Esp, ARG0); // ST0 = a, ST1 = b
    asm.fcompp(); // compares a (ST0) against b (ST1), pops both
    asm.fnstsw_ax();
    asm.sahf();

    asm.mov_ri(Reg::Eax, (-1i32) as u32);
    asm.jcc_label(Cond::AboveEq, not_less); // !CF => a >= b
    asm.jmp_label(done);

    asm.bind(not_less);
    asm.mov_ri(Reg::Eax, 0);
    asm.jcc_label(Cond::Eq, done);
    asm.mov_ri(Reg::Eax, 1);

    asm.bind(done);
}

fn emit_clamp(asm: &mut Assembler) {
    let skip_lo = asm.new_label();
    let skip_hi = asm.new_label();

    asm.mov_rm(Reg::Eax, Reg::Esp, ARG0); // value
    asm.mov_rm(Reg::Edx, Reg::Esp, ARG1); // lo
    asm.cmp_rr(Reg::Eax, Reg::Edx);
    asm.jcc_label(Cond::GreaterEq, skip_lo);
    asm.mov_rr(Reg::Eax, Reg::Edx);
    asm.bind(skip_lo);

    asm.mov_rm(Reg::Edx, Reg::Esp, ARG2); // hi
    asm.cmp_rr(Reg::Eax, Reg::Edx);
    asm.jcc_label(Cond::LessEq, skip_hi);
    asm.mov_rr(Reg::Eax, Reg::Edx);
    asm.bind(skip_hi);
}

fn emit_numargs(asm: &mut Assembler) {
    // AMX calling convention: argument count (in bytes) sits at
    // frm+8, two cells above the saved frame pointer.
    asm.mov_rm(Reg::Eax, Reg::Ebp, 8);
    asm.sar_i(Reg::Eax, 2);
}

fn emit_min(asm: &mut Assembler) {
    let done = asm.new_label();
    asm.mov_rm(Reg::Eax, Reg::Esp, ARG0);
    asm.mov_rm(Reg::Edx, Reg::Esp, ARG1);
    asm.cmp_rr(Reg::Eax, Reg::Edx);
    asm.jcc_label(Cond::LessEq, done);
    asm.mov_rr(Reg::Eax, Reg::Edx);
    asm.bind(done);
}

fn emit_max(asm: &mut Assembler) {
    let done = asm.new_label();
    asm.mov_rm(Reg::Eax, Reg::Esp, ARG0);
    asm.mov_rm(Reg::Edx, Reg::Esp, ARG1);
    asm.cmp_rr(Reg::Eax, Reg::Edx);
    asm.jcc_label(Cond::GreaterEq, done);
    asm.mov_rr(Reg::Eax, Reg::Edx);
    asm.bind(done);
}

fn emit_swapchars(asm: &mut Assembler) {
    asm.mov_rm(Reg::Eax, Reg::Esp, ARG0);
    asm.xchg_ah_al();
    asm.ror_i(Reg::Eax, 16);
    asm.xchg_ah_al();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_every_documented_intrinsic() {
        for name in [
            "float",
            "floatabs",
            "floatadd",
            "floatsub",
            "floatmul",
            "floatdiv",
            "floatsqroot",
            "floatlog",
            "floatcmp",
            "clamp",
            "numargs",
            "min",
            "max",
            "swapchars",
        ] {
            assert!(lookup(name).is_some(), "missing intrinsic {name}");
            assert!(is_intrinsic(name));
        }
        assert!(is_intrinsic("heapspace"));
        assert!(lookup("not_a_native").is_none());
        assert!(!is_intrinsic("not_a_native"));
    }

    #[test]
    fn clamp_emits_without_panicking() {
        let mut asm = Assembler::new();
        emit_clamp(&mut asm);
        assert!(!asm.code().is_empty());
    }
}
