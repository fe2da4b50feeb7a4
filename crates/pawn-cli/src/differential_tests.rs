//! Differential tests: the JIT and the bundled reference interpreter
//! must agree, for identical pre-state, on `amx.error` and the value
//! written to `*retval`.
//!
//! Only meaningful on x86, since `pawn_jit::exec` only runs compiled
//! code on that target.

#![cfg(target_arch = "x86")]

use pawn_amx::header::{write_header, AmxHeader};
use pawn_amx::instructions::Opcode;
use pawn_amx::module::AmxModule;
use pawn_amx::types::{AmxError, Cell, AMX_EXEC_MAIN};
use pawn_amx::AmxRegisters;
use pawn_jit::JitModule;

use crate::natives::NativeRegistry;

enum W {
    Op(Opcode),
    Imm(i32),
    Addr(&'static str),
    Label(&'static str),
}

fn assemble(words: &[W]) -> Vec<u8> {
    let mut addresses = std::collections::HashMap::new();
    let mut addr = 0i32;
    for w in words {
        match w {
            W::Label(name) => {
                addresses.insert(*name, addr);
            }
            W::Op(_) | W::Imm(_) | W::Addr(_) => addr += 4,
        }
    }
    let mut out = Vec::new();
    for w in words {
        match w {
            W::Op(op) => out.extend_from_slice(&(*op as i32).to_le_bytes()),
            W::Imm(v) => out.extend_from_slice(&v.to_le_bytes()),
            W::Addr(name) => {
                let target = *addresses.get(name).expect("undefined label");
                out.extend_from_slice(&target.to_le_bytes());
            }
            W::Label(_) => {}
        }
    }
    out
}

fn build_module(code: Vec<u8>) -> AmxModule {
    let header_size = write_header(&AmxHeader::new()).len() as i32;
    let mut header = AmxHeader::new();
    header.cod = header_size;
    header.dat = header.cod + code.len() as i32;
    header.hea = header.dat + 4;
    header.stp = header.hea + 1024;
    header.cip = 0;
    header.defsize = 8;
    header.publics = header.dat;
    header.natives = header.dat;
    header.libraries = header.dat;
    header.pubvars = header.dat;
    header.tags = header.dat;
    header.nametable = header.dat;
    header.flags = 0x1000; // NTVREG

    let mut image = write_header(&header);
    image.extend_from_slice(&code);
    image.extend_from_slice(&0i32.to_le_bytes());
    AmxModule::load(image).unwrap()
}

/// Run `module` once via the JIT and once via the interpreter, each
/// against its own freshly-initialized register file and data buffer
/// so neither run can see the other's side effects, and return
/// `((jit_error, jit_pri), (interp_error, interp_pri))`.
fn run_both(module: &AmxModule) -> ((AmxError, Cell), (AmxError, Cell)) {
    let mut jit_regs = AmxRegisters::from_module(module);
    let mut jit_data = vec![0u8; jit_regs.stp as usize];
    jit_data[..module.initial_data().len()].copy_from_slice(module.initial_data());
    let registry = NativeRegistry::new();
    let resolved = registry.resolve(module);
    resolved.install(&mut jit_regs);

    let mut jit = JitModule::compile(module, &mut jit_regs as *mut _).unwrap();
    let mut jit_retval = 0;
    let jit_status = unsafe {
        pawn_jit::exec(
            &mut jit,
            module,
            &mut jit_regs,
            jit_data.as_mut_ptr(),
            AMX_EXEC_MAIN,
            Some(&mut jit_retval),
        )
    };

    let mut interp_regs = AmxRegisters::from_module(module);
    let mut interp_data = vec![0u8; interp_regs.stp as usize];
    interp_data[..module.initial_data().len()].copy_from_slice(module.initial_data());
    resolved.install(&mut interp_regs);
    let (interp_status, interp_pri) =
        crate::interp::interpret(module, &mut interp_regs, &mut interp_data, AMX_EXEC_MAIN);

    ((jit_status, jit_regs.pri), (interp_status, interp_pri))
}

#[test]
fn constant_return_matches() {
    let code = assemble(&[
        W::Op(Opcode::Proc),
        W::Op(Opcode::ConstPri),
        W::Imm(42),
        W::Op(Opcode::Retn),
    ]);
    let module = build_module(code);
    let (jit, interp) = run_both(&module);
    assert_eq!(jit, interp);
    assert_eq!(jit.0, AmxError::None);
    assert_eq!(jit.1, 42);
}

#[test]
fn arithmetic_and_branch_matches() {
    // if (7 * 6 == 42) pri = 1; else pri = 0;
    let code = assemble(&[
        W::Op(Opcode::Proc),
        W::Op(Opcode::ConstPri),
        W::Imm(7),
        W::Op(Opcode::ConstAlt),
        W::Imm(6),
        W::Op(Opcode::Smul),
        W::Op(Opcode::EqCPri),
        W::Imm(42),
        W::Op(Opcode::Retn),
    ]);
    let module = build_module(code);
    let (jit, interp) = run_both(&module);
    assert_eq!(jit, interp);
    assert_eq!(jit.1, 1);
}

#[test]
fn function_call_matches() {
    // main: push 5, call double, pop the argument back off (RET - not
    // RETN - leaves that to the caller), retn.
    // double: load.s.pri 8 (the argument, at frm+8 past the saved
    // frame and return address); double it; ret.
    let code = assemble(&[
        W::Label("main"),
        W::Op(Opcode::Proc),
        W::Op(Opcode::PushC),
        W::Imm(5),
        W::Op(Opcode::Call),
        W::Addr("double"),
        W::Op(Opcode::Stack),
        W::Imm(4),
        W::Op(Opcode::Retn),
        W::Label("double"),
        W::Op(Opcode::Proc),
        W::Op(Opcode::LoadSPri),
        W::Imm(8),
        W::Op(Opcode::MoveAlt),
        W::Op(Opcode::Add),
        W::Op(Opcode::Ret),
    ]);
    let module = build_module(code);
    let (jit, interp) = run_both(&module);
    assert_eq!(jit, interp);
    assert_eq!(jit.0, AmxError::None);
    assert_eq!(jit.1, 10);
}

#[test]
fn runtime_fault_matches() {
    let code = assemble(&[
        W::Op(Opcode::Proc),
        W::Op(Opcode::ConstPri),
        W::Imm(16),
        W::Op(Opcode::Bounds),
        W::Imm(15),
        W::Op(Opcode::Retn),
    ]);
    let module = build_module(code);
    let (jit, interp) = run_both(&module);
    assert_eq!(jit.0, AmxError::Bounds);
    assert_eq!(interp.0, AmxError::Bounds);
}
