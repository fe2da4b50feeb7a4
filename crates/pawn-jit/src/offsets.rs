//! Byte offsets of [`pawn_amx::AmxRegisters`] fields, as generated code
//! needs them. Computed with `offset_of!` rather than hand-copied so a
//! field reorder in `pawn-amx` cannot silently desync the trampolines.

use pawn_amx::AmxRegisters;
use std::mem::offset_of;

pub const PRI: i32 = offset_of!(AmxRegisters, pri) as i32;
pub const ALT: i32 = offset_of!(AmxRegisters, alt) as i32;
pub const FRM: i32 = offset_of!(AmxRegisters, frm) as i32;
pub const STK: i32 = offset_of!(AmxRegisters, stk) as i32;
pub const HEA: i32 = offset_of!(AmxRegisters, hea) as i32;
pub const HLW: i32 = offset_of!(AmxRegisters, hlw) as i32;
pub const STP: i32 = offset_of!(AmxRegisters, stp) as i32;
pub const CIP: i32 = offset_of!(AmxRegisters, cip) as i32;
pub const RESET_STK: i32 = offset_of!(AmxRegisters, reset_stk) as i32;
pub const RESET_HEA: i32 = offset_of!(AmxRegisters, reset_hea) as i32;
pub const PARAMCOUNT: i32 = offset_of!(AmxRegisters, paramcount) as i32;
pub const ERROR: i32 = offset_of!(AmxRegisters, error) as i32;
pub const CALLBACK: i32 = offset_of!(AmxRegisters, callback) as i32;
