//! Errors raised while compiling or mapping AMX bytecode.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JitError {
    #[error("AMX error: {0}")]
    Amx(#[from] pawn_amx::AmxRuntimeError),

    #[error("opcode {0:?} is not supported by the translator")]
    UnsupportedOpcode(pawn_amx::Opcode),

    #[error("sysreq operand {0} does not name a known native")]
    UnknownNative(i32),

    #[error("switch at address {0:#x} has no case table")]
    MissingCaseTable(usize),

    #[error("failed to allocate executable memory: {0}")]
    Memory(#[from] std::io::Error),

    #[error("generated code exceeds the reserved buffer ({0} > {1} bytes)")]
    BufferOverflow(usize, usize),
}

pub type JitResult<T> = Result<T, JitError>;

/// A failed compile has only one sensible host-facing outcome: the
/// module never became runnable. Matches `amx_InitJIT`'s contract in
/// the reference loader, which folds every reason JIT setup could
/// fail into a single `AMX_ERR_INIT_JIT`.
impl From<JitError> for pawn_amx::AmxError {
    fn from(_: JitError) -> Self {
        pawn_amx::AmxError::InitJit
    }
}
