//! AMX (Abstract Machine eXecutor) bytecode view for Pawn
//!
//! This crate is the read-only Bytecode View and data model over a
//! loaded AMX module: header parsing, the public/native symbol
//! tables, the typed instruction decoder, and the register/runtime
//! state that a caller (an interpreter or a JIT) mutates while the
//! module executes. It owns no execution engine of its own.

pub mod casetable;
pub mod error;
pub mod header;
pub mod instructions;
pub mod module;
pub mod registers;
pub mod types;

pub use casetable::*;
pub use error::*;
pub use header::*;
pub use instructions::*;
pub use module::*;
pub use registers::*;
pub use types::*;
