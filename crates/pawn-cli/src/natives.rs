//! Host-side native function registry and the `callback` trampoline
//! generated code dispatches through.
//!
//! The register-convention the translator compiles `SYSREQ.*` against
//! (`sysreq_c_helper`/`sysreq_d_helper` in `pawn-jit::compiler`) calls
//! `amx.callback(amx, index, result, params)` with a bare function
//! pointer - it cannot carry Rust closure state. A resolved table
//! lives instead behind `amx.userdata[0]`/`userdata[2]` (pointer and
//! length), planted by [`ResolvedNatives::install`], which the one
//! `callback` fn below recovers on every dispatch. This mirrors how
//! SA-MP-style AMX hosts use the reference struct's `userdata[]` slots
//! to stash a plugin's own state without widening the ABI.

use std::collections::HashMap;

use pawn_amx::{AmxError, AmxModule, AmxRegisters, Cell, NativeFunction};

/// Maps a native's name to the host function that implements it.
/// `index` is meaningless here - the module's native *table* assigns
/// the index, and two different modules can order the same names
/// differently - so lookups during registration go by name; see
/// [`NativeRegistry::resolve`] for the index-keyed table `SYSREQ.C`
/// dispatch actually needs.
#[derive(Default)]
pub struct NativeRegistry {
    by_name: HashMap<String, NativeFunction>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, func: NativeFunction) {
        self.by_name.insert(name.to_string(), func);
    }

    pub fn get(&self, name: &str) -> Option<NativeFunction> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Build the index-keyed table `SYSREQ.C idx` actually dispatches
    /// through: one slot per entry in `module`'s native table, in that
    /// table's order, `None` where no host function answers the name.
    pub fn resolve(&self, module: &AmxModule) -> ResolvedNatives {
        let slots = (0..module.num_natives())
            .map(|i| module.native_name(i).and_then(|name| self.get(name)))
            .collect();
        ResolvedNatives { slots }
    }
}

/// An index -> [`NativeFunction`] table resolved against one specific
/// module's native table, planted into that module's `AmxRegisters`
/// for the lifetime of every `exec`/interpret call made against it.
pub struct ResolvedNatives {
    slots: Vec<Option<NativeFunction>>,
}

impl ResolvedNatives {
    /// True if every slot resolved - the precondition `pawn_jit::exec`
    /// checks via the AMX header's `NTVREG` flag.
    pub fn all_resolved(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Stash `self`'s table (pointer + length) in `amx.userdata[0..2]`
    /// and install [`dispatch`] as the callback generated code invokes.
    /// `self` must outlive every call made against `amx`.
    pub fn install(&self, amx: &mut AmxRegisters) {
        amx.userdata[0] = self.slots.as_ptr() as usize;
        amx.userdata[2] = self.slots.len();
        amx.callback = Some(dispatch);
    }
}

/// The one `AMX_CALLBACK`-shaped function every compiled module's
/// `SYSREQ.C`/`SYSREQ.D`/`SYSREQ.PRI` lowering reaches through
/// `jit_sysreq`. Resolves `index` against the table planted by
/// [`ResolvedNatives::install`] and forwards the call.
///
/// # Safety
/// `amx` must have had [`ResolvedNatives::install`] called on it, and
/// the table it points at must still be alive. `params` must be a
/// valid AMX argument block (byte count cell, then arguments); `result`
/// must be writable.
pub unsafe extern "C" fn dispatch(
    amx: *mut AmxRegisters,
    index: Cell,
    result: *mut Cell,
    params: *const Cell,
) -> i32 {
    let regs = unsafe { &*amx };
    let slots = unsafe {
        std::slice::from_raw_parts(
            regs.userdata[0] as *const Option<NativeFunction>,
            regs.userdata[2],
        )
    };

    let Some(Some(func)) = (index >= 0)
        .then(|| slots.get(index as usize))
        .flatten()
    else {
        return AmxError::NotFound as i32;
    };

    let value = unsafe { func(amx, params) };
    unsafe { *result = value };
    AmxError::None as i32
}

/// `print(const message[])`: write the guest string at `params[1]`
/// (an AMX-relative data offset) to stdout. Grounded in the reference
/// `console` natives every SA-MP-family host registers.
///
/// # Safety
/// `amx` must be live and its `userdata[1]` slot must hold the base
/// pointer of the guest's data section, planted by [`super::host::Host`].
pub unsafe extern "C" fn native_print(amx: *mut AmxRegisters, params: *const Cell) -> Cell {
    let regs = unsafe { &*amx };
    let data_base = regs.userdata[1] as *const u8;
    let addr = unsafe { *params.add(1) };
    let text = unsafe { read_amx_string(data_base, addr) };
    println!("{text}");
    1
}

/// Read a zero-terminated AMX string starting at data-relative `addr`.
unsafe fn read_amx_string(data_base: *const u8, addr: Cell) -> String {
    let mut bytes = Vec::new();
    let mut offset = addr as isize;
    loop {
        let cell = unsafe { (data_base.offset(offset * 4) as *const Cell).read_unaligned() };
        if cell == 0 {
            break;
        }
        bytes.push(cell as u8 as char);
        offset += 1;
    }
    bytes.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pawn_amx::header::{write_header, AmxHeader};

    fn empty_registers() -> AmxRegisters {
        AmxRegisters {
            pri: 0,
            alt: 0,
            frm: 0,
            stk: 0,
            hea: 0,
            hlw: 0,
            stp: 0,
            cip: 0,
            reset_stk: 0,
            reset_hea: 0,
            paramcount: 0,
            error: 0,
            callback: None,
            userdata: [0; pawn_amx::AMX_USERNUM],
        }
    }

    fn module_with_one_native(name: &str) -> AmxModule {
        let header_size = write_header(&AmxHeader::new()).len() as i32;

        // `defsize == size_of::<FuncStubNt>()` (8 bytes: address +
        // nameofs) selects the name-table format: one 8-byte
        // `{address, nameofs}` record, with `nameofs` an absolute
        // offset into the image where the null-terminated name lives.
        let nameofs = header_size as u32 + 8;
        let mut record = Vec::new();
        record.extend_from_slice(&0u32.to_le_bytes()); // address
        record.extend_from_slice(&nameofs.to_le_bytes());
        // Exactly one `defsize`-sized entry between `natives` and
        // `libraries`, regardless of how long `name` is - the name
        // bytes themselves live past `libraries` and are addressed
        // only through `nameofs`, never through table-count math.
        let libraries = header_size + record.len() as i32;

        let mut header = AmxHeader::new();
        header.cod = header_size;
        header.dat = header_size + 4; // cod < dat must hold; no real code needed here
        header.hea = header.dat;
        header.stp = header.dat + 1024;
        header.defsize = 8;
        header.publics = header_size;
        header.natives = header_size;
        header.libraries = libraries;

        let mut image = write_header(&header);
        image.extend_from_slice(&record);
        image.extend_from_slice(name.as_bytes());
        image.push(0);
        AmxModule::load(image).unwrap()
    }

    #[test]
    fn unregistered_native_reports_not_found() {
        let module = module_with_one_native("unbound");
        let registry = NativeRegistry::new();
        let resolved = registry.resolve(&module);
        assert!(!resolved.all_resolved());

        let mut amx = empty_registers();
        resolved.install(&mut amx);
        let mut result: Cell = 0;
        let params = [0i32];
        let status = unsafe {
            dispatch(&mut amx as *mut _, 0, &mut result as *mut _, params.as_ptr())
        };
        assert_eq!(status, AmxError::NotFound as i32);
    }

    #[test]
    fn registered_native_dispatches_by_table_index() {
        let module = module_with_one_native("answer");
        let mut registry = NativeRegistry::new();
        registry.register("answer", answer_42);
        let resolved = registry.resolve(&module);
        assert!(resolved.all_resolved());

        let mut amx = empty_registers();
        resolved.install(&mut amx);
        let mut result: Cell = 0;
        let params = [0i32];
        let status = unsafe {
            dispatch(&mut amx as *mut _, 0, &mut result as *mut _, params.as_ptr())
        };
        assert_eq!(status, AmxError::None as i32);
        assert_eq!(result, 42);
    }

    unsafe extern "C" fn answer_42(_amx: *mut AmxRegisters, _params: *const Cell) -> Cell {
        42
    }
}
