//! The host plugin shell: loads a module, resolves its natives,
//! optionally relocates `SYSREQ.C` to `SYSREQ.D`, compiles it, and
//! drives calls into it.
//!
//! Grounded in the reference plugin SDK's `Supports`/`Load`/`Unload`/
//! `AmxLoad`/`AmxUnload` callback shape, which every SA-MP or open.mp
//! style AMX host implements against. `pawn-jit`'s core never sees any
//! of this; it only ever receives an already-loaded [`AmxModule`] and
//! a live [`AmxRegisters`] through
//! `pawn_jit::JitModule::compile`/`pawn_jit::exec`.

use log::{debug, info, warn};

use pawn_amx::instructions::Opcode;
use pawn_amx::{AmxError, AmxFlags, AmxModule, AmxRegisters, Cell};
use pawn_jit::JitModule;

use crate::config::JitConfig;
use crate::natives::{NativeRegistry, ResolvedNatives};

/// The callback shape a guest module's own loader hooks are invoked
/// through (`OnJITCompile`/`OnJITError`). Neither hook is required;
/// a host that doesn't export them runs with the defaults (always
/// compile, log-only on failure).
pub trait HostPlugin {
    /// Called once, before compilation is attempted. Returning `false`
    /// skips the JIT entirely for this module (the host would fall
    /// back to its own interpreter - see [`crate::interp::interpret`]).
    fn on_jit_compile(&mut self, _module: &AmxModule) -> bool {
        true
    }

    /// Called when compilation fails, with one line already logged per
    /// offending instruction by the caller.
    fn on_jit_error(&mut self, _module: &AmxModule, _err: &pawn_jit::JitError) {}

    /// Whether this host supports the guest module's required AMX
    /// version. Mirrors the plugin SDK's `Supports` callback; this
    /// port only ever targets one on-disk format, so it's unconditional.
    fn supports(&self) -> bool {
        true
    }
}

/// The default host: logs hooks, otherwise a no-op.
#[derive(Default)]
pub struct DefaultPlugin;

impl HostPlugin for DefaultPlugin {
    fn on_jit_compile(&mut self, module: &AmxModule) -> bool {
        debug!(
            "OnJITCompile: {} publics, {} natives",
            module.num_publics(),
            module.num_natives()
        );
        true
    }

    fn on_jit_error(&mut self, _module: &AmxModule, err: &pawn_jit::JitError) {
        warn!("OnJITError: {err}");
    }
}

/// A loaded, compiled module bound to its own register file, data
/// section, and native registry - everything one `exec` call needs.
pub struct Host {
    module: AmxModule,
    regs: AmxRegisters,
    data: Vec<u8>,
    registry: NativeRegistry,
    /// The index-keyed table resolved from `registry` against `module`'s
    /// native table. Must outlive every call made against `regs`, since
    /// [`ResolvedNatives::install`] plants a raw pointer to it - kept as
    /// a field rather than a local so it survives past `resolve_natives`.
    resolved: ResolvedNatives,
    jit: Option<JitModule>,
    config: JitConfig,
    /// Set once a compile attempt has failed, so a subsequent `exec`
    /// call for the same module returns `INIT_JIT` again rather than
    /// retrying a compile known to fail.
    init_failed: bool,
}

impl Host {
    /// `AmxLoad`: parse the module, size its data section (the file
    /// image only carries bytes up to `hea`; heap and stack space up
    /// to `stp` is host-allocated and zeroed), and register the
    /// built-in natives every guest expects.
    pub fn load(
        path: impl AsRef<std::path::Path>,
        config: JitConfig,
        mut registry: NativeRegistry,
    ) -> Result<Self, AmxError> {
        let module = AmxModule::from_file(path).map_err(|_| AmxError::Format)?;
        let regs = AmxRegisters::from_module(&module);

        let mut data = vec![0u8; regs.stp as usize];
        data[..module.initial_data().len()].copy_from_slice(module.initial_data());

        // `userdata[1]` carries the data-section base for natives (like
        // `native_print`) that need to dereference a guest string; the
        // resolved table itself lives at `userdata[0]`/`userdata[2]`
        // (see `ResolvedNatives::install`).
        registry.register("print", crate::natives::native_print);
        let resolved = registry.resolve(&module);

        let mut host = Self {
            module,
            regs,
            data,
            registry,
            resolved,
            jit: None,
            config,
            init_failed: false,
        };
        host.resolve_natives();
        Ok(host)
    }

    /// Mark every native the registry can satisfy as resolved, setting
    /// the `NTVREG` flag `pawn_jit::exec`'s precheck requires once all
    /// of them are, and - if `jit_sysreq_d` is enabled - rewriting
    /// `SYSREQ.C index` to `SYSREQ.D addr` in place for natives that
    /// aren't inlined intrinsics (an intrinsic's substitution only
    /// fires from the `SYSREQ.C` lowering path; relocating it away
    /// would silently fall back to the slower callback dispatch).
    fn resolve_natives(&mut self) {
        let all_registered = self.resolved.all_resolved();

        if all_registered {
            let bits = AmxFlags::from_bits(self.module.header().flags)
                .with_ntvreg()
                .to_bits();
            self.module.header_mut().flags = bits;
        }

        if all_registered && self.config.jit_sysreq_d {
            self.relocate_sysreq_d();
        }

        self.resolved.install(&mut self.regs);
        self.regs.userdata[1] = self.data.as_ptr() as usize;
    }

    fn relocate_sysreq_d(&mut self) {
        let Ok(instructions) = self.module.decode_all() else {
            return;
        };
        let registry = &self.registry;
        let module_natives: Vec<Option<(String, usize)>> = (0..self.module.num_natives())
            .map(|i| {
                self.module
                    .native_name(i)
                    .map(|n| (n.to_string(), registry.get(n).map(|f| f as usize).unwrap_or(0)))
            })
            .collect();

        let code = self.module.code_mut();
        let mut rewritten = 0usize;
        for instr in &instructions {
            if instr.opcode != Opcode::SysreqC {
                continue;
            }
            let index = instr.operand(0) as usize;
            let Some(Some((name, addr))) = module_natives.get(index) else {
                continue;
            };
            if *addr == 0 || pawn_jit_is_intrinsic(name) {
                continue;
            }
            code[instr.address..instr.address + 4]
                .copy_from_slice(&(Opcode::SysreqD as i32).to_le_bytes());
            code[instr.address + 4..instr.address + 8].copy_from_slice(&(*addr as i32).to_le_bytes());
            rewritten += 1;
        }
        if rewritten > 0 {
            info!("relocated {rewritten} sysreq.c site(s) to sysreq.d");
        }
    }

    /// Compile the module if it hasn't been already, consulting
    /// `plugin`'s `OnJITCompile`/`OnJITError` hooks around the attempt.
    pub fn ensure_compiled(&mut self, plugin: &mut impl HostPlugin) -> Result<(), AmxError> {
        if self.jit.is_some() {
            return Ok(());
        }
        if self.init_failed {
            return Err(AmxError::InitJit);
        }
        if !plugin.on_jit_compile(&self.module) {
            info!("OnJITCompile declined compilation; host falls back to interpretation");
            return Err(AmxError::InitJit);
        }
        let regs_ptr = &mut self.regs as *mut AmxRegisters;
        match JitModule::compile_with_debug(&self.module, regs_ptr, self.config.jit_debug) {
            Ok(jit) => {
                self.jit = Some(jit);
                Ok(())
            }
            Err(err) => {
                warn!("compile failed: {err}");
                plugin.on_jit_error(&self.module, &err);
                self.init_failed = true;
                Err(AmxError::InitJit)
            }
        }
    }

    /// Call a public function (or [`pawn_amx::AMX_EXEC_MAIN`]) through
    /// the compiled code, matching `pawn_jit::exec`'s ABI.
    pub fn call(&mut self, index: Cell) -> (AmxError, Cell) {
        let Some(jit) = self.jit.as_mut() else {
            return (AmxError::InitJit, 0);
        };
        let mut retval = 0;
        let data_ptr = self.data.as_mut_ptr();
        let status =
            unsafe { pawn_jit::exec(jit, &self.module, &mut self.regs, data_ptr, index, Some(&mut retval)) };
        (status, retval)
    }

    pub fn module(&self) -> &AmxModule {
        &self.module
    }

    pub fn registers_mut(&mut self) -> &mut AmxRegisters {
        &mut self.regs
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Disjoint borrow of the module and a snapshot of the live
    /// registers/data, for a caller (`--compare`) that wants to run a
    /// second engine against the same starting state without the two
    /// engines' side effects aliasing each other.
    pub fn snapshot_for_interp(&self) -> (&AmxModule, AmxRegisters, Vec<u8>) {
        (&self.module, self.regs.clone(), self.data.clone())
    }
}

fn pawn_jit_is_intrinsic(name: &str) -> bool {
    // Mirrors `pawn_jit::intrinsics::is_intrinsic`'s closed set; not
    // exposed from that crate (it's an implementation detail of
    // lowering, not part of the host-facing API), so the membership
    // test is duplicated here at the one other site that needs it.
    matches!(
        name,
        "float"
            | "floatabs"
            | "floatadd"
            | "floatsub"
            | "floatmul"
            | "floatdiv"
            | "floatsqroot"
            | "floatlog"
            | "floatcmp"
            | "clamp"
            | "numargs"
            | "min"
            | "max"
            | "swapchars"
            | "heapspace"
    )
}

trait AmxFlagsExt {
    fn with_ntvreg(self) -> Self;
}

impl AmxFlagsExt for AmxFlags {
    fn with_ntvreg(mut self) -> Self {
        self.ntvreg = true;
        self
    }
}
