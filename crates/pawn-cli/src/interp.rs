//! A plain bytecode interpreter for AMX modules.
//!
//! `pawn-jit`'s core never falls back to interpretation; that is the
//! host's job, and this is the host's interpreter. Two things in
//! `pawn-cli` need one: the `OnJITCompile`/`OnJITError` guest hooks,
//! which must run *before* a module has any compiled code to jump
//! into, and differential tests that check JIT output against
//! interpreted output for the same module. It is grounded in the same
//! per-opcode AMX semantics `pawn_jit::translator` lowers to x86, just
//! executed directly over a byte buffer instead of emitted as machine
//! code.

use pawn_amx::{AmxError, AmxModule, AmxRegisters, Cell, Opcode};

/// Interpret `module`'s code section against `regs`/`data`, starting
/// at the public or address `index` names (`AMX_EXEC_MAIN` for the
/// entry point), the same convention `pawn_jit::exec` uses.
///
/// `data` must be at least `regs.stp` bytes, data-section-relative
/// addressing (offset 0 is the first byte of `dat`), matching every
/// other address convention in this workspace.
pub fn interpret(
    module: &AmxModule,
    regs: &mut AmxRegisters,
    data: &mut [u8],
    index: Cell,
) -> (AmxError, Cell) {
    let amx_address = if index == pawn_amx::AMX_EXEC_MAIN {
        module.header().cip as u32
    } else {
        match module.public_address(index as usize) {
            Some(addr) if addr != 0 => addr,
            _ => return (AmxError::NotFound, 0),
        }
    };

    regs.mark_reset_point();
    let push_size = regs.paramcount;
    regs.stk -= 4;
    write_cell(data, regs.stk, push_size);
    regs.paramcount = 0;

    // A real `call` would push the native return address here; this
    // interpreter has no native call to fall back into, so it pushes a
    // sentinel value instead and has `ret`/`retn` recognize it as "this
    // was the outermost call" rather than jump to it.
    regs.stk -= 4;
    write_cell(data, regs.stk, TOP_LEVEL_RETURN);

    let mut ip = Interp { module, regs, data };
    match ip.run(amx_address as usize) {
        Ok(()) => (AmxError::None, ip.regs.pri),
        Err(err) => {
            ip.regs.rollback();
            (err, ip.regs.pri)
        }
    }
}

fn read_cell(data: &[u8], addr: Cell) -> Cell {
    let o = addr as usize * 1; // addr is already a byte offset in this interpreter
    Cell::from_le_bytes(data[o..o + 4].try_into().unwrap())
}

fn write_cell(data: &mut [u8], addr: Cell, value: Cell) {
    let o = addr as usize;
    data[o..o + 4].copy_from_slice(&value.to_le_bytes());
}

/// Marks the return address slot pushed for the outermost call this
/// interpreter makes into a module - never a real code address, since
/// decoded instruction addresses are always non-negative.
const TOP_LEVEL_RETURN: Cell = Cell::MIN;

struct Interp<'a> {
    module: &'a AmxModule,
    regs: &'a mut AmxRegisters,
    data: &'a mut [u8],
}

impl<'a> Interp<'a> {
    fn run(&mut self, entry: usize) -> Result<(), AmxError> {
        let mut cip = entry;
        loop {
            let instr = self
                .module
                .decode_at(cip)
                .map_err(|_| AmxError::InvInstr)?
                .ok_or(AmxError::InvInstr)?;
            let next = cip + instr.size();
            let op = |i: usize| instr.operand(i);

            use Opcode::*;
            match instr.opcode {
                LoadPri => self.regs.pri = read_cell(self.data, op(0)),
                LoadAlt => self.regs.alt = read_cell(self.data, op(0)),
                LoadSPri => self.regs.pri = read_cell(self.data, self.regs.frm + op(0)),
                LoadSAlt => self.regs.alt = read_cell(self.data, self.regs.frm + op(0)),
                LrefPri => {
                    let a = read_cell(self.data, op(0));
                    self.regs.pri = read_cell(self.data, a);
                }
                LrefAlt => {
                    let a = read_cell(self.data, op(0));
                    self.regs.alt = read_cell(self.data, a);
                }
                LrefSPri => {
                    let a = read_cell(self.data, self.regs.frm + op(0));
                    self.regs.pri = read_cell(self.data, a);
                }
                LrefSAlt => {
                    let a = read_cell(self.data, self.regs.frm + op(0));
                    self.regs.alt = read_cell(self.data, a);
                }
                LoadI => self.regs.pri = read_cell(self.data, self.regs.pri),
                LodbI => {
                    let a = self.regs.pri as usize;
                    self.regs.pri = match op(0) {
                        1 => self.data[a] as Cell,
                        2 => u16::from_le_bytes(self.data[a..a + 2].try_into().unwrap()) as Cell,
                        4 => read_cell(self.data, self.regs.pri),
                        _ => return Err(AmxError::InvInstr),
                    };
                }
                ConstPri => self.regs.pri = op(0),
                ConstAlt => self.regs.alt = op(0),
                AddrPri => self.regs.pri = self.regs.frm + op(0),
                AddrAlt => self.regs.alt = self.regs.frm + op(0),
                StorPri => write_cell(self.data, op(0), self.regs.pri),
                StorAlt => write_cell(self.data, op(0), self.regs.alt),
                StorSPri => write_cell(self.data, self.regs.frm + op(0), self.regs.pri),
                StorSAlt => write_cell(self.data, self.regs.frm + op(0), self.regs.alt),
                SrefPri => {
                    let a = read_cell(self.data, op(0));
                    write_cell(self.data, a, self.regs.pri);
                }
                SrefAlt => {
                    let a = read_cell(self.data, op(0));
                    write_cell(self.data, a, self.regs.alt);
                }
                SrefSPri => {
                    let a = read_cell(self.data, self.regs.frm + op(0));
                    write_cell(self.data, a, self.regs.pri);
                }
                SrefSAlt => {
                    let a = read_cell(self.data, self.regs.frm + op(0));
                    write_cell(self.data, a, self.regs.alt);
                }
                StorI => write_cell(self.data, self.regs.alt, self.regs.pri),
                StrbI => {
                    let a = self.regs.alt as usize;
                    match op(0) {
                        1 => self.data[a] = self.regs.pri as u8,
                        2 => self.data[a..a + 2]
                            .copy_from_slice(&(self.regs.pri as u16).to_le_bytes()),
                        4 => write_cell(self.data, self.regs.alt, self.regs.pri),
                        _ => return Err(AmxError::InvInstr),
                    }
                }
                Lidx => {
                    let a = self.regs.alt + self.regs.pri * 4;
                    self.regs.pri = read_cell(self.data, a);
                }
                Idxaddr => self.regs.pri = self.regs.alt + self.regs.pri * 4,
                LidxB => {
                    let a = self.regs.alt + (self.regs.pri << op(0));
                    self.regs.pri = read_cell(self.data, a);
                }
                IdxaddrB => self.regs.pri = self.regs.alt + (self.regs.pri << op(0)),
                AlignPri | AlignAlt => {}
                Lctrl => match op(0) {
                    0 => self.regs.pri = self.module.header().cod,
                    1 => self.regs.pri = self.module.header().dat,
                    2 => self.regs.pri = self.regs.hea,
                    3 => self.regs.pri = self.regs.stp,
                    4 => self.regs.pri = self.regs.stk,
                    5 => self.regs.pri = self.regs.frm,
                    6 => self.regs.pri = next as Cell,
                    _ => return Err(AmxError::InvInstr),
                },
                Sctrl => match op(0) {
                    2 => self.regs.hea = self.regs.pri,
                    4 => self.regs.stk = self.regs.pri,
                    5 => self.regs.frm = self.regs.pri,
                    6 => {
                        cip = self.regs.pri as usize;
                        continue;
                    }
                    _ => return Err(AmxError::InvInstr),
                },
                MovePri => self.regs.pri = self.regs.alt,
                MoveAlt => self.regs.alt = self.regs.pri,
                Xchg => std::mem::swap(&mut self.regs.pri, &mut self.regs.alt),
                PushPri => self.push(self.regs.pri),
                PushAlt => self.push(self.regs.alt),
                PushC => self.push(op(0)),
                Push => {
                    let v = read_cell(self.data, op(0));
                    self.push(v);
                }
                PushS => {
                    let v = read_cell(self.data, self.regs.frm + op(0));
                    self.push(v);
                }
                PushAdr => self.push(self.regs.frm + op(0)),
                PopPri => self.regs.pri = self.pop(),
                PopAlt => self.regs.alt = self.pop(),
                Stack => {
                    self.regs.alt = self.regs.stk;
                    self.regs.stk += op(0);
                }
                Heap => {
                    self.regs.alt = self.regs.hea;
                    self.regs.hea += op(0);
                }
                Proc => {
                    self.push(self.regs.frm);
                    self.regs.frm = self.regs.stk;
                }
                Ret => {
                    self.regs.frm = self.pop();
                    let retaddr = self.pop();
                    if retaddr == TOP_LEVEL_RETURN {
                        return Ok(());
                    }
                    cip = retaddr as usize;
                    continue;
                }
                Retn => {
                    self.regs.frm = self.pop();
                    let retaddr = self.pop();
                    let argbytes = read_cell(self.data, self.regs.stk);
                    self.regs.stk += 4 + argbytes;
                    if retaddr == TOP_LEVEL_RETURN {
                        return Ok(());
                    }
                    cip = retaddr as usize;
                    continue;
                }
                Call => {
                    self.push(next as Cell);
                    cip = op(0) as usize;
                    continue;
                }
                CallPri => {
                    self.push(next as Cell);
                    cip = self.regs.pri as usize;
                    continue;
                }
                Jump => {
                    cip = op(0) as usize;
                    continue;
                }
                JumpPri => {
                    cip = self.regs.pri as usize;
                    continue;
                }
                Jzer => {
                    if self.regs.pri == 0 {
                        cip = op(0) as usize;
                        continue;
                    }
                }
                Jnz => {
                    if self.regs.pri != 0 {
                        cip = op(0) as usize;
                        continue;
                    }
                }
                Jeq | Jneq | Jless | Jleq | Jgrtr | Jgeq | Jsless | Jsleq | Jsgrtr | Jsgeq => {
                    let taken = match instr.opcode {
                        Jeq => self.regs.pri == self.regs.alt,
                        Jneq => self.regs.pri != self.regs.alt,
                        Jless => (self.regs.pri as u32) < (self.regs.alt as u32),
                        Jleq => (self.regs.pri as u32) <= (self.regs.alt as u32),
                        Jgrtr => (self.regs.pri as u32) > (self.regs.alt as u32),
                        Jgeq => (self.regs.pri as u32) >= (self.regs.alt as u32),
                        Jsless => self.regs.pri < self.regs.alt,
                        Jsleq => self.regs.pri <= self.regs.alt,
                        Jsgrtr => self.regs.pri > self.regs.alt,
                        Jsgeq => self.regs.pri >= self.regs.alt,
                        _ => unreachable!(),
                    };
                    if taken {
                        cip = op(0) as usize;
                        continue;
                    }
                }
                Shl => self.regs.pri <<= self.regs.alt as u32 & 31,
                Shr => self.regs.pri = ((self.regs.pri as u32) >> (self.regs.alt as u32 & 31)) as Cell,
                Sshr => self.regs.pri >>= self.regs.alt as u32 & 31,
                ShlCPri => self.regs.pri <<= op(0) as u32 & 31,
                ShlCAlt => self.regs.alt <<= op(0) as u32 & 31,
                ShrCPri => self.regs.pri = ((self.regs.pri as u32) >> (op(0) as u32 & 31)) as Cell,
                ShrCAlt => self.regs.alt = ((self.regs.alt as u32) >> (op(0) as u32 & 31)) as Cell,
                Smul => self.regs.pri = self.regs.pri.wrapping_mul(self.regs.alt),
                Sdiv => {
                    if self.regs.alt == 0 {
                        return Err(AmxError::Divide);
                    }
                    let (q, r) = euclid_div(self.regs.pri, self.regs.alt);
                    self.regs.pri = q;
                    self.regs.alt = r;
                }
                SdivAlt => {
                    if self.regs.pri == 0 {
                        return Err(AmxError::Divide);
                    }
                    let (q, r) = euclid_div(self.regs.alt, self.regs.pri);
                    self.regs.pri = q;
                    self.regs.alt = r;
                }
                Umul => {
                    let v = (self.regs.pri as u32 as u64) * (self.regs.alt as u32 as u64);
                    self.regs.pri = v as u32 as Cell;
                    self.regs.alt = (v >> 32) as u32 as Cell;
                }
                Udiv => {
                    if self.regs.alt == 0 {
                        return Err(AmxError::Divide);
                    }
                    let p = self.regs.pri as u32;
                    let a = self.regs.alt as u32;
                    self.regs.pri = (p / a) as Cell;
                    self.regs.alt = (p % a) as Cell;
                }
                UdivAlt => {
                    if self.regs.pri == 0 {
                        return Err(AmxError::Divide);
                    }
                    let p = self.regs.alt as u32;
                    let a = self.regs.pri as u32;
                    self.regs.pri = (p / a) as Cell;
                    self.regs.alt = (p % a) as Cell;
                }
                Add => self.regs.pri = self.regs.pri.wrapping_add(self.regs.alt),
                Sub => self.regs.pri = self.regs.pri.wrapping_sub(self.regs.alt),
                SubAlt => self.regs.pri = self.regs.alt.wrapping_sub(self.regs.pri),
                And => self.regs.pri &= self.regs.alt,
                Or => self.regs.pri |= self.regs.alt,
                Xor => self.regs.pri ^= self.regs.alt,
                Not => self.regs.pri = (self.regs.pri == 0) as Cell,
                Neg => self.regs.pri = self.regs.pri.wrapping_neg(),
                Invert => self.regs.pri = !self.regs.pri,
                AddC => self.regs.pri = self.regs.pri.wrapping_add(op(0)),
                SmulC => self.regs.pri = self.regs.pri.wrapping_mul(op(0)),
                ZeroPri => self.regs.pri = 0,
                ZeroAlt => self.regs.alt = 0,
                Zero => write_cell(self.data, op(0), 0),
                ZeroS => write_cell(self.data, self.regs.frm + op(0), 0),
                SignPri => self.regs.pri = self.regs.pri as i8 as Cell,
                SignAlt => self.regs.alt = self.regs.alt as i8 as Cell,
                Eq => self.regs.pri = (self.regs.pri == self.regs.alt) as Cell,
                Neq => self.regs.pri = (self.regs.pri != self.regs.alt) as Cell,
                Less => self.regs.pri = ((self.regs.pri as u32) < (self.regs.alt as u32)) as Cell,
                Leq => self.regs.pri = ((self.regs.pri as u32) <= (self.regs.alt as u32)) as Cell,
                Grtr => self.regs.pri = ((self.regs.pri as u32) > (self.regs.alt as u32)) as Cell,
                Geq => self.regs.pri = ((self.regs.pri as u32) >= (self.regs.alt as u32)) as Cell,
                Sless => self.regs.pri = (self.regs.pri < self.regs.alt) as Cell,
                Sleq => self.regs.pri = (self.regs.pri <= self.regs.alt) as Cell,
                Sgrtr => self.regs.pri = (self.regs.pri > self.regs.alt) as Cell,
                Sgeq => self.regs.pri = (self.regs.pri >= self.regs.alt) as Cell,
                EqCPri => self.regs.pri = (self.regs.pri == op(0)) as Cell,
                EqCAlt => self.regs.pri = (self.regs.alt == op(0)) as Cell,
                IncPri => self.regs.pri = self.regs.pri.wrapping_add(1),
                IncAlt => self.regs.alt = self.regs.alt.wrapping_add(1),
                Inc => {
                    let v = read_cell(self.data, op(0)).wrapping_add(1);
                    write_cell(self.data, op(0), v);
                }
                IncS => {
                    let a = self.regs.frm + op(0);
                    let v = read_cell(self.data, a).wrapping_add(1);
                    write_cell(self.data, a, v);
                }
                IncI => {
                    let v = read_cell(self.data, self.regs.pri).wrapping_add(1);
                    write_cell(self.data, self.regs.pri, v);
                }
                DecPri => self.regs.pri = self.regs.pri.wrapping_sub(1),
                DecAlt => self.regs.alt = self.regs.alt.wrapping_sub(1),
                Dec => {
                    let v = read_cell(self.data, op(0)).wrapping_sub(1);
                    write_cell(self.data, op(0), v);
                }
                DecS => {
                    let a = self.regs.frm + op(0);
                    let v = read_cell(self.data, a).wrapping_sub(1);
                    write_cell(self.data, a, v);
                }
                DecI => {
                    let v = read_cell(self.data, self.regs.pri).wrapping_sub(1);
                    write_cell(self.data, self.regs.pri, v);
                }
                Movs => {
                    let n = op(0) as usize;
                    let src = self.regs.pri as usize;
                    let dst = self.regs.alt as usize;
                    self.data.copy_within(src..src + n, dst);
                }
                Cmps => {
                    let n = op(0) as usize;
                    let src = self.regs.pri as usize;
                    let dst = self.regs.alt as usize;
                    self.regs.pri = match self.data[src..src + n].cmp(&self.data[dst..dst + n]) {
                        std::cmp::Ordering::Less => -1,
                        std::cmp::Ordering::Equal => 0,
                        std::cmp::Ordering::Greater => 1,
                    };
                }
                Fill => {
                    let n = op(0) as usize;
                    let dst = self.regs.alt as usize;
                    let value = self.regs.pri;
                    for i in (0..n).step_by(4) {
                        write_cell(self.data, dst as Cell + i as Cell, value);
                    }
                }
                Halt => return Err(AmxError::from(op(0))),
                Bounds => {
                    if (self.regs.pri as u32) > (op(0) as u32) {
                        return Err(AmxError::Bounds);
                    }
                }
                SysreqPri => self.sysreq(self.regs.pri)?,
                SysreqC => self.sysreq(op(0))?,
                SysreqD => self.sysreq_resolved(op(0))?,
                Switch => {
                    let table = self
                        .module
                        .case_table_at(op(0) as usize)
                        .map_err(|_| AmxError::InvInstr)?;
                    let mut target = table.default_address();
                    for i in 0..table.num_cases() {
                        if table.value(i) == self.regs.pri {
                            target = table.address(i);
                            break;
                        }
                    }
                    cip = target as usize;
                    continue;
                }
                Casetbl => {}
                SwapPri => {
                    let top = read_cell(self.data, self.regs.stk);
                    write_cell(self.data, self.regs.stk, self.regs.pri);
                    self.regs.pri = top;
                }
                SwapAlt => {
                    let top = read_cell(self.data, self.regs.stk);
                    write_cell(self.data, self.regs.stk, self.regs.alt);
                    self.regs.alt = top;
                }
                Nop | Break => {}
                None | PushR | File | Line | Symbol | Srange | Symtag | Jrel => {
                    return Err(AmxError::InvInstr);
                }
            }
            cip = next;
        }
    }

    fn push(&mut self, value: Cell) {
        self.regs.stk -= 4;
        write_cell(self.data, self.regs.stk, value);
    }

    fn pop(&mut self) -> Cell {
        let v = read_cell(self.data, self.regs.stk);
        self.regs.stk += 4;
        v
    }

    fn sysreq(&mut self, index: Cell) -> Result<(), AmxError> {
        let Some(callback) = self.regs.callback else {
            return Err(AmxError::Callback);
        };
        let params = unsafe { (self.data.as_ptr().add(self.regs.stk as usize)) as *const Cell };
        let mut out: Cell = 0;
        let status = unsafe { callback(self.regs as *mut _, index, &mut out, params) };
        if status != AmxError::None as i32 {
            return Err(AmxError::from(status));
        }
        self.regs.pri = out;
        Ok(())
    }

    /// `SYSREQ.D`'s operand is not a native index: by the time a module
    /// reaches either execution engine, `pawn-cli`'s loader has already
    /// relocated it in place to the resolved native's function pointer
    /// (see `host::Host::load`), matching `pawn-jit`'s `sysreq_d`
    /// trampoline, which calls it directly against the plain
    /// `NativeFunction` ABI with no host-callback indirection.
    fn sysreq_resolved(&mut self, addr: Cell) -> Result<(), AmxError> {
        let params = unsafe { (self.data.as_ptr().add(self.regs.stk as usize)) as *const Cell };
        let func: pawn_amx::NativeFunction = unsafe { std::mem::transmute(addr as usize) };
        let value = unsafe { func(self.regs as *mut _, params) };
        self.regs.pri = value;
        Ok(())
    }
}

/// AMX's `SDIV`: floor toward negative infinity with a non-negative
/// remainder, not truncating C-style division.
fn euclid_div(a: Cell, b: Cell) -> (Cell, Cell) {
    let q = a.div_euclid(b);
    let r = a.rem_euclid(b);
    (q, r)
}
