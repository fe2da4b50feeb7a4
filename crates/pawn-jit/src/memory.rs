//! Executable memory for JIT-compiled code.
//!
//! Generated code is written once into a plain RW buffer, then the
//! buffer is flipped to read+execute and never written to again. There
//! is no facility to go back to RW - a [`ExecutableBuffer`] is write
//! once, run many.

use std::io;

/// A page-aligned block of memory that has been made executable.
///
/// Owns its pages outright: no clone, no copy, `munmap`'d on drop. The
/// only way to get bytes into it is [`CodeBuffer::into_executable`],
/// which consumes the writable buffer that built them up.
pub struct ExecutableBuffer {
    ptr: *mut u8,
    len: usize,
}

// The pages are only ever read or jumped into after construction; no
// interior mutability is exposed, so sharing the pointer across
// threads is sound as long as nothing else holds a mutable alias to
// the same mapping (guaranteed: we own it exclusively).
unsafe impl Send for ExecutableBuffer {}
unsafe impl Sync for ExecutableBuffer {}

impl ExecutableBuffer {
    /// Map `len` bytes of anonymous memory, copy `code` into it, then
    /// drop write permission and grant execute permission.
    pub fn new(code: &[u8]) -> io::Result<Self> {
        let page_size = page_size();
        let len = round_up(code.len().max(1), page_size);

        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }
            let ptr = ptr as *mut u8;
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());

            if libc::mprotect(ptr as *mut libc::c_void, len, libc::PROT_READ | libc::PROT_EXEC) != 0
            {
                let err = io::Error::last_os_error();
                libc::munmap(ptr as *mut libc::c_void, len);
                return Err(err);
            }

            Ok(Self { ptr, len })
        }
    }

    /// Raw pointer to the first byte of the mapping. Callers use this
    /// as the base address against which every label/address-map entry
    /// recorded during assembly is relocated.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Size of the mapping in bytes (page-rounded, not the code length).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Map `len` bytes RW without copying anything in yet. Used when the
    /// code being assembled needs to know its own final address (for
    /// [`crate::rib::Rib::relocate`] and `Assembler::patch_absolute`)
    /// before the bytes that reference it are written.
    pub fn reserve(len: usize) -> io::Result<Self> {
        let page_size = page_size();
        let len = round_up(len.max(1), page_size);
        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }
            Ok(Self {
                ptr: ptr as *mut u8,
                len,
            })
        }
    }

    /// Address of the mapping, for computing relocations before `write`.
    pub fn base_address(&self) -> usize {
        self.ptr as usize
    }

    /// Copy already-relocated code into a [`reserve`](Self::reserve)d
    /// mapping. Panics if `code` doesn't fit.
    pub fn write(&mut self, code: &[u8]) {
        assert!(code.len() <= self.len, "code does not fit reserved pages");
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), self.ptr, code.len());
        }
    }

    /// Drop write permission and grant execute permission. Must be
    /// called exactly once, after the final [`write`](Self::write).
    pub fn make_executable(&mut self) -> io::Result<()> {
        unsafe {
            if libc::mprotect(
                self.ptr as *mut libc::c_void,
                self.len,
                libc::PROT_READ | libc::PROT_EXEC,
            ) != 0
            {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Grant execute permission without dropping write permission.
    ///
    /// A compiled module's RIB carries two fields (`ResetEbp`/`ResetEsp`)
    /// that `call_entry_point` rewrites before every single call, so
    /// that block of the mapping can never go strictly read+execute for
    /// the life of the module. Used only by [`crate::compiler`]; see
    /// `DESIGN.md` for the W^X tradeoff this accepts.
    pub fn make_writable_executable(&mut self) -> io::Result<()> {
        unsafe {
            if libc::mprotect(
                self.ptr as *mut libc::c_void,
                self.len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            ) != 0
            {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Mutable access to the mapping, for patching the RIB's live fields
    /// after [`make_writable_executable`](Self::make_writable_executable).
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }
}

impl Drop for ExecutableBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_and_runs_a_ret_instruction() {
        // `ret` (0xc3) as a 0-argument cdecl function that returns
        // whatever happened to be in eax - here we only check it
        // doesn't fault, since eax is unspecified on entry.
        let buf = ExecutableBuffer::new(&[0xc3]).unwrap();
        assert!(buf.len() >= 1);
        let f: extern "C" fn() -> i32 = unsafe { std::mem::transmute(buf.as_ptr()) };
        f();
    }

    #[test]
    fn runs_generated_increment_function() {
        // mov eax, [esp+4]; inc eax; ret
        let code: &[u8] = &[0x8b, 0x44, 0x24, 0x04, 0x40, 0xc3];
        let buf = ExecutableBuffer::new(code).unwrap();
        let f: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(buf.as_ptr()) };
        assert_eq!(f(41), 42);
    }
}
