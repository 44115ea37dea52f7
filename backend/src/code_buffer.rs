use std::io;
use std::ptr;

/// Default code buffer size: 8 MiB.
pub const DEFAULT_CODE_BUF_SIZE: usize = 8 * 1024 * 1024;

/// Executable memory for generated blocks, backed by an anonymous
/// mapping.
///
/// The buffer is either writable or executable, never both. Writes
/// past the end do not fault: they are dropped and latch the
/// overflow flag, which the assembler checks once a block is done.
pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    offset: usize,
    overflowed: bool,
}

// SAFETY: CodeBuffer owns its mapping exclusively.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    /// Map a buffer of at least `size` bytes, rounded up to whole pages.
    pub fn new(size: usize) -> io::Result<Self> {
        let page = page_size();
        let size = (size.max(1) + page - 1) & !(page - 1);

        // SAFETY: anonymous private mapping, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            offset: 0,
            overflowed: false,
        })
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.offset
    }

    /// Whether any write since the last `rewind` ran past the end.
    #[inline]
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Move the write position back, discarding everything after it.
    pub fn rewind(&mut self, offset: usize) {
        assert!(offset <= self.size);
        self.offset = offset;
        self.overflowed = false;
    }

    /// Pointer at a given offset.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        assert!(offset <= self.size);
        // SAFETY: in bounds of the mapping.
        unsafe { self.ptr.add(offset) as *const u8 }
    }

    // -- Emit methods --

    fn reserve(&mut self, n: usize) -> bool {
        if self.overflowed || self.offset + n > self.size {
            self.overflowed = true;
            return false;
        }
        true
    }

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        self.emit_bytes(&[val]);
    }

    #[inline]
    pub fn emit_u16(&mut self, val: u16) {
        self.emit_bytes(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        self.emit_bytes(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        self.emit_bytes(&val.to_le_bytes());
    }

    pub fn emit_bytes(&mut self, data: &[u8]) {
        if !self.reserve(data.len()) {
            return;
        }
        // SAFETY: reserve checked the range.
        unsafe {
            ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.ptr.add(self.offset),
                data.len(),
            );
        }
        self.offset += data.len();
    }

    /// Patch a u32 written earlier. Ignored for sites dropped by an
    /// overflow.
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        if offset + 4 > self.offset {
            return;
        }
        // SAFETY: the range was written before.
        unsafe { (self.ptr.add(offset) as *mut u32).write_unaligned(val) };
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.offset);
        // SAFETY: the range was written before.
        unsafe { (self.ptr.add(offset) as *const u32).read_unaligned() }
    }

    // -- Permission management --

    fn protect(&self, prot: libc::c_int) -> io::Result<()> {
        // SAFETY: ptr/size describe our own mapping.
        let ret = unsafe {
            libc::mprotect(self.ptr as *mut libc::c_void, self.size, prot)
        };
        if ret != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn set_executable(&self) -> io::Result<()> {
        self.protect(libc::PROT_READ | libc::PROT_EXEC)
    }

    pub fn set_writable(&self) -> io::Result<()> {
        self.protect(libc::PROT_READ | libc::PROT_WRITE)
    }

    /// Bytes `start..end` of the generated code.
    pub fn slice(&self, start: usize, end: usize) -> &[u8] {
        assert!(start <= end && end <= self.offset);
        // SAFETY: everything below offset has been written.
        unsafe { std::slice::from_raw_parts(self.ptr.add(start), end - start) }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.slice(0, self.offset)
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: unmapping our own mapping once.
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
