//! Guest interface consumed by frontends, backends and the dispatcher.
//!
//! A guest CPU owns a flat context structure (registers, flags, and the
//! bookkeeping fields named by [`GuestOffsets`]) that generated code
//! mutates in place, plus a memory space reached through the sized
//! read/write callbacks.

/// Byte offsets of the dispatcher-visible fields of a guest context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestOffsets {
    /// `u32` guest program counter.
    pub pc: i32,
    /// `i32` remaining cycle budget, decremented by executed code.
    pub cycles: i32,
    /// `i32` count of executed guest instructions.
    pub instrs: i32,
    /// `u32` pending-interrupt word; nonzero forces a prompt check.
    pub interrupts: i32,
}

/// Host mapping of a flat guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastMem {
    /// Host address of guest address 0.
    pub base: usize,
    /// Guest addresses are masked with this before indexing `base`.
    pub mask: u32,
}

/// A guest CPU as seen by the JIT.
pub trait Guest {
    fn offsets(&self) -> GuestOffsets;

    /// Raw pointer to the guest context structure.
    ///
    /// The pointer must stay valid, and the structure must not move,
    /// for as long as compiled code for this guest may run.
    fn ctx_ptr(&mut self) -> *mut u8;

    fn r8(&mut self, addr: u32) -> u8;
    fn r16(&mut self, addr: u32) -> u16;
    fn r32(&mut self, addr: u32) -> u32;
    fn r64(&mut self, addr: u32) -> u64;
    fn w8(&mut self, addr: u32, value: u8);
    fn w16(&mut self, addr: u32, value: u16);
    fn w32(&mut self, addr: u32, value: u32);
    fn w64(&mut self, addr: u32, value: u64);

    /// Deliver pending interrupts, possibly redirecting the pc.
    fn interrupt_check(&mut self);

    /// Memory that compiled code may index directly instead of going
    /// through the callbacks. The mapping must stay valid for as long
    /// as code compiled against it may run.
    fn fastmem(&mut self) -> Option<FastMem> {
        None
    }
}

/// Host routine interpreting one guest instruction.
pub type FallbackFn = fn(guest: &mut dyn Guest, addr: u32, raw: u32);

/// Host routine reached through the `call` op.
pub type CallFn = fn(guest: &mut dyn Guest, arg0: u64, arg1: u64);

/// Read a little-endian field of the guest context.
///
/// # Safety
/// `offset..offset + 8` must lie inside the context structure.
pub unsafe fn ctx_read(guest: &mut dyn Guest, offset: i32, size: u32) -> u64 {
    let base = guest.ctx_ptr().offset(offset as isize);
    match size {
        1 => base.read() as u64,
        2 => (base as *const u16).read_unaligned() as u64,
        4 => (base as *const u32).read_unaligned() as u64,
        8 => (base as *const u64).read_unaligned(),
        _ => panic!("unsupported context access size {size}"),
    }
}

/// Write a field of the guest context.
///
/// # Safety
/// `offset..offset + size` must lie inside the context structure.
pub unsafe fn ctx_write(guest: &mut dyn Guest, offset: i32, size: u32, value: u64) {
    let base = guest.ctx_ptr().offset(offset as isize);
    match size {
        1 => base.write(value as u8),
        2 => (base as *mut u16).write_unaligned(value as u16),
        4 => (base as *mut u32).write_unaligned(value as u32),
        8 => (base as *mut u64).write_unaligned(value),
        _ => panic!("unsupported context access size {size}"),
    }
}
