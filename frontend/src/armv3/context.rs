//! ARMv3 CPU state and a flat-memory guest built around it.

use std::mem::offset_of;

use jit_core::{Guest, GuestOffsets};

use crate::ram::Ram;

// CPSR bits.
pub const CPSR_N: u32 = 1 << 31;
pub const CPSR_Z: u32 = 1 << 30;
pub const CPSR_C: u32 = 1 << 29;
pub const CPSR_V: u32 = 1 << 28;
/// IRQ disable.
pub const CPSR_I: u32 = 1 << 7;
/// FIQ disable.
pub const CPSR_F: u32 = 1 << 6;
pub const CPSR_MODE: u32 = 0x1f;

pub const MODE_USR: u32 = 0x10;
pub const MODE_FIQ: u32 = 0x11;
pub const MODE_IRQ: u32 = 0x12;
pub const MODE_SVC: u32 = 0x13;
pub const MODE_ABT: u32 = 0x17;
pub const MODE_UND: u32 = 0x1b;

// Exception vectors.
pub const VECTOR_UNDEFINED: u32 = 0x04;
pub const VECTOR_SWI: u32 = 0x08;
pub const VECTOR_IRQ: u32 = 0x18;

/// Pending-interrupt bit of the IRQ line.
pub const INTERRUPT_IRQ: u32 = 1 << 0;

/// ARMv3 architectural state. `r[15]` holds the address of the next
/// instruction to execute.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Armv3Context {
    pub r: [u32; 16],
    pub cpsr: u32,
    pub spsr: u32,
    pub pending_interrupts: u32,
    pub remaining_cycles: i32,
    pub ran_instrs: i32,
}

pub const fn reg_offset(n: usize) -> i32 {
    (offset_of!(Armv3Context, r) + n * 4) as i32
}

pub const PC_OFFSET: i32 = reg_offset(15);
pub const CPSR_OFFSET: i32 = offset_of!(Armv3Context, cpsr) as i32;

pub const ARMV3_OFFSETS: GuestOffsets = GuestOffsets {
    pc: PC_OFFSET,
    cycles: offset_of!(Armv3Context, remaining_cycles) as i32,
    instrs: offset_of!(Armv3Context, ran_instrs) as i32,
    interrupts: offset_of!(Armv3Context, pending_interrupts) as i32,
};

impl Armv3Context {
    /// Reset state: supervisor mode with interrupts disabled.
    pub fn new() -> Self {
        Self {
            r: [0; 16],
            cpsr: MODE_SVC | CPSR_I | CPSR_F,
            spsr: 0,
            pending_interrupts: 0,
            remaining_cycles: 0,
            ran_instrs: 0,
        }
    }

    pub fn mode(&self) -> u32 {
        self.cpsr & CPSR_MODE
    }

    pub fn flag(&self, bit: u32) -> bool {
        self.cpsr & bit != 0
    }

    pub fn set_flag(&mut self, bit: u32, on: bool) {
        if on {
            self.cpsr |= bit;
        } else {
            self.cpsr &= !bit;
        }
    }

    pub fn set_nz(&mut self, v: u32) {
        self.set_flag(CPSR_N, v >> 31 != 0);
        self.set_flag(CPSR_Z, v == 0);
    }

    /// Enter `mode` through `vector`; `ret` lands in r14.
    pub fn enter_exception(&mut self, mode: u32, vector: u32, ret: u32) {
        self.spsr = self.cpsr;
        self.cpsr = (self.cpsr & !CPSR_MODE) | mode | CPSR_I;
        self.r[14] = ret;
        self.r[15] = vector;
    }
}

impl Default for Armv3Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Access the ARMv3 context behind a guest handle.
///
/// Every guest driven through the ARMv3 frontend exposes an
/// [`Armv3Context`] through `ctx_ptr`.
pub fn armv3_ctx(guest: &mut dyn Guest) -> &mut Armv3Context {
    // SAFETY: see above; the context outlives the borrow of `guest`.
    unsafe { &mut *(guest.ctx_ptr() as *mut Armv3Context) }
}

/// An ARMv3 core attached to a flat RAM.
pub struct Armv3Guest {
    pub ctx: Box<Armv3Context>,
    pub ram: Ram,
}

impl Armv3Guest {
    pub fn new(ram_size: usize) -> Self {
        Self {
            ctx: Box::new(Armv3Context::new()),
            ram: Ram::new(ram_size),
        }
    }

    pub fn raise_irq(&mut self) {
        self.ctx.pending_interrupts |= INTERRUPT_IRQ;
    }
}

impl Guest for Armv3Guest {
    fn offsets(&self) -> GuestOffsets {
        ARMV3_OFFSETS
    }

    fn ctx_ptr(&mut self) -> *mut u8 {
        &mut *self.ctx as *mut Armv3Context as *mut u8
    }

    fn r8(&mut self, addr: u32) -> u8 {
        self.ram.read(addr, 1) as u8
    }

    fn r16(&mut self, addr: u32) -> u16 {
        self.ram.read(addr, 2) as u16
    }

    fn r32(&mut self, addr: u32) -> u32 {
        self.ram.read(addr, 4) as u32
    }

    fn r64(&mut self, addr: u32) -> u64 {
        self.ram.read(addr, 8)
    }

    fn w8(&mut self, addr: u32, value: u8) {
        self.ram.write(addr, 1, value as u64)
    }

    fn w16(&mut self, addr: u32, value: u16) {
        self.ram.write(addr, 2, value as u64)
    }

    fn w32(&mut self, addr: u32, value: u32) {
        self.ram.write(addr, 4, value as u64)
    }

    fn w64(&mut self, addr: u32, value: u64) {
        self.ram.write(addr, 8, value)
    }

    fn interrupt_check(&mut self) {
        let ctx = &mut *self.ctx;
        if ctx.pending_interrupts & INTERRUPT_IRQ == 0 || ctx.flag(CPSR_I) {
            return;
        }
        ctx.pending_interrupts &= !INTERRUPT_IRQ;
        let ret = ctx.r[15].wrapping_add(4);
        ctx.enter_exception(MODE_IRQ, VECTOR_IRQ, ret);
        log::debug!("armv3 irq taken, return to {ret:#010x}");
    }
}
