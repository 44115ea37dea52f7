mod code_buffer;
mod passes;
#[cfg(target_arch = "x86_64")]
mod x86_64;

use std::mem::offset_of;

use jit_core::{Guest, GuestOffsets};

/// Minimal guest: sixteen 32-bit registers and a small flat memory.
#[repr(C)]
#[derive(Debug, Default)]
pub struct TestCtx {
    pub r: [u32; 16],
    pub pc: u32,
    pub cycles: i32,
    pub instrs: i32,
    pub interrupts: u32,
}

pub const MEM_SIZE: usize = 0x1000;

pub struct TestGuest {
    pub ctx: Box<TestCtx>,
    pub mem: Vec<u8>,
}

pub const fn reg_offset(n: usize) -> i32 {
    (offset_of!(TestCtx, r) + n * 4) as i32
}

pub const TEST_OFFSETS: GuestOffsets = GuestOffsets {
    pc: offset_of!(TestCtx, pc) as i32,
    cycles: offset_of!(TestCtx, cycles) as i32,
    instrs: offset_of!(TestCtx, instrs) as i32,
    interrupts: offset_of!(TestCtx, interrupts) as i32,
};

impl TestGuest {
    pub fn new() -> Self {
        Self {
            ctx: Box::default(),
            mem: vec![0; MEM_SIZE],
        }
    }

    fn read(&self, addr: u32, size: usize) -> u64 {
        let base = addr as usize % MEM_SIZE;
        (0..size).fold(0, |acc, i| {
            acc | (self.mem[(base + i) % MEM_SIZE] as u64) << (i * 8)
        })
    }

    fn write(&mut self, addr: u32, size: usize, value: u64) {
        let base = addr as usize % MEM_SIZE;
        for i in 0..size {
            self.mem[(base + i) % MEM_SIZE] = (value >> (i * 8)) as u8;
        }
    }
}

impl Guest for TestGuest {
    fn offsets(&self) -> GuestOffsets {
        TEST_OFFSETS
    }

    fn ctx_ptr(&mut self) -> *mut u8 {
        &mut *self.ctx as *mut TestCtx as *mut u8
    }

    fn r8(&mut self, addr: u32) -> u8 {
        self.read(addr, 1) as u8
    }

    fn r16(&mut self, addr: u32) -> u16 {
        self.read(addr, 2) as u16
    }

    fn r32(&mut self, addr: u32) -> u32 {
        self.read(addr, 4) as u32
    }

    fn r64(&mut self, addr: u32) -> u64 {
        self.read(addr, 8)
    }

    fn w8(&mut self, addr: u32, value: u8) {
        self.write(addr, 1, value as u64)
    }

    fn w16(&mut self, addr: u32, value: u16) {
        self.write(addr, 2, value as u64)
    }

    fn w32(&mut self, addr: u32, value: u32) {
        self.write(addr, 4, value as u64)
    }

    fn w64(&mut self, addr: u32, value: u64) {
        self.write(addr, 8, value)
    }

    fn interrupt_check(&mut self) {
        self.ctx.interrupts = 0;
    }
}

/// Host routine for `call` tests: `r15 = arg0 + arg1`.
pub fn record_call(guest: &mut dyn Guest, arg0: u64, arg1: u64) {
    // SAFETY: only installed in units run against a TestGuest.
    let ctx = unsafe { &mut *(guest.ctx_ptr() as *mut TestCtx) };
    ctx.r[15] = (arg0 + arg1) as u32;
}

/// Fallback for tests: `r[raw] = addr`.
pub fn store_addr_fallback(guest: &mut dyn Guest, addr: u32, raw: u32) {
    // SAFETY: as for record_call.
    let ctx = unsafe { &mut *(guest.ctx_ptr() as *mut TestCtx) };
    ctx.r[raw as usize] = addr;
}
