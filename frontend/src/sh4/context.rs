//! SH4 CPU state and a flat-memory guest built around it.

use std::mem::offset_of;

use jit_core::{FastMem, Guest, GuestOffsets};

use crate::ram::Ram;

// SR bits.
/// Condition / carry bit.
pub const SR_T: u32 = 0x0000_0001;
pub const SR_S: u32 = 0x0000_0002;
/// Interrupt mask level.
pub const SR_IMASK: u32 = 0x0000_00f0;
pub const SR_Q: u32 = 0x0000_0100;
pub const SR_M: u32 = 0x0000_0200;
pub const SR_FD: u32 = 0x0000_8000;
/// Interrupt requests are blocked.
pub const SR_BL: u32 = 0x1000_0000;
/// General register bank select.
pub const SR_RB: u32 = 0x2000_0000;
/// Privileged mode.
pub const SR_MD: u32 = 0x4000_0000;

// FPSCR bits.
pub const FPSCR_RM: u32 = 0x0000_0003;
pub const FPSCR_DN: u32 = 0x0004_0000;
pub const FPSCR_PR: u32 = 0x0008_0000;
pub const FPSCR_SZ: u32 = 0x0010_0000;
/// Floating-point register bank select.
pub const FPSCR_FR: u32 = 0x0020_0000;

// Exception vectors, relative to VBR.
pub const VECTOR_GENERAL: u32 = 0x100;
pub const VECTOR_INTERRUPT: u32 = 0x600;

// Exception event codes.
pub const EXPEVT_ILLEGAL: u32 = 0x180;
pub const EXPEVT_SLOT_ILLEGAL: u32 = 0x1a0;
pub const EXPEVT_TRAPA: u32 = 0x160;
/// INTEVT code of external interrupt line 0; line n adds `n * 0x20`.
pub const INTEVT_BASE: u32 = 0x200;
/// Priority of a line nothing has been configured for. A line is
/// accepted only when its priority is above SR.IMASK.
pub const DEFAULT_INTERRUPT_PRIORITY: u8 = 15;
pub const NUM_INTERRUPT_LINES: usize = 32;

pub const NUM_GPRS: usize = 16;
pub const NUM_FPRS: usize = 16;

/// SH4 architectural state.
///
/// `#[repr(C)]` so generated code can address fields at fixed
/// offsets from the context pointer.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Sh4Context {
    /// Active bank r0-r7 followed by r8-r15.
    pub r: [u32; NUM_GPRS],
    /// Inactive bank r0-r7, swapped in when SR.RB changes.
    pub ralt: [u32; 8],
    pub fr: [u32; NUM_FPRS],
    /// Inactive float bank, swapped in when FPSCR.FR changes.
    pub xf: [u32; NUM_FPRS],
    pub pc: u32,
    pub pr: u32,
    pub sr: u32,
    pub fpscr: u32,
    pub gbr: u32,
    pub vbr: u32,
    pub fpul: u32,
    pub mach: u32,
    pub macl: u32,
    pub sgr: u32,
    pub spc: u32,
    pub ssr: u32,
    pub tra: u32,
    pub expevt: u32,
    pub intevt: u32,
    /// One bit per external interrupt line.
    pub pending_interrupts: u32,
    /// The dispatcher runs blocks until this drops to zero or below.
    pub remaining_cycles: i32,
    pub ran_instrs: i32,
}

/// Byte offset of `r[n]`.
pub const fn gpr_offset(n: usize) -> i32 {
    (offset_of!(Sh4Context, r) + n * 4) as i32
}

pub const PC_OFFSET: i32 = offset_of!(Sh4Context, pc) as i32;
pub const PR_OFFSET: i32 = offset_of!(Sh4Context, pr) as i32;
pub const SR_OFFSET: i32 = offset_of!(Sh4Context, sr) as i32;
pub const FPSCR_OFFSET: i32 = offset_of!(Sh4Context, fpscr) as i32;
pub const GBR_OFFSET: i32 = offset_of!(Sh4Context, gbr) as i32;
pub const PENDING_INTERRUPTS_OFFSET: i32 = offset_of!(Sh4Context, pending_interrupts) as i32;
pub const REMAINING_CYCLES_OFFSET: i32 = offset_of!(Sh4Context, remaining_cycles) as i32;
pub const RAN_INSTRS_OFFSET: i32 = offset_of!(Sh4Context, ran_instrs) as i32;

pub const SH4_OFFSETS: GuestOffsets = GuestOffsets {
    pc: PC_OFFSET,
    cycles: REMAINING_CYCLES_OFFSET,
    instrs: RAN_INSTRS_OFFSET,
    interrupts: PENDING_INTERRUPTS_OFFSET,
};

impl Sh4Context {
    /// Power-on state: privileged, bank 1, interrupts blocked.
    pub fn new() -> Self {
        Self {
            r: [0; NUM_GPRS],
            ralt: [0; 8],
            fr: [0; NUM_FPRS],
            xf: [0; NUM_FPRS],
            pc: 0xa000_0000,
            pr: 0,
            sr: SR_MD | SR_RB | SR_BL | SR_IMASK,
            fpscr: 0x0004_0001,
            gbr: 0,
            vbr: 0,
            fpul: 0,
            mach: 0,
            macl: 0,
            sgr: 0,
            spc: 0,
            ssr: 0,
            tra: 0,
            expevt: 0,
            intevt: 0,
            pending_interrupts: 0,
            remaining_cycles: 0,
            ran_instrs: 0,
        }
    }

    /// Write SR, swapping register banks when RB flips.
    pub fn set_sr(&mut self, value: u32) {
        let old = self.sr;
        self.sr = value;
        self.sr_updated(old);
    }

    /// Reconcile the register banks after SR changed from `old`.
    pub fn sr_updated(&mut self, old: u32) {
        if (self.sr ^ old) & SR_RB != 0 {
            for i in 0..8 {
                std::mem::swap(&mut self.r[i], &mut self.ralt[i]);
            }
        }
    }

    pub fn set_fpscr(&mut self, value: u32) {
        let old = self.fpscr;
        self.fpscr = value;
        self.fpscr_updated(old);
    }

    pub fn fpscr_updated(&mut self, old: u32) {
        if (self.fpscr ^ old) & FPSCR_FR != 0 {
            std::mem::swap(&mut self.fr, &mut self.xf);
        }
    }

    pub fn t(&self) -> bool {
        self.sr & SR_T != 0
    }

    pub fn set_t(&mut self, t: bool) {
        self.sr = (self.sr & !SR_T) | t as u32;
    }

    /// Save state and jump to `vbr + vector` in privileged mode with
    /// interrupts blocked.
    pub fn enter_exception(&mut self, spc: u32, vector: u32) {
        self.spc = spc;
        self.ssr = self.sr;
        self.sgr = self.r[15];
        self.set_sr(self.sr | SR_MD | SR_RB | SR_BL);
        self.pc = self.vbr.wrapping_add(vector);
    }
}

impl Default for Sh4Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Access the SH4 context behind a guest handle.
///
/// Every guest driven through the SH4 frontend exposes an
/// [`Sh4Context`] through `ctx_ptr`.
pub fn sh4_ctx(guest: &mut dyn Guest) -> &mut Sh4Context {
    // SAFETY: see above; the context outlives the borrow of `guest`.
    unsafe { &mut *(guest.ctx_ptr() as *mut Sh4Context) }
}

// ---------------------------------------------------------------
// Flat-memory guest
// ---------------------------------------------------------------

/// An SH4 core attached to a flat RAM.
pub struct Sh4Guest {
    pub ctx: Box<Sh4Context>,
    pub ram: Ram,
    /// Interrupts delivered so far.
    pub interrupts_taken: u32,
    /// Priority level 0-15 of each external line.
    pub priorities: [u8; NUM_INTERRUPT_LINES],
}

impl Sh4Guest {
    pub fn new(ram_size: usize) -> Self {
        Self {
            ctx: Box::new(Sh4Context::new()),
            ram: Ram::new(ram_size),
            interrupts_taken: 0,
            priorities: [DEFAULT_INTERRUPT_PRIORITY; NUM_INTERRUPT_LINES],
        }
    }

    /// Raise external interrupt line `line`.
    pub fn raise_interrupt(&mut self, line: u32) {
        self.ctx.pending_interrupts |= 1 << line;
    }

    pub fn set_interrupt_priority(&mut self, line: u32, priority: u8) {
        self.priorities[line as usize] = priority.min(15);
    }

    /// Highest-priority pending line SR lets through. Equal priorities
    /// go to the lower line.
    fn accepted_line(&self) -> Option<u32> {
        let sr = self.ctx.sr;
        if sr & SR_BL != 0 {
            return None;
        }
        let imask = ((sr & SR_IMASK) >> 4) as u8;
        (0..NUM_INTERRUPT_LINES as u32)
            .filter(|&line| self.ctx.pending_interrupts & (1 << line) != 0)
            .filter(|&line| self.priorities[line as usize] > imask)
            .min_by_key(|&line| (std::cmp::Reverse(self.priorities[line as usize]), line))
    }
}

impl Guest for Sh4Guest {
    fn offsets(&self) -> GuestOffsets {
        SH4_OFFSETS
    }

    fn ctx_ptr(&mut self) -> *mut u8 {
        &mut *self.ctx as *mut Sh4Context as *mut u8
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

    fn fastmem(&mut self) -> Option<FastMem> {
        Some(self.ram.fastmem())
    }

    /// Deliver the most urgent pending line unless SR.BL blocks
    /// everything or SR.IMASK masks it. Masked lines stay pending.
    fn interrupt_check(&mut self) {
        let Some(line) = self.accepted_line() else {
            return;
        };
        let ctx = &mut *self.ctx;
        ctx.pending_interrupts &= !(1 << line);
        ctx.intevt = INTEVT_BASE + line * 0x20;
        let pc = ctx.pc;
        ctx.enter_exception(pc, VECTOR_INTERRUPT);
        self.interrupts_taken += 1;
        log::debug!("sh4 interrupt {line} taken at {pc:#010x}");
    }
}
