use jit_core::{FLOAT_TYPES, INT_TYPES};

use crate::regalloc::Register;

/// x86-64 general-purpose register indices.
///
/// Encoding matches the x86-64 ModR/M and REX register numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Low 3 bits of the register encoding (for ModR/M).
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether this register requires a REX prefix (R8-R15).
    #[inline]
    pub const fn needs_rex(self) -> bool {
        (self as u8) >= 8
    }
}

/// SSE register number, `xmm0`..`xmm15`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Xmm(pub u8);

/// Where an allocator register index lives on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostReg {
    Gpr(Reg),
    Xmm(Xmm),
}

/// Guest context pointer, live for the whole block.
pub const CTX_REG: Reg = Reg::R14;
/// Pointer to the guest handle passed to memory and fallback thunks.
pub const GUEST_REG: Reg = Reg::R15;

/// Scratch registers. Never handed to the allocator; every op loads
/// its operands into these and moves the result out.
pub const TMP0: Reg = Reg::Rax;
pub const TMP1: Reg = Reg::Rcx;
pub const TMP2: Reg = Reg::Rdx;
pub const XTMP0: Xmm = Xmm(0);
pub const XTMP1: Xmm = Xmm(1);

/// Callee-saved registers that the prologue must save/restore.
pub const CALLEE_SAVED: &[Reg] = &[Reg::Rbx, Reg::Rbp, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

/// Function argument registers (System V AMD64 ABI).
pub const CALL_ARG_REGS: &[Reg] = &[Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// Registers exposed to the allocator. The GPRs are callee-saved and
/// survive thunk calls; the XMMs are caller-saved and are spilled to
/// the frame around every call.
pub static X64_REGISTERS: [Register; 12] = [
    Register::new("rbx", INT_TYPES),
    Register::new("rbp", INT_TYPES),
    Register::new("r12", INT_TYPES),
    Register::new("r13", INT_TYPES),
    Register::new("xmm8", FLOAT_TYPES),
    Register::new("xmm9", FLOAT_TYPES),
    Register::new("xmm10", FLOAT_TYPES),
    Register::new("xmm11", FLOAT_TYPES),
    Register::new("xmm12", FLOAT_TYPES),
    Register::new("xmm13", FLOAT_TYPES),
    Register::new("xmm14", FLOAT_TYPES),
    Register::new("xmm15", FLOAT_TYPES),
];

/// Host location of each entry of [`X64_REGISTERS`].
pub const HOST_REGS: [HostReg; 12] = [
    HostReg::Gpr(Reg::Rbx),
    HostReg::Gpr(Reg::Rbp),
    HostReg::Gpr(Reg::R12),
    HostReg::Gpr(Reg::R13),
    HostReg::Xmm(Xmm(8)),
    HostReg::Xmm(Xmm(9)),
    HostReg::Xmm(Xmm(10)),
    HostReg::Xmm(Xmm(11)),
    HostReg::Xmm(Xmm(12)),
    HostReg::Xmm(Xmm(13)),
    HostReg::Xmm(Xmm(14)),
    HostReg::Xmm(Xmm(15)),
];

/// Allocatable XMMs, saved across calls.
pub const SAVED_XMMS: [Xmm; 8] = [
    Xmm(8),
    Xmm(9),
    Xmm(10),
    Xmm(11),
    Xmm(12),
    Xmm(13),
    Xmm(14),
    Xmm(15),
];

/// Stack frame constants.
pub const STACK_ALIGN: usize = 16;

/// Total push size: return address (implicit) + callee-saved pushes.
pub const PUSH_SIZE: usize = (1 + CALLEE_SAVED.len()) * 8;

/// Frame layout below the pushes: spill slots at `rsp + 0`, then the
/// XMM save area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub xmm_save: i32,
    /// Bytes subtracted from rsp after the pushes. Keeps rsp 16-byte
    /// aligned at call sites.
    pub size: i32,
}

impl Frame {
    pub fn new(locals_size: i32) -> Self {
        let align = STACK_ALIGN as i32;
        let xmm_save = (locals_size.max(0) + align - 1) & !(align - 1);
        let raw = xmm_save + SAVED_XMMS.len() as i32 * 8;
        let mut size = (raw + align - 1) & !(align - 1);
        if (PUSH_SIZE as i32 + size) % align != 0 {
            size += 8;
        }
        Self { xmm_save, size }
    }
}
