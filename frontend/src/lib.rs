//! Guest instruction decoding and IR generation.
//!
//! A [`Frontend`] finds the extent of a guest block, describes each
//! guest instruction through a static [`OpDef`], and lowers the block
//! into IR. Instructions without an IR translator are emitted as a
//! `fallback` op calling their host interpreter routine.

pub mod armv3;
pub mod ram;
pub mod sh4;

use std::io::{self, Write};
use std::ops::BitOr;

use jit_core::{FallbackFn, FastMem, Guest, InsertPoint, Ir, Type, ValueId};

pub use armv3::Armv3Frontend;
pub use ram::Ram;
pub use sh4::Sh4Frontend;

// ---------------------------------------------------------------
// Instruction description
// ---------------------------------------------------------------

/// Per-instruction flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InstrFlags(u32);

impl InstrFlags {
    pub const NONE: InstrFlags = InstrFlags(0);
    /// Undefined encoding.
    pub const INVALID: InstrFlags = InstrFlags(1 << 0);
    /// Reads guest memory.
    pub const LOAD: InstrFlags = InstrFlags(1 << 1);
    /// Writes guest memory.
    pub const STORE: InstrFlags = InstrFlags(1 << 2);
    /// Conditional control transfer.
    pub const COND: InstrFlags = InstrFlags(1 << 3);
    /// Sets a condition flag from a comparison.
    pub const CMP: InstrFlags = InstrFlags(1 << 4);
    pub const BRANCH: InstrFlags = InstrFlags(1 << 5);
    /// Followed by a delay slot instruction.
    pub const DELAYED: InstrFlags = InstrFlags(1 << 6);
    /// Needs the pc synced to the context before it runs.
    pub const LOAD_PC: InstrFlags = InstrFlags(1 << 7);
    /// Writes the pc.
    pub const STORE_PC: InstrFlags = InstrFlags(1 << 8);
    pub const STORE_FPSCR: InstrFlags = InstrFlags(1 << 9);
    pub const STORE_SR: InstrFlags = InstrFlags(1 << 10);

    // ARM instruction classes.
    pub const DATA: InstrFlags = InstrFlags(1 << 16);
    pub const PSR: InstrFlags = InstrFlags(1 << 17);
    pub const XFR: InstrFlags = InstrFlags(1 << 18);
    pub const BLK: InstrFlags = InstrFlags(1 << 19);
    pub const SWI: InstrFlags = InstrFlags(1 << 20);
    pub const MUL: InstrFlags = InstrFlags(1 << 21);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// All bits of `other` are set.
    pub const fn contains(self, other: InstrFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any bit of `other` is set.
    pub const fn intersects(self, other: InstrFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: InstrFlags) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: InstrFlags) -> Self {
        Self(self.0 & other.0)
    }
}

impl BitOr for InstrFlags {
    type Output = InstrFlags;

    fn bitor(self, rhs: InstrFlags) -> InstrFlags {
        self.union(rhs)
    }
}

/// Translation state for one guest instruction.
///
/// Delayed branches record `delay_point` just before the instruction
/// that transfers control; the delay slot's IR is inserted there.
pub struct DisasContext<'a> {
    pub ir: &'a mut Ir,
    /// Guest address of the instruction being translated.
    pub addr: u32,
    pub delay_point: Option<InsertPoint>,
    /// When set, guest memory is accessed through this host mapping
    /// rather than the guest's callbacks.
    pub fastmem: Option<FastMem>,
}

impl<'a> DisasContext<'a> {
    pub fn new(ir: &'a mut Ir, addr: u32, fastmem: Option<FastMem>) -> Self {
        Self {
            ir,
            addr,
            delay_point: None,
            fastmem,
        }
    }

    /// Mark the current insert point as the delay slot position.
    pub fn mark_delay_slot(&mut self) {
        self.delay_point = Some(self.ir.insert_point());
    }

    /// Read `ty` from guest memory at the `i32` address `addr`.
    pub fn load_mem(&mut self, addr: ValueId, ty: Type) -> ValueId {
        match self.fastmem {
            Some(mem) => {
                let host = self.host_addr(mem, addr, ty);
                self.ir.load_host(host, ty)
            }
            None => self.ir.load_guest(addr, ty),
        }
    }

    pub fn store_mem(&mut self, addr: ValueId, v: ValueId) {
        match self.fastmem {
            Some(mem) => {
                let ty = self.ir.ty(v);
                let host = self.host_addr(mem, addr, ty);
                self.ir.store_host(host, v);
            }
            None => self.ir.store_guest(addr, v),
        }
    }

    /// `base + (addr & mask)`, aligned down to the access size so the
    /// access stays inside the mapping.
    fn host_addr(&mut self, mem: FastMem, addr: ValueId, ty: Type) -> ValueId {
        let mask = mem.mask & !(ty.size_bytes() - 1);
        let mask = self.ir.alloc_i32(mask as i32);
        let offset = self.ir.and(addr, mask);
        let offset = self.ir.zext(offset, Type::I64);
        let base = self.ir.alloc_i64(mem.base as i64);
        self.ir.add(base, offset)
    }
}

/// Emits IR for one decoded guest instruction.
pub type TranslateFn = fn(ctx: &mut DisasContext<'_>, raw: u32);

/// Static description of one guest instruction.
#[derive(Clone, Copy)]
pub struct OpDef {
    pub name: &'static str,
    /// Disassembly template; operand fields are substituted by the
    /// frontend's formatter.
    pub desc: &'static str,
    pub flags: InstrFlags,
    pub cycles: i32,
    pub translate: Option<TranslateFn>,
    pub fallback: FallbackFn,
}

impl std::fmt::Debug for OpDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpDef")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("cycles", &self.cycles)
            .field("translated", &self.translate.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------
// Frontend interface
// ---------------------------------------------------------------

/// Straight-line code is split into blocks of at most this many
/// instructions.
pub const MAX_BLOCK_INSTRS: u32 = 1024;

/// Per-ISA block decoder and IR generator.
pub trait Frontend {
    fn name(&self) -> &'static str;

    /// Definition for a raw instruction word. Unknown encodings map to
    /// an INVALID definition.
    fn lookup_op(&self, raw: u32) -> &'static OpDef;

    /// Size in bytes of the guest block starting at `addr`. Never zero.
    fn analyze_code(&self, guest: &mut dyn Guest, addr: u32) -> u32;

    /// Lower `size` bytes of guest code at `addr` into `ir`. The unit
    /// always ends in a branch. With `fastmem` set, guest memory the
    /// guest maps through [`Guest::fastmem`] is accessed directly.
    fn translate_code(
        &self,
        guest: &mut dyn Guest,
        addr: u32,
        size: u32,
        fastmem: bool,
        ir: &mut Ir,
    );

    /// Disassemble a block, one `# `-prefixed line per instruction.
    fn dump_code(
        &self,
        guest: &mut dyn Guest,
        addr: u32,
        size: u32,
        out: &mut dyn Write,
    ) -> io::Result<()>;
}
