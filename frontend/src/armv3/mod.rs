//! ARMv3 frontend: 32-bit instructions, translated as a sequence of
//! fallbacks.

pub mod context;
pub mod fallback;
pub mod opdefs;

use std::io::{self, Write};

use jit_core::{Guest, Ir, Type};

use crate::{Frontend, OpDef, MAX_BLOCK_INSTRS};

pub use context::{Armv3Context, Armv3Guest, ARMV3_OFFSETS};
pub use fallback::step;
pub use opdefs::{decode, format, lookup, writes_pc, Armv3Op};

#[derive(Debug, Default, Clone, Copy)]
pub struct Armv3Frontend;

impl Armv3Frontend {
    pub fn new() -> Self {
        Self
    }
}

impl Frontend for Armv3Frontend {
    fn name(&self) -> &'static str {
        "armv3"
    }

    fn lookup_op(&self, raw: u32) -> &'static OpDef {
        lookup(raw)
    }

    /// Blocks run up to and including the first instruction that may
    /// write the pc or is undefined.
    fn analyze_code(&self, guest: &mut dyn Guest, begin: u32) -> u32 {
        let mut size = 0u32;
        loop {
            let raw = guest.r32(begin.wrapping_add(size));
            size += 4;
            if writes_pc(raw) || size / 4 >= MAX_BLOCK_INSTRS {
                return size;
            }
        }
    }

    // Memory is only reached through fallbacks, so fastmem has nothing
    // to change.
    fn translate_code(
        &self,
        guest: &mut dyn Guest,
        begin: u32,
        size: u32,
        _fastmem: bool,
        ir: &mut Ir,
    ) {
        let mut offset = 0u32;
        while offset < size {
            let addr = begin.wrapping_add(offset);
            let raw = guest.r32(addr);
            let def = lookup(raw);
            ir.source_info(addr, def.cycles);
            ir.fallback(def.fallback as usize, addr, raw);
            offset += 4;
        }

        // Every fallback leaves r15 at the next pc.
        let pc = ir.load_context(context::PC_OFFSET, Type::I32);
        ir.branch(pc);
    }

    fn dump_code(
        &self,
        guest: &mut dyn Guest,
        begin: u32,
        size: u32,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        for offset in (0..size).step_by(4) {
            let addr = begin.wrapping_add(offset);
            let raw = guest.r32(addr);
            writeln!(out, "# {}", format(addr, raw))?;
        }
        Ok(())
    }
}
