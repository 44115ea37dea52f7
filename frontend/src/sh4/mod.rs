//! SH4 frontend: 16-bit instructions with branch delay slots.

pub mod context;
pub mod fallback;
pub mod opdefs;
mod trans;

use std::io::{self, Write};

use jit_core::{FastMem, Guest, Ir, Type};

use crate::{DisasContext, Frontend, InstrFlags, OpDef, MAX_BLOCK_INSTRS};

pub use context::{Sh4Context, Sh4Guest, SH4_OFFSETS};
pub use fallback::step;
pub use opdefs::{branch_target, format, lookup};

/// Cycle multiplier for blocks recognised as idle loops. An idle loop
/// spins until an interrupt arrives; charging it more cycles lets the
/// dispatcher reach the interrupt check sooner.
pub const IDLE_LOOP_CYCLE_SCALE: i32 = 10;

/// A qualifying idle loop branches back at most this many bytes.
const IDLE_LOOP_MAX_SIZE: u32 = 32;

/// Instructions that end a block: anything writing the pc, and writes
/// to FPSCR or SR, which change the translation state or may unmask
/// interrupts.
fn is_terminator(def: &OpDef) -> bool {
    def.flags
        .intersects(InstrFlags::STORE_PC | InstrFlags::STORE_FPSCR | InstrFlags::STORE_SR)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Sh4Frontend;

impl Sh4Frontend {
    pub fn new() -> Self {
        Self
    }

    /// Whether the block at `begin` only polls memory and loops back
    /// on itself: every instruction loads, compares or branches
    /// conditionally, all three kinds occur, and the closing branch is
    /// a short back edge.
    pub fn is_idle_loop(&self, guest: &mut dyn Guest, begin: u32) -> bool {
        let mask = InstrFlags::LOAD | InstrFlags::COND | InstrFlags::CMP;
        let mut idle = true;
        let mut all = InstrFlags::NONE;
        let mut offset = 0u32;

        loop {
            let addr = begin.wrapping_add(offset);
            let raw = guest.r16(addr) as u32;
            let def = lookup(raw);
            offset += 2;

            idle &= def.flags.intersects(mask);
            all = all | def.flags;

            if def.flags.contains(InstrFlags::DELAYED) {
                let delay = lookup(guest.r16(begin.wrapping_add(offset)) as u32);
                offset += 2;
                idle &= delay.flags.intersects(mask);
                all = all | delay.flags;
            }

            if is_terminator(def) {
                idle &= all.contains(mask);
                if def.flags.contains(InstrFlags::STORE_PC) {
                    idle &= match branch_target(addr, raw) {
                        Some(target) => begin.wrapping_sub(target) <= IDLE_LOOP_MAX_SIZE,
                        None => false,
                    };
                }
                return idle;
            }
            if offset / 2 >= MAX_BLOCK_INSTRS {
                return false;
            }
        }
    }

    /// Emit one instruction at the insert point. Returns the delay slot
    /// position recorded by a translated delayed branch.
    fn translate_instr(
        &self,
        ir: &mut Ir,
        def: &OpDef,
        addr: u32,
        raw: u32,
        cycle_scale: i32,
        fastmem: Option<FastMem>,
    ) -> Option<jit_core::InsertPoint> {
        ir.source_info(addr, def.cycles * cycle_scale);

        // The pc is otherwise only written when the block exits.
        if def.flags.contains(InstrFlags::LOAD_PC) {
            let pc = ir.alloc_i32(addr as i32);
            ir.store_context(context::PC_OFFSET, pc);
        }

        match def.translate {
            Some(translate) => {
                let mut ctx = DisasContext::new(ir, addr, fastmem);
                translate(&mut ctx, raw);
                ctx.delay_point
            }
            None => {
                ir.fallback(def.fallback as usize, addr, raw);
                None
            }
        }
    }
}

impl Frontend for Sh4Frontend {
    fn name(&self) -> &'static str {
        "sh4"
    }

    fn lookup_op(&self, raw: u32) -> &'static OpDef {
        lookup(raw)
    }

    fn analyze_code(&self, guest: &mut dyn Guest, begin: u32) -> u32 {
        let mut size = 0u32;

        loop {
            let def = lookup(guest.r16(begin.wrapping_add(size)) as u32);
            size += 2;

            if def.flags.contains(InstrFlags::DELAYED) {
                let delay_addr = begin.wrapping_add(size);
                let delay = lookup(guest.r16(delay_addr) as u32);
                size += 2;

                assert!(
                    !delay.flags.contains(InstrFlags::DELAYED),
                    "nested delay slot at {delay_addr:#010x}"
                );
            }

            if is_terminator(def) || size / 2 >= MAX_BLOCK_INSTRS {
                return size;
            }
        }
    }

    fn translate_code(
        &self,
        guest: &mut dyn Guest,
        begin: u32,
        size: u32,
        fastmem: bool,
        ir: &mut Ir,
    ) {
        let mem = if fastmem { guest.fastmem() } else { None };
        let cycle_scale = if self.is_idle_loop(guest, begin) {
            IDLE_LOOP_CYCLE_SCALE
        } else {
            1
        };

        let mut offset = 0u32;
        let mut last: Option<&OpDef> = None;

        while offset < size {
            let addr = begin.wrapping_add(offset);
            let raw = guest.r16(addr) as u32;
            let def = lookup(raw);
            let delay_point = self.translate_instr(ir, def, addr, raw, cycle_scale, mem);
            offset += 2;

            if def.flags.contains(InstrFlags::DELAYED) {
                let delay_addr = begin.wrapping_add(offset);
                let delay_raw = guest.r16(delay_addr) as u32;
                let delay_def = lookup(delay_raw);
                assert!(
                    !delay_def.flags.contains(InstrFlags::DELAYED),
                    "nested delay slot at {delay_addr:#010x}"
                );

                if def.translate.is_some() {
                    let Some(point) = delay_point else {
                        panic!("sh4 {} did not mark its delay slot", def.name);
                    };
                    // Emit the slot ahead of the control transfer.
                    let original = ir.insert_point();
                    ir.set_insert_point(point);
                    self.translate_instr(ir, delay_def, delay_addr, delay_raw, cycle_scale, mem);
                    ir.set_insert_point(original);
                } else {
                    // The fallback runs the slot itself.
                    ir.source_info(delay_addr, delay_def.cycles * cycle_scale);
                }
                offset += 2;
            }

            last = Some(def);
        }

        let Some(def) = last else {
            panic!("empty sh4 block at {begin:#010x}");
        };

        // A block ends in one of three ways:
        //  - an unconditional branch, which already exits;
        //  - an instruction that doesn't write the pc, or a conditional
        //    branch falling through: exit to the next address;
        //  - a fallback that wrote the pc: exit to wherever it points.
        let end = def.flags.intersection(InstrFlags::STORE_PC | InstrFlags::COND);
        if end != InstrFlags::STORE_PC {
            if let Some(&tail) = ir.blocks().last() {
                ir.set_current_block(tail);
            }
            let next = ir.alloc_i32(begin.wrapping_add(size) as i32);
            ir.branch(next);
        } else if def.translate.is_none() {
            let pc = ir.load_context(context::PC_OFFSET, Type::I32);
            ir.branch(pc);
        }
    }

    fn dump_code(
        &self,
        guest: &mut dyn Guest,
        begin: u32,
        size: u32,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let mut offset = 0u32;
        while offset < size {
            let addr = begin.wrapping_add(offset);
            let raw = guest.r16(addr) as u32;
            writeln!(out, "# {}", format(addr, raw))?;
            offset += 2;

            if lookup(raw).flags.contains(InstrFlags::DELAYED) {
                let delay_addr = begin.wrapping_add(offset);
                let delay_raw = guest.r16(delay_addr) as u32;
                writeln!(out, "# {}", format(delay_addr, delay_raw))?;
                offset += 2;
            }
        }
        Ok(())
    }
}
