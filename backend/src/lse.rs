// Load-store elimination over guest context accesses.
//
// Availability is tracked per context byte. Every byte covered by an
// available value points back at the value and the offset it starts
// at, so partially overlapping accesses invalidate whole entries.

use jit_core::{InstrId, Ir, Opcode, ValueId};

use crate::stats::{PassStats, Stat};

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    offset: i32,
    value: Option<ValueId>,
}

#[derive(Default)]
struct Available {
    entries: Vec<Entry>,
}

impl Available {
    fn clear(&mut self) {
        self.entries.clear();
    }

    fn entry(&self, offset: i32) -> Entry {
        self.entries
            .get(offset as usize)
            .copied()
            .unwrap_or_default()
    }

    fn get(&self, offset: i32) -> Option<ValueId> {
        let e = self.entry(offset);
        // Bytes past the start of a value are only there for
        // invalidation.
        if e.offset != offset {
            return None;
        }
        e.value
    }

    fn erase(&mut self, ir: &Ir, offset: i32, size: i32) {
        let mut begin = offset;
        let mut end = offset + size - 1;

        let first = self.entry(begin);
        if first.value.is_some() {
            begin = first.offset;
        }
        let last = self.entry(end);
        if let Some(v) = last.value {
            end = last.offset + ir.ty(v).size_bytes() as i32 - 1;
        }

        for b in begin..=end {
            if let Some(e) = self.entries.get_mut(b as usize) {
                *e = Entry::default();
            }
        }
    }

    fn set(&mut self, ir: &Ir, offset: i32, v: ValueId) {
        let size = ir.ty(v).size_bytes() as i32;
        self.erase(ir, offset, size);

        let end = (offset + size) as usize;
        if self.entries.len() < end {
            self.entries.resize(end, Entry::default());
        }
        for e in &mut self.entries[offset as usize..end] {
            *e = Entry {
                offset,
                value: Some(v),
            };
        }
    }
}

/// Constant non-negative context offset of a context access.
fn context_offset(ir: &Ir, instr: InstrId) -> Option<i32> {
    let arg = ir.instr(instr).arg(0)?;
    if !ir.is_constant(arg) {
        return None;
    }
    let offset = ir.value(arg).i32();
    (offset >= 0).then_some(offset)
}

/// Host calls may read or write any part of the context.
fn clobbers_context(op: Opcode) -> bool {
    op.is_call()
}

fn eliminate_loads(ir: &mut Ir, stats: &mut PassStats) {
    let mut avail = Available::default();
    for block in ir.blocks().to_vec() {
        avail.clear();
        for instr in ir.block_instrs(block) {
            let op = ir.instr(instr).op;
            match op {
                Opcode::LoadContext => {
                    let result = ir.result_of(instr);
                    let Some(offset) = context_offset(ir, instr) else {
                        avail.clear();
                        continue;
                    };
                    if let Some(v) = avail.get(offset) {
                        if ir.ty(v) == ir.ty(result) {
                            ir.replace_uses(result, v);
                            ir.remove_instr(instr);
                            stats.inc(Stat::LoadsRemoved);
                            continue;
                        }
                    }
                    avail.set(ir, offset, result);
                }
                Opcode::StoreContext => {
                    let Some(offset) = context_offset(ir, instr) else {
                        avail.clear();
                        continue;
                    };
                    if let Some(v) = ir.instr(instr).arg(1) {
                        avail.set(ir, offset, v);
                    }
                }
                op if clobbers_context(op) => avail.clear(),
                _ => {}
            }
        }
    }
}

fn eliminate_stores(ir: &mut Ir, stats: &mut PassStats) {
    let mut avail = Available::default();
    for block in ir.blocks().to_vec() {
        avail.clear();
        let mut cur = ir.last_instr(block);
        while let Some(instr) = cur {
            cur = ir.prev_instr(instr);

            let op = ir.instr(instr).op;
            match op {
                Opcode::LoadContext => {
                    let size = ir.ty(ir.result_of(instr)).size_bytes() as i32;
                    match context_offset(ir, instr) {
                        Some(offset) => avail.erase(ir, offset, size),
                        None => avail.clear(),
                    }
                }
                Opcode::StoreContext => {
                    let Some(offset) = context_offset(ir, instr) else {
                        avail.clear();
                        continue;
                    };
                    let Some(v) = ir.instr(instr).arg(1) else {
                        continue;
                    };
                    let store_size = ir.ty(v).size_bytes();
                    let later_size =
                        avail.get(offset).map_or(0, |a| ir.ty(a).size_bytes());
                    if later_size >= store_size {
                        ir.remove_instr(instr);
                        stats.inc(Stat::StoresRemoved);
                        continue;
                    }
                    avail.set(ir, offset, v);
                }
                // Stores before an exit or a host call are observable.
                op if clobbers_context(op) || op.is_branch() => avail.clear(),
                _ => {}
            }
        }
    }
}

/// Reuse context loads and drop stores that are fully overwritten
/// later in the same block.
pub fn load_store_elimination(ir: &mut Ir, stats: &mut PassStats) {
    eliminate_loads(ir, stats);
    eliminate_stores(ir, stats);
}
