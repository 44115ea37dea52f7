// Dead code elimination.

use jit_core::Ir;

use crate::stats::{PassStats, Stat};

/// Remove instructions whose result is unused and whose op has no side
/// effects. Each block is walked backwards so chains of dead values
/// that only feed each other disappear in one pass.
pub fn dead_code_elimination(ir: &mut Ir, stats: &mut PassStats) {
    for block in ir.blocks().to_vec() {
        let mut cur = ir.last_instr(block);
        while let Some(instr) = cur {
            cur = ir.prev_instr(instr);

            let i = ir.instr(instr);
            if i.op.has_side_effects() {
                continue;
            }
            let Some(result) = i.result else {
                continue;
            };
            if !ir.value(result).uses().is_empty() {
                continue;
            }
            ir.remove_instr(instr);
            stats.inc(Stat::DeadRemoved);
        }
    }
}
