// Expression simplification: algebraic identities with a constant
// right-hand side. Instructions are only rewired here; the dead
// originals are left for dead code elimination.

use jit_core::{InstrId, Ir, Opcode, ValueId};

use crate::stats::{PassStats, Stat};

fn simplify(ir: &mut Ir, instr: InstrId) -> Option<ValueId> {
    let i = ir.instr(instr);
    let result = i.result?;
    let (lhs, rhs) = (i.arg(0)?, i.arg(1)?);
    let op = i.op;

    let r = ir.value(rhs);
    if !r.is_constant() || !r.ty.is_int() {
        return None;
    }
    if r.zext() != 0 {
        return None;
    }

    match op {
        // x op 0 == 0
        Opcode::And | Opcode::Smul | Opcode::Umul => {
            let ty = ir.ty(result);
            Some(ir.alloc_int(ty, 0))
        }
        // x op 0 == x
        Opcode::Add
        | Opcode::Sub
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Shl
        | Opcode::Ashr
        | Opcode::Lshr
            if ir.ty(lhs) == ir.ty(result) =>
        {
            Some(lhs)
        }
        _ => None,
    }
}

pub fn expression_simplification(ir: &mut Ir, stats: &mut PassStats) {
    for instr in ir.all_instrs() {
        let Some(replacement) = simplify(ir, instr) else {
            continue;
        };
        let result = ir.result_of(instr);
        if ir.value(result).uses().is_empty() {
            continue;
        }
        ir.replace_uses(result, replacement);
        stats.inc(Stat::ExpressionsSimplified);
    }
}
