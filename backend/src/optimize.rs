// Constant propagation: fold instructions whose operands are known at
// compile time, using a table of rules keyed by the instruction's
// concrete type signature.

use std::collections::HashMap;

use jit_core::{InstrId, Ir, Opcode, Type, ValueId, FLOAT_TYPES, INT_TYPES};

use crate::stats::{PassStats, Stat};

/// Argument slots a rule requires to be constant.
pub const ARG0: u8 = 1 << 0;
pub const ARG1: u8 = 1 << 1;
pub const ARG2: u8 = 1 << 2;

/// Outcome of a fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folded {
    /// The result is this constant, truncated to the result type.
    Const(u64),
    /// The result is whatever value sits in this argument slot.
    Arg(usize),
}

/// Constant operands of the instruction being folded. Slots that are
/// not constant read as zero.
#[derive(Debug, Clone, Copy)]
pub struct Operands {
    bits: [u64; 3],
    tys: [Option<Type>; 3],
}

impl Operands {
    /// Zero-extended operand.
    pub fn u(&self, n: usize) -> u64 {
        self.bits[n]
    }

    /// Sign-extended operand.
    pub fn s(&self, n: usize) -> i64 {
        let width = self.tys[n].map_or(64, |t| t.size_bits());
        let shift = 64 - width;
        ((self.bits[n] << shift) as i64) >> shift
    }
}

pub type FoldFn = fn(&Operands) -> Folded;

/// Signature a rule is registered under: op, result type, and the
/// types of the first two arguments.
pub type FoldKey = (Opcode, Option<Type>, Option<Type>, Option<Type>);

#[derive(Clone, Copy)]
pub struct FoldRule {
    pub mask: u8,
    pub func: FoldFn,
}

/// Fold rules, built once per JIT instance.
pub struct FoldTable {
    rules: HashMap<FoldKey, FoldRule>,
}

fn types_in(mask: u32) -> impl Iterator<Item = Type> {
    Type::ALL.into_iter().filter(move |t| t.mask() & mask != 0)
}

fn bool_bits(b: bool) -> Folded {
    Folded::Const(b as u64)
}

impl FoldTable {
    pub fn new() -> Self {
        let mut table = Self {
            rules: HashMap::new(),
        };

        // A constant condition picks an arm; the arms may be anything.
        for cond in types_in(INT_TYPES) {
            for ty in types_in(INT_TYPES | FLOAT_TYPES) {
                table.register(
                    (Opcode::Select, Some(ty), Some(cond), Some(ty)),
                    ARG0,
                    |o| Folded::Arg(if o.u(0) != 0 { 1 } else { 2 }),
                );
            }
        }

        let cmps: [(Opcode, FoldFn); 10] = [
            (Opcode::CmpEq, |o| bool_bits(o.u(0) == o.u(1))),
            (Opcode::CmpNe, |o| bool_bits(o.u(0) != o.u(1))),
            (Opcode::CmpSge, |o| bool_bits(o.s(0) >= o.s(1))),
            (Opcode::CmpSgt, |o| bool_bits(o.s(0) > o.s(1))),
            (Opcode::CmpUge, |o| bool_bits(o.u(0) >= o.u(1))),
            (Opcode::CmpUgt, |o| bool_bits(o.u(0) > o.u(1))),
            (Opcode::CmpSle, |o| bool_bits(o.s(0) <= o.s(1))),
            (Opcode::CmpSlt, |o| bool_bits(o.s(0) < o.s(1))),
            (Opcode::CmpUle, |o| bool_bits(o.u(0) <= o.u(1))),
            (Opcode::CmpUlt, |o| bool_bits(o.u(0) < o.u(1))),
        ];
        let binops: [(Opcode, FoldFn); 7] = [
            (Opcode::Add, |o| Folded::Const(o.u(0).wrapping_add(o.u(1)))),
            (Opcode::Sub, |o| Folded::Const(o.u(0).wrapping_sub(o.u(1)))),
            (Opcode::Smul, |o| {
                Folded::Const(o.s(0).wrapping_mul(o.s(1)) as u64)
            }),
            (Opcode::Umul, |o| Folded::Const(o.u(0).wrapping_mul(o.u(1)))),
            (Opcode::And, |o| Folded::Const(o.u(0) & o.u(1))),
            (Opcode::Or, |o| Folded::Const(o.u(0) | o.u(1))),
            (Opcode::Xor, |o| Folded::Const(o.u(0) ^ o.u(1))),
        ];
        // Counts are masked to six bits, matching both backends.
        let shifts: [(Opcode, FoldFn); 3] = [
            (Opcode::Shl, |o| Folded::Const(o.u(0) << (o.u(1) & 63))),
            (Opcode::Lshr, |o| Folded::Const(o.u(0) >> (o.u(1) & 63))),
            (Opcode::Ashr, |o| {
                Folded::Const((o.s(0) >> (o.u(1) & 63)) as u64)
            }),
        ];

        for ty in types_in(INT_TYPES) {
            for (op, func) in cmps {
                table.register(
                    (op, Some(Type::I8), Some(ty), Some(ty)),
                    ARG0 | ARG1,
                    func,
                );
            }
            for (op, func) in binops {
                table.register((op, Some(ty), Some(ty), Some(ty)), ARG0 | ARG1, func);
            }
            for (op, func) in shifts {
                table.register(
                    (op, Some(ty), Some(ty), Some(Type::I32)),
                    ARG0 | ARG1,
                    func,
                );
            }
            table.register((Opcode::Not, Some(ty), Some(ty), None), ARG0, |o| {
                Folded::Const(!o.u(0))
            });
        }
        table
    }

    pub fn register(&mut self, key: FoldKey, mask: u8, func: FoldFn) {
        self.rules.insert(key, FoldRule { mask, func });
    }

    pub fn lookup(&self, key: &FoldKey) -> Option<&FoldRule> {
        self.rules.get(key)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for FoldTable {
    fn default() -> Self {
        Self::new()
    }
}

fn fold_key(ir: &Ir, instr: InstrId) -> FoldKey {
    let i = ir.instr(instr);
    let ty = |v: Option<ValueId>| v.map(|v| ir.ty(v));
    (i.op, ty(i.result), ty(i.arg(0)), ty(i.arg(1)))
}

/// Try to fold one instruction. Returns the replacement for its
/// result when a rule applies.
fn try_fold(ir: &mut Ir, table: &FoldTable, instr: InstrId) -> Option<ValueId> {
    let result = ir.instr(instr).result?;
    let rule = *table.lookup(&fold_key(ir, instr))?;

    let mut ops = Operands {
        bits: [0; 3],
        tys: [None; 3],
    };
    for n in 0..3 {
        let arg = ir.instr(instr).arg(n);
        if let Some(v) = arg {
            ops.tys[n] = Some(ir.ty(v));
        }
        let required = rule.mask & (1 << n) != 0;
        match arg {
            Some(v) if ir.is_constant(v) => {
                let value = ir.value(v);
                if value.ty.is_int() || value.ty.is_float() {
                    ops.bits[n] = value.bits();
                }
            }
            _ if required => return None,
            _ => {}
        }
    }

    match (rule.func)(&ops) {
        Folded::Const(bits) => Some(ir.alloc_int(ir.ty(result), bits)),
        Folded::Arg(n) => ir.instr(instr).arg(n),
    }
}

/// Run constant propagation over every block.
pub fn constant_propagation(
    ir: &mut Ir,
    table: &FoldTable,
    stats: &mut PassStats,
) {
    for block in ir.blocks().to_vec() {
        for instr in ir.block_instrs(block) {
            let Some(replacement) = try_fold(ir, table, instr) else {
                continue;
            };
            let result = ir.result_of(instr);
            if replacement != result {
                ir.replace_uses(result, replacement);
            }
            ir.remove_instr(instr);
            stats.inc(Stat::CpropRemoved);
        }
    }
}
