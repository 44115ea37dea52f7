use jit_backend::interp::INTERP_REGISTERS;
use jit_backend::{Backend, InterpBackend, Pass, PassStats, Pipeline, Stat};
use jit_core::{to_text, Ir, Opcode, Type, ValueId};

use super::{record_call, reg_offset, TestGuest, TEST_OFFSETS};

fn run(ir: &mut Ir, passes: &[Pass]) -> PassStats {
    crate::init_logging();
    let mut pipeline = Pipeline::new();
    for &pass in passes {
        pipeline.run_pass(pass, ir, &[]);
    }
    pipeline.stats
}

fn ops(ir: &Ir) -> Vec<Opcode> {
    ir.all_instrs().into_iter().map(|i| ir.instr(i).op).collect()
}

// -- Constant propagation --

#[test]
fn test_cprop_folds_add() {
    let mut ir = Ir::new();
    let five = ir.alloc_i32(5);
    let three = ir.alloc_i32(3);
    let sum = ir.add(five, three);
    ir.store_context(0, sum);

    let stats = run(&mut ir, &[Pass::Cprop]);
    assert_eq!(stats.get(Stat::CpropRemoved), 1);
    assert_eq!(ops(&ir), [Opcode::StoreContext]);
    assert!(to_text(&mut ir).contains("store_context i32 0x0, i32 0x8"));
}

#[test]
fn test_cprop_signed_compare() {
    let mut ir = Ir::new();
    let m1 = ir.alloc_i32(-1);
    let one = ir.alloc_i32(1);
    let lt = ir.cmp_slt(m1, one);
    let ult = ir.cmp_ult(m1, one);
    ir.store_context(0, lt);
    ir.store_context(1, ult);

    run(&mut ir, &[Pass::Cprop]);
    let text = to_text(&mut ir);
    assert!(text.contains("store_context i32 0x0, i8 0x1"), "{text}");
    assert!(text.contains("store_context i32 0x1, i8 0x0"), "{text}");
}

#[test]
fn test_cprop_wraps_to_result_width() {
    let mut ir = Ir::new();
    let a = ir.alloc_i8(-1);
    let b = ir.alloc_i8(2);
    let sum = ir.add(a, b);
    ir.store_context(0, sum);
    let one = ir.alloc_i32(1);
    let shift = ir.alloc_i32(4);
    let shl = ir.shl(one, shift);
    ir.store_context(4, shl);

    run(&mut ir, &[Pass::Cprop]);
    let text = to_text(&mut ir);
    assert!(text.contains("store_context i32 0x0, i8 0x1"), "{text}");
    assert!(text.contains("store_context i32 0x4, i32 0x10"), "{text}");
}

#[test]
fn test_cprop_needs_constant_operands() {
    let mut ir = Ir::new();
    let x = ir.load_context(0, Type::I32);
    let three = ir.alloc_i32(3);
    let sum = ir.add(x, three);
    ir.store_context(4, sum);

    let stats = run(&mut ir, &[Pass::Cprop]);
    assert_eq!(stats.get(Stat::CpropRemoved), 0);
    assert_eq!(ir.num_instrs(), 3);
}

#[test]
fn test_cprop_select_on_constant_condition() {
    let mut ir = Ir::new();
    let t = ir.load_context(0, Type::I32);
    let f = ir.load_context(4, Type::I32);
    let cond = ir.alloc_i8(1);
    let sel = ir.select(cond, t, f);
    ir.store_context(8, sel);

    let stats = run(&mut ir, &[Pass::Cprop]);
    assert_eq!(stats.get(Stat::CpropRemoved), 1);
    let store = ir.last_instr(ir.blocks()[0]).unwrap();
    assert_eq!(ir.instr(store).arg(1), Some(t));
}

struct FoldCase {
    op: Opcode,
    ty: Type,
    a: u64,
    b: u64,
}

const fn case(op: Opcode, ty: Type, a: u64, b: u64) -> FoldCase {
    FoldCase { op, ty, a, b }
}

fn is_shift(op: Opcode) -> bool {
    matches!(op, Opcode::Shl | Opcode::Lshr | Opcode::Ashr)
}

fn emit_op(ir: &mut Ir, op: Opcode, a: ValueId, b: ValueId) -> ValueId {
    match op {
        Opcode::Shl => ir.shl(a, b),
        Opcode::Lshr => ir.lshr(a, b),
        Opcode::Ashr => ir.ashr(a, b),
        Opcode::And => ir.and(a, b),
        Opcode::Or => ir.or(a, b),
        Opcode::Xor => ir.xor(a, b),
        Opcode::Not => ir.not(a),
        Opcode::Smul => ir.smul(a, b),
        Opcode::Umul => ir.umul(a, b),
        Opcode::CmpUge => ir.cmp_uge(a, b),
        Opcode::CmpUgt => ir.cmp_ugt(a, b),
        Opcode::CmpUle => ir.cmp_ule(a, b),
        Opcode::CmpUlt => ir.cmp_ult(a, b),
        op => panic!("no builder for {}", op.name()),
    }
}

fn folded_result(c: &FoldCase) -> u64 {
    let mut ir = Ir::new();
    let a = ir.alloc_int(c.ty, c.a);
    let b_ty = if is_shift(c.op) { Type::I32 } else { c.ty };
    let b = ir.alloc_int(b_ty, c.b);
    let result = emit_op(&mut ir, c.op, a, b);
    ir.store_context(reg_offset(0), result);

    let stats = run(&mut ir, &[Pass::Cprop]);
    assert_eq!(stats.get(Stat::CpropRemoved), 1, "{} not folded", c.op.name());
    let store = ir.last_instr(ir.blocks()[0]).unwrap();
    let v = ir.instr(store).arg(1).unwrap();
    assert!(ir.is_constant(v));
    ir.value(v).bits() & ir.ty(v).int_mask()
}

fn executed_result(c: &FoldCase) -> u64 {
    let mut ir = Ir::new();
    let a = ir.load_context(reg_offset(2), c.ty);
    let b_ty = if is_shift(c.op) { Type::I32 } else { c.ty };
    let b = ir.load_context(reg_offset(4), b_ty);
    let result = emit_op(&mut ir, c.op, a, b);
    let mask = ir.ty(result).int_mask();
    ir.store_context(reg_offset(0), result);
    let exit = ir.alloc_i32(0);
    ir.branch(exit);

    let mut pipeline = Pipeline::new().with_validation(true);
    pipeline.run_pass(Pass::Ra, &mut ir, &INTERP_REGISTERS);
    let mut backend = InterpBackend::new(TEST_OFFSETS);
    let code = backend.assemble(0, &ir).unwrap();

    let mut guest = TestGuest::new();
    guest.ctx.r[2] = c.a as u32;
    guest.ctx.r[3] = (c.a >> 32) as u32;
    guest.ctx.r[4] = c.b as u32;
    guest.ctx.r[5] = (c.b >> 32) as u32;
    backend.execute(code, &mut guest);
    (guest.ctx.r[0] as u64 | (guest.ctx.r[1] as u64) << 32) & mask
}

#[test]
fn test_cprop_matches_execution() {
    use Opcode::*;
    use Type::*;

    let cases = [
        // Shift counts: zero, width - 1, width, and past the 64-bit width.
        case(Shl, I32, 1, 0),
        case(Shl, I32, 1, 31),
        case(Shl, I32, 1, 32),
        case(Shl, I32, 1, 64),
        case(Shl, I32, 3, 65),
        case(Shl, I8, 0x81, 7),
        case(Shl, I8, 0x81, 8),
        case(Shl, I64, 1, 63),
        case(Shl, I64, 1, 64),
        case(Lshr, I32, 0x8000_0000, 0),
        case(Lshr, I32, 0x8000_0000, 31),
        case(Lshr, I32, 0x8000_0000, 32),
        case(Lshr, I32, 0x8000_0000, 64),
        case(Lshr, I64, 1 << 63, 63),
        case(Lshr, I64, 1 << 63, 64),
        case(Ashr, I32, 0x8000_0000, 0),
        case(Ashr, I32, 0x8000_0000, 31),
        case(Ashr, I32, 0x8000_0000, 32),
        case(Ashr, I32, 0x8000_0000, 64),
        case(Ashr, I8, 0x80, 7),
        case(Ashr, I8, 0x80, 8),
        case(Ashr, I64, 1 << 63, 64),
        // Bitwise.
        case(And, I32, 0xf0f0_1234, 0x0ff0_ffff),
        case(Or, I16, 0x8001, 0x7ffe),
        case(Xor, I64, u64::MAX, 0x1234_5678_9abc_def0),
        case(Not, I8, 0x5a, 0),
        case(Not, I32, 0, 0),
        // Multiplies wrap to the result width.
        case(Smul, I8, (-3i8) as u8 as u64, 100),
        case(Smul, I32, (-7i32) as u32 as u64, 0x4000_0001),
        case(Umul, I32, 0xffff_ffff, 0xffff_ffff),
        case(Umul, I16, 0x1234, 0x10),
        // Unsigned compares see the top bit as magnitude.
        case(CmpUge, I32, 0xffff_ffff, 1),
        case(CmpUgt, I32, 1, 0xffff_ffff),
        case(CmpUle, I8, 0x80, 0x7f),
        case(CmpUlt, I8, 0x7f, 0x80),
        case(CmpUle, I64, 5, 5),
        case(CmpUlt, I64, 5, 5),
    ];

    for c in &cases {
        assert_eq!(
            folded_result(c),
            executed_result(c),
            "{} {} {:#x}, {:#x}",
            c.op.name(),
            c.ty,
            c.a,
            c.b
        );
    }
}

// -- Expression simplification + DCE --

#[test]
fn test_esimp_then_dce() {
    let mut ir = Ir::new();
    let x = ir.load_context(0, Type::I32);
    let zero = ir.alloc_i32(0);
    let same = ir.add(x, zero);
    let none = ir.and(x, zero);
    ir.store_context(4, same);
    ir.store_context(8, none);

    let stats = run(&mut ir, &[Pass::Esimp]);
    assert_eq!(stats.get(Stat::ExpressionsSimplified), 2);
    // The originals stay until dead code elimination.
    assert_eq!(ir.num_instrs(), 5);

    let stats = run(&mut ir, &[Pass::Dce]);
    assert_eq!(stats.get(Stat::DeadRemoved), 2);
    assert_eq!(
        ops(&ir),
        [Opcode::LoadContext, Opcode::StoreContext, Opcode::StoreContext]
    );
    let text = to_text(&mut ir);
    assert!(text.contains("store_context i32 0x4, i32 %1"), "{text}");
    assert!(text.contains("store_context i32 0x8, i32 0x0"), "{text}");
}

#[test]
fn test_esimp_ignores_nonzero() {
    let mut ir = Ir::new();
    let x = ir.load_context(0, Type::I32);
    let one = ir.alloc_i32(1);
    let sum = ir.add(x, one);
    ir.store_context(4, sum);

    let stats = run(&mut ir, &[Pass::Esimp, Pass::Dce]);
    assert_eq!(stats.get(Stat::ExpressionsSimplified), 0);
    assert_eq!(stats.get(Stat::DeadRemoved), 0);
}

#[test]
fn test_dce_removes_dead_chain() {
    let mut ir = Ir::new();
    let x = ir.load_context(0, Type::I32);
    let y = ir.not(x);
    let _z = ir.neg(y);
    let target = ir.alloc_i32(0x100);
    ir.branch(target);

    let stats = run(&mut ir, &[Pass::Dce]);
    assert_eq!(stats.get(Stat::DeadRemoved), 3);
    assert_eq!(ops(&ir), [Opcode::Branch]);
}

#[test]
fn test_dce_keeps_side_effects() {
    let mut ir = Ir::new();
    ir.source_info(0x100, 1);
    let x = ir.load_context(0, Type::I32);
    ir.store_context(4, x);

    let stats = run(&mut ir, &[Pass::Dce]);
    assert_eq!(stats.get(Stat::DeadRemoved), 0);
    assert_eq!(ir.num_instrs(), 3);
}

// -- Load/store elimination --

#[test]
fn test_lse_reuses_load() {
    let mut ir = Ir::new();
    let a = ir.load_context(0x10, Type::I32);
    let b = ir.load_context(0x10, Type::I32);
    let sum = ir.add(a, b);
    ir.store_context(0x20, sum);

    let stats = run(&mut ir, &[Pass::Lse]);
    assert_eq!(stats.get(Stat::LoadsRemoved), 1);
    let add = ir.value(sum).def().unwrap();
    assert_eq!(ir.instr(add).arg(0), Some(a));
    assert_eq!(ir.instr(add).arg(1), Some(a));
}

#[test]
fn test_lse_forwards_store() {
    let mut ir = Ir::new();
    let v = ir.load_context(0, Type::I32);
    ir.store_context(0x10, v);
    let w = ir.load_context(0x10, Type::I32);
    ir.store_context(0x20, w);

    let stats = run(&mut ir, &[Pass::Lse]);
    assert_eq!(stats.get(Stat::LoadsRemoved), 1);
    let store = ir.last_instr(ir.blocks()[0]).unwrap();
    assert_eq!(ir.instr(store).arg(1), Some(v));
}

#[test]
fn test_lse_call_clobbers_context() {
    let mut ir = Ir::new();
    let a = ir.load_context(0x10, Type::I32);
    ir.call(record_call as usize, None, None);
    let b = ir.load_context(0x10, Type::I32);
    let sum = ir.add(a, b);
    ir.store_context(0x20, sum);

    let stats = run(&mut ir, &[Pass::Lse]);
    assert_eq!(stats.get(Stat::LoadsRemoved), 0);
}

#[test]
fn test_lse_partial_overlap_not_reused() {
    let mut ir = Ir::new();
    let wide = ir.load_context(0x10, Type::I32);
    let narrow = ir.load_context(0x10, Type::I8);
    let ext = ir.zext(narrow, Type::I32);
    let sum = ir.add(wide, ext);
    ir.store_context(0x20, sum);

    let stats = run(&mut ir, &[Pass::Lse]);
    assert_eq!(stats.get(Stat::LoadsRemoved), 0);
}

#[test]
fn test_lse_drops_overwritten_store() {
    let mut ir = Ir::new();
    let a = ir.load_context(0, Type::I32);
    let b = ir.load_context(4, Type::I32);
    ir.store_context(0x10, a);
    ir.store_context(0x10, b);
    let target = ir.alloc_i32(0x100);
    ir.branch(target);

    let stats = run(&mut ir, &[Pass::Lse]);
    assert_eq!(stats.get(Stat::StoresRemoved), 1);
    let stores: Vec<_> = ir
        .all_instrs()
        .into_iter()
        .filter(|&i| ir.instr(i).op == Opcode::StoreContext)
        .collect();
    assert_eq!(stores.len(), 1);
    assert_eq!(ir.instr(stores[0]).arg(1), Some(b));
}

#[test]
fn test_lse_keeps_store_read_in_between() {
    let mut ir = Ir::new();
    let a = ir.load_context(0, Type::I32);
    ir.store_context(0x10, a);
    let low = ir.load_context(0x10, Type::I8);
    ir.store_context(0x14, low);
    ir.store_context(0x10, a);

    let stats = run(&mut ir, &[Pass::Lse]);
    assert_eq!(stats.get(Stat::LoadsRemoved), 0);
    assert_eq!(stats.get(Stat::StoresRemoved), 0);
}

#[test]
fn test_lse_call_keeps_earlier_store() {
    let mut ir = Ir::new();
    let a = ir.load_context(0, Type::I32);
    ir.store_context(0x10, a);
    ir.call(record_call as usize, None, None);
    ir.store_context(0x10, a);

    let stats = run(&mut ir, &[Pass::Lse]);
    assert_eq!(stats.get(Stat::StoresRemoved), 0);
}

#[test]
fn test_lse_narrow_store_keeps_wide_one() {
    let mut ir = Ir::new();
    let a = ir.load_context(0, Type::I32);
    let b = ir.load_context(4, Type::I8);
    ir.store_context(0x10, a);
    ir.store_context(0x10, b);

    let stats = run(&mut ir, &[Pass::Lse]);
    assert_eq!(stats.get(Stat::StoresRemoved), 0);
}

// -- Pipeline --

#[test]
fn test_pass_names() {
    for pass in Pass::ALL {
        assert_eq!(Pass::from_name(pass.name()), Some(pass));
    }
    assert_eq!(Pass::from_name("CPROP"), Some(Pass::Cprop));
    assert_eq!(Pass::from_name("gvn"), None);
}

#[test]
fn test_stats_dump() {
    let mut stats = PassStats::new();
    stats.inc(Stat::DeadRemoved);
    stats.add(Stat::DeadRemoved, 2);
    assert_eq!(stats.get(Stat::DeadRemoved), 3);

    let mut out = Vec::new();
    stats.dump(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("===== Pass stats ====="));
    assert!(text
        .lines()
        .any(|l| l.starts_with("dead instructions eliminated") && l.ends_with(" 3")));

    stats.reset();
    assert_eq!(stats.get(Stat::DeadRemoved), 0);
}
