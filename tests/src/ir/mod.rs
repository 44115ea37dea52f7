mod text;

use jit_core::{Ir, Opcode, Type};

#[test]
fn test_type_properties() {
    assert_eq!(Type::I8.size_bytes(), 1);
    assert_eq!(Type::I64.size_bytes(), 8);
    assert_eq!(Type::F32.size_bytes(), 4);
    assert!(Type::I16.is_int());
    assert!(Type::F64.is_float());
    assert!(!Type::Blk.is_int());
    assert_eq!(Type::from_name("f64"), Some(Type::F64));
    assert_eq!(Type::from_name("u32"), None);
    assert_ne!(Type::I32.mask() & jit_core::INT_TYPES, 0);
    assert_eq!(Type::F32.mask() & jit_core::INT_TYPES, 0);
}

#[test]
fn test_opcode_names() {
    for op in Opcode::ALL {
        assert_eq!(Opcode::from_name(op.name()), Some(op));
    }
    assert_eq!(Opcode::CmpSlt.name(), "slt");
    assert!(Opcode::Fallback.is_call());
    assert!(Opcode::Call.is_call());
    assert!(Opcode::BranchTrue.is_branch());
    assert!(!Opcode::Add.is_branch());
}

#[test]
fn test_builder_links_instructions() {
    let mut ir = Ir::new();
    let pc = ir.load_context(0x38, Type::I32);
    let four = ir.alloc_i32(4);
    let next = ir.add(pc, four);
    ir.store_context(0x38, next);

    let block = ir.blocks()[0];
    let instrs = ir.block_instrs(block);
    assert_eq!(instrs.len(), 3);
    assert_eq!(ir.instr(instrs[1]).op, Opcode::Add);
    assert_eq!(ir.first_instr(block), Some(instrs[0]));
    assert_eq!(ir.last_instr(block), Some(instrs[2]));
    assert_eq!(ir.prev_instr(instrs[1]), Some(instrs[0]));

    // Uses are tracked per argument slot.
    assert_eq!(ir.value(pc).uses().len(), 1);
    assert_eq!(ir.value(next).uses()[0].instr, instrs[2]);
    assert_eq!(ir.value(next).uses()[0].arg, 1);
    assert_eq!(ir.value(next).def(), Some(instrs[1]));
}

#[test]
fn test_compare_results_are_i8() {
    let mut ir = Ir::new();
    let a = ir.load_context(0, Type::I32);
    let b = ir.load_context(4, Type::I32);
    let lt = ir.cmp_slt(a, b);
    assert_eq!(ir.ty(lt), Type::I8);

    let x = ir.load_context(8, Type::F64);
    let y = ir.alloc_f64(1.5);
    let ge = ir.fcmp_ge(x, y);
    assert_eq!(ir.ty(ge), Type::I8);
}

#[test]
fn test_insert_point_before() {
    let mut ir = Ir::new();
    let a = ir.load_context(0, Type::I32);
    ir.store_context(4, a);
    let store = ir.last_instr(ir.blocks()[0]).unwrap();

    let saved = ir.insert_point();
    ir.set_insert_point_before(store);
    let one = ir.alloc_i32(1);
    ir.add(a, one);
    ir.set_insert_point(saved);

    let ops: Vec<Opcode> = ir
        .all_instrs()
        .into_iter()
        .map(|i| ir.instr(i).op)
        .collect();
    assert_eq!(ops, [Opcode::LoadContext, Opcode::Add, Opcode::StoreContext]);
}

#[test]
fn test_branch_to_block_records_edge() {
    let mut ir = Ir::new();
    let entry = ir.append_block();
    let exit = ir.append_block();
    ir.set_current_block(entry);
    let cond = ir.load_context(0, Type::I8);
    let target = ir.alloc_blk(exit);
    ir.branch_true(cond, target);
    assert_eq!(ir.block(entry).edges, vec![exit]);
    assert!(ir.block(exit).edges.is_empty());
}

#[test]
fn test_replace_uses_and_remove() {
    let mut ir = Ir::new();
    let a = ir.load_context(0, Type::I32);
    let zero = ir.alloc_i32(0);
    let sum = ir.add(a, zero);
    ir.store_context(4, sum);

    let add = ir.value(sum).def().unwrap();
    ir.replace_uses(sum, a);
    ir.remove_instr(add);

    assert!(ir.instr(add).is_removed());
    assert_eq!(ir.num_instrs(), 2);
    assert_eq!(ir.value(a).uses().len(), 1);
    assert!(ir.value(zero).uses().is_empty());
}

#[test]
#[should_panic(expected = "still used")]
fn test_remove_used_instr_panics() {
    let mut ir = Ir::new();
    let a = ir.load_context(0, Type::I32);
    ir.store_context(4, a);
    let load = ir.value(a).def().unwrap();
    ir.remove_instr(load);
}

#[test]
#[should_panic(expected = "changes type")]
fn test_replace_uses_type_mismatch_panics() {
    let mut ir = Ir::new();
    let a = ir.load_context(0, Type::I32);
    ir.store_context(4, a);
    let b = ir.alloc_i64(0);
    ir.replace_uses(a, b);
}

#[test]
fn test_locals_naturally_aligned() {
    let mut ir = Ir::new();
    let byte = ir.alloc_local(Type::I8);
    let word = ir.alloc_local(Type::I32);
    let quad = ir.alloc_local(Type::I64);
    assert_eq!(ir.local(byte).offset, 0);
    assert_eq!(ir.local(word).offset, 4);
    assert_eq!(ir.local(quad).offset, 8);
    assert_eq!(ir.locals_size(), 16);
}

#[test]
fn test_constant_accessors() {
    let mut ir = Ir::new();
    let neg = ir.alloc_i8(-2);
    assert_eq!(ir.value(neg).zext(), 0xfe);
    assert_eq!(ir.value(neg).sext(), -2);
    let wide = ir.alloc_int(Type::I16, 0x1_2345);
    assert_eq!(ir.value(wide).zext(), 0x2345);
    let f = ir.alloc_f32(1.0);
    assert_eq!(ir.value(f).bits(), 0x3f80_0000);
}
