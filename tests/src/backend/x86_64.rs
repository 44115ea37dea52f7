use jit_backend::x86_64::X64_REGISTERS;
use jit_backend::{Backend, BackendError, BlockExit, CodeHandle, Pipeline, Stat, X64Backend};
use jit_core::{Ir, Type};

use super::{record_call, reg_offset, store_addr_fallback, TestGuest, TEST_OFFSETS};

fn compile(backend: &mut X64Backend, ir: &mut Ir) -> CodeHandle {
    crate::init_logging();
    let mut pipeline = Pipeline::new().with_validation(true);
    pipeline.optimize(ir, &X64_REGISTERS);
    backend.assemble(0x8c00_0000, ir).unwrap()
}

fn backend() -> X64Backend {
    X64Backend::new(TEST_OFFSETS).unwrap()
}

#[test]
fn test_x64_arithmetic() {
    let mut ir = Ir::new();
    let a = ir.load_context(reg_offset(0), Type::I32);
    let b = ir.load_context(reg_offset(1), Type::I32);
    let sum = ir.add(a, b);
    let diff = ir.sub(a, b);
    let mix = ir.xor(sum, diff);
    let shifted = ir.shli(mix, 4);
    ir.store_context(reg_offset(2), sum);
    ir.store_context(reg_offset(3), diff);
    ir.store_context(reg_offset(4), shifted);
    let lt = ir.cmp_slt(diff, a);
    ir.store_context(reg_offset(5), lt);
    let out = ir.alloc_i32(0x100);
    ir.branch(out);

    let mut jit = backend();
    let code = compile(&mut jit, &mut ir);
    assert!(jit.code_size(code) > 0);

    let mut guest = TestGuest::new();
    guest.ctx.r[0] = 5;
    guest.ctx.r[1] = 7;
    assert_eq!(jit.execute(code, &mut guest), BlockExit::Static(0));
    assert_eq!(guest.ctx.r[2], 12);
    assert_eq!(guest.ctx.r[3], -2i32 as u32);
    assert_eq!(guest.ctx.r[4], (12 ^ (-2i32 as u32)) << 4);
    assert_eq!(guest.ctx.r[5] & 0xff, 1);
    assert_eq!(guest.ctx.pc, 0x100);
}

#[test]
fn test_x64_spills_keep_values() {
    let mut ir = Ir::new();
    let vals: Vec<_> = (0..6)
        .map(|n| ir.load_context(reg_offset(n), Type::I32))
        .collect();
    let mut acc = vals[0];
    for &v in &vals[1..] {
        acc = ir.add(acc, v);
    }
    ir.store_context(reg_offset(6), acc);
    let out = ir.alloc_i32(0x100);
    ir.branch(out);

    let mut pipeline = Pipeline::new().with_validation(true);
    pipeline.optimize(&mut ir, &X64_REGISTERS);
    assert!(pipeline.stats.get(Stat::GprsSpilled) > 0);

    let mut jit = backend();
    let code = jit.assemble(0, &ir).unwrap();
    let mut guest = TestGuest::new();
    for n in 0..6 {
        guest.ctx.r[n] = n as u32 + 1;
    }
    jit.execute(code, &mut guest);
    assert_eq!(guest.ctx.r[6], 21);
}

#[test]
fn test_x64_exits() {
    let mut ir = Ir::new();
    let x = ir.load_context(reg_offset(0), Type::I32);
    let zero = ir.alloc_i32(0);
    let cond = ir.cmp_eq(x, zero);
    let taken = ir.alloc_i32(0x200);
    ir.branch_true(cond, taken);
    let target = ir.load_context(reg_offset(1), Type::I32);
    ir.branch(target);

    let mut jit = backend();
    let code = compile(&mut jit, &mut ir);

    let mut guest = TestGuest::new();
    assert_eq!(jit.execute(code, &mut guest), BlockExit::Static(0));
    assert_eq!(guest.ctx.pc, 0x200);

    guest.ctx.r[0] = 1;
    guest.ctx.r[1] = 0xabc0;
    assert_eq!(jit.execute(code, &mut guest), BlockExit::Dynamic);
    assert_eq!(guest.ctx.pc, 0xabc0);
}

#[test]
fn test_x64_thunks() {
    let mut ir = Ir::new();
    ir.source_info(0x100, 4);
    ir.fallback(store_addr_fallback as usize, 0x100, 7);
    let addr = ir.load_context(reg_offset(0), Type::I32);
    let word = ir.load_guest(addr, Type::I16);
    let wide = ir.zext(word, Type::I32);
    let dst = ir.alloc_i32(0x40);
    ir.store_guest(dst, wide);
    let a = ir.alloc_i64(40);
    let b = ir.alloc_i64(2);
    ir.call(record_call as usize, Some(a), Some(b));
    let out = ir.alloc_i32(0x102);
    ir.branch(out);

    let mut jit = backend();
    let code = compile(&mut jit, &mut ir);

    let mut guest = TestGuest::new();
    guest.ctx.cycles = 10;
    guest.ctx.r[0] = 0x80;
    guest.mem[0x80] = 0x34;
    guest.mem[0x81] = 0x12;
    jit.execute(code, &mut guest);

    assert_eq!(guest.ctx.cycles, 6);
    assert_eq!(guest.ctx.instrs, 1);
    assert_eq!(guest.ctx.r[7], 0x100);
    assert_eq!(guest.ctx.r[15], 42);
    assert_eq!(&guest.mem[0x40..0x44], &[0x34, 0x12, 0, 0]);
}

#[test]
fn test_x64_float_math() {
    let mut ir = Ir::new();
    let x = ir.load_context(reg_offset(0), Type::I32);
    let f = ir.itof(x, Type::F32);
    let half = ir.alloc_f32(0.5);
    let prod = ir.fmul(f, half);
    let back = ir.ftoi(prod, Type::I32);
    ir.store_context(reg_offset(1), back);
    let out = ir.alloc_i32(0);
    ir.branch(out);

    let mut jit = backend();
    let code = compile(&mut jit, &mut ir);
    let mut guest = TestGuest::new();
    guest.ctx.r[0] = 9;
    jit.execute(code, &mut guest);
    assert_eq!(guest.ctx.r[1], 4);
}

#[test]
fn test_x64_overflow_then_reset() {
    let mut jit = X64Backend::with_capacity(TEST_OFFSETS, 4096).unwrap();
    let build = || {
        let mut ir = Ir::new();
        let a = ir.load_context(reg_offset(0), Type::I32);
        let b = ir.load_context(reg_offset(1), Type::I32);
        let sum = ir.add(a, b);
        ir.store_context(reg_offset(2), sum);
        let out = ir.alloc_i32(0x100);
        ir.branch(out);
        Pipeline::new().optimize(&mut ir, &X64_REGISTERS);
        ir
    };

    let ir = build();
    let mut assembled = 0;
    let err = loop {
        match jit.assemble(0, &ir) {
            Ok(_) => assembled += 1,
            Err(e) => break e,
        }
        assert!(assembled < 4096, "buffer never filled up");
    };
    assert!(matches!(err, BackendError::Overflow));
    assert!(assembled > 0);
    let used = jit.code_used();
    assert!(used <= 4096);

    jit.reset();
    assert_eq!(jit.code_used(), 0);
    let code = jit.assemble(0, &ir).unwrap();
    let mut guest = TestGuest::new();
    guest.ctx.r[0] = 2;
    guest.ctx.r[1] = 3;
    jit.execute(code, &mut guest);
    assert_eq!(guest.ctx.r[2], 5);
}

#[test]
fn test_x64_dump_code() {
    let mut ir = Ir::new();
    let out = ir.alloc_i32(0x100);
    ir.branch(out);
    let mut jit = backend();
    let code = compile(&mut jit, &mut ir);

    let mut dump = Vec::new();
    jit.dump_code(code, &mut dump).unwrap();
    let text = String::from_utf8(dump).unwrap();
    assert!(text.starts_with(&format!("{:#014x}:", jit.code_addr(code))));
    assert_eq!(jit.code_bytes(code).len(), jit.code_size(code));
}
