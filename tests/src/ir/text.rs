use jit_core::{parse_ir, read_ir, to_text, Constant, Ir, Opcode, ParseError, Type};

const SIMPLE: &str = "\
%0:
i32 %1 = load_context i32 0x38
i32 %2 = add i32 %1, i32 0x4
store_context i32 0x38, i32 %2
branch i32 0x8c0000a0

";

fn simple_unit() -> Ir {
    let mut ir = Ir::new();
    let pc = ir.load_context(0x38, Type::I32);
    let four = ir.alloc_i32(4);
    let next = ir.add(pc, four);
    ir.store_context(0x38, next);
    let target = ir.alloc_i32(0x8c00_00a0_u32 as i32);
    ir.branch(target);
    ir
}

#[test]
fn test_write_golden() {
    let mut ir = simple_unit();
    assert_eq!(to_text(&mut ir), SIMPLE);
}

#[test]
fn test_parse_then_write_is_stable() {
    let mut ir = Ir::new();
    parse_ir(SIMPLE, &mut ir).unwrap();
    assert_eq!(ir.num_instrs(), 4);
    assert_eq!(to_text(&mut ir), SIMPLE);
}

#[test]
fn test_constants_print_zero_extended() {
    let mut ir = Ir::new();
    let a = ir.load_context(0, Type::I8);
    let m1 = ir.alloc_i8(-1);
    let sum = ir.add(a, m1);
    ir.store_context(0, sum);
    let text = to_text(&mut ir);
    assert!(text.contains("i8 %2 = add i8 %1, i8 0xff"), "{text}");
}

#[test]
fn test_parse_forward_block_reference() {
    let src = "\
# conditional exit
%entry:
i8 %c = load_context i32 0x0
branch_true i8 %c, blk %out
branch i32 0x100

%out:
branch i32 0x200
";
    let mut ir = Ir::new();
    parse_ir(src, &mut ir).unwrap();
    let entry = ir.find_block("entry").unwrap();
    let out = ir.find_block("out").unwrap();
    assert_eq!(ir.block(entry).edges, vec![out]);

    let load = ir.find_instr("c").unwrap();
    assert_eq!(ir.instr(load).op, Opcode::LoadContext);
    assert_eq!(ir.ty(ir.result_of(load)), Type::I8);
}

#[test]
fn test_parse_locals_are_reserved() {
    let src = "\
%0:
i32 %1 = load_context i32 0x0
store_local i32 0x8, i32 %1
i32 %2 = load_local i32 0x8
store_context i32 0x4, i32 %2
";
    let mut ir = Ir::new();
    parse_ir(src, &mut ir).unwrap();
    assert_eq!(ir.locals().len(), 1);
    assert_eq!(ir.locals_size(), 12);
}

#[test]
fn test_read_ir_from_reader() {
    let mut ir = Ir::new();
    read_ir(SIMPLE.as_bytes(), &mut ir).unwrap();
    assert_eq!(ir.blocks().len(), 1);
}

#[test]
fn test_parse_unknown_op() {
    let mut ir = Ir::new();
    let err = parse_ir("%0:\ni32 %1 = frob i32 0x1\n", &mut ir).unwrap_err();
    match err {
        ParseError::UnknownOp { line, name } => {
            assert_eq!(line, 2);
            assert_eq!(name, "frob");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_parse_unknown_type() {
    let mut ir = Ir::new();
    let err = parse_ir("%0:\nbranch x32 0x1\n", &mut ir).unwrap_err();
    assert!(matches!(err, ParseError::UnknownType { line: 2, .. }), "{err}");
}

#[test]
fn test_parse_unresolved_reference() {
    let mut ir = Ir::new();
    let err = parse_ir("%0:\nbranch i32 %9\n", &mut ir).unwrap_err();
    match err {
        ParseError::UnresolvedReference { name } => assert_eq!(name, "9"),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_parse_type_mismatch() {
    let src = "\
%0:
i32 %1 = load_context i32 0x38
i64 %2 = add i64 %1, i64 0x1
";
    let mut ir = Ir::new();
    let err = parse_ir(src, &mut ir).unwrap_err();
    assert!(matches!(err, ParseError::TypeMismatch { .. }), "{err}");
}

#[test]
fn test_parse_too_many_args() {
    let mut ir = Ir::new();
    let src = "%0:\ni32 %1 = add i32 0x1, i32 0x2, i32 0x3, i32 0x4\n";
    let err = parse_ir(src, &mut ir).unwrap_err();
    assert!(matches!(err, ParseError::TooManyArgs { line: 2 }), "{err}");
}

#[test]
fn test_parse_arity() {
    let mut ir = Ir::new();
    let err = parse_ir("%0:\ni32 %1 = add i32 0x1\n", &mut ir).unwrap_err();
    match err {
        ParseError::Arity {
            line,
            op,
            expected,
            found,
        } => {
            assert_eq!((line, op, expected, found), (2, "add", 2, 1));
        }
        other => panic!("unexpected error {other}"),
    }

    let mut ir = Ir::new();
    let err = parse_ir("%0:\nbranch\n", &mut ir).unwrap_err();
    assert!(matches!(err, ParseError::Arity { found: 0, .. }), "{err}");

    // Calls take the routine plus up to two arguments.
    let mut ir = Ir::new();
    parse_ir("%0:\ncall i64 0x1000\ncall i64 0x1000, i64 0x1, i64 0x2\n", &mut ir).unwrap();
    assert_eq!(ir.num_instrs(), 2);
}

#[test]
fn test_parse_operand_type() {
    let cases = [
        ("i32 %1 = add i32 0x1, i64 0x2", 1, Type::I64),
        ("i32 %1 = fadd i32 0x1, i32 0x2", 0, Type::I32),
        ("i32 %1 = load_context i64 0x0", 0, Type::I64),
        ("store_context i32 0x0, blk %0", 1, Type::Blk),
        ("branch i64 0x100", 0, Type::I64),
        ("i8 %1 = ult f32 0x0, f32 0x0", 0, Type::F32),
        ("i32 %1 = select i8 0x1, i32 0x2, i16 0x3", 2, Type::I16),
    ];
    for (line, slot, ty) in cases {
        let mut ir = Ir::new();
        let err = parse_ir(&format!("%0:\n{line}\n"), &mut ir).unwrap_err();
        match err {
            ParseError::OperandType {
                line: 2,
                slot: s,
                ty: t,
                ..
            } => assert_eq!((s, t), (slot, ty), "{line}"),
            other => panic!("{line}: unexpected error {other}"),
        }
    }
}

#[test]
fn test_parse_result_presence() {
    let mut ir = Ir::new();
    let err = parse_ir("%0:\nadd i32 0x1, i32 0x2\n", &mut ir).unwrap_err();
    assert!(
        matches!(err, ParseError::ResultMismatch { op: "add", .. }),
        "{err}"
    );

    let mut ir = Ir::new();
    let err = parse_ir("%0:\ni32 %1 = branch i32 0x0\n", &mut ir).unwrap_err();
    assert!(
        matches!(err, ParseError::ResultMismatch { op: "branch", .. }),
        "{err}"
    );
}

#[test]
fn test_string_escapes_survive_write_and_read() {
    let mut ir = Ir::new();
    let s = ir.alloc_str("it's a\\b\nnext");
    let addr = ir.alloc_i32(0);
    let instr = ir.append_instr(Opcode::StoreContext, None);
    ir.set_arg(instr, 0, addr);
    ir.set_arg(instr, 1, s);
    let text = to_text(&mut ir);
    assert!(
        text.contains(r"store_context i32 0x0, str 'it\'s a\\b\nnext'"),
        "{text}"
    );

    // The reader takes the escaped string in whole; only the op then
    // rejects a string operand.
    let mut back = Ir::new();
    let err = parse_ir(&text, &mut back).unwrap_err();
    assert!(
        matches!(err, ParseError::OperandType { slot: 1, ty: Type::Str, .. }),
        "{err}"
    );
    let store = back.all_instrs()[0];
    let v = back.instr(store).arg(1).unwrap();
    assert_eq!(
        back.value(v).constant(),
        Some(&Constant::Str("it's a\\b\nnext".to_string()))
    );
    assert_eq!(to_text(&mut back), text);
}

#[test]
fn test_parse_bad_escape() {
    let mut ir = Ir::new();
    let err = parse_ir("%0:\nstore_context i32 0x0, str 'a\\q'\n", &mut ir).unwrap_err();
    assert!(matches!(err, ParseError::BadLiteral { line: 2, .. }), "{err}");

    let err = parse_ir("%0:\nstore_context i32 0x0, str 'a\\'\n", &mut ir).unwrap_err();
    assert!(matches!(err, ParseError::UnterminatedString { line: 2 }), "{err}");
}

#[test]
fn test_parse_many_references() {
    // Every instruction uses the previous one, and the exit branches
    // forward into a block defined last.
    let mut src = String::from("%entry:\ni32 %v0 = load_context i32 0x0\n");
    for n in 1..500 {
        src.push_str(&format!("i32 %v{n} = add i32 %v{}, i32 0x1\n", n - 1));
    }
    src.push_str("store_context i32 0x4, i32 %v499\nbranch blk %exit\n%exit:\nbranch i32 0x0\n");

    let mut ir = Ir::new();
    parse_ir(&src, &mut ir).unwrap();
    assert_eq!(ir.num_instrs(), 503);
    let last = ir.find_instr("v499").unwrap();
    let prev = ir.result_of(ir.find_instr("v498").unwrap());
    assert_eq!(ir.instr(last).arg(0), Some(prev));
    let entry = ir.find_block("entry").unwrap();
    assert_eq!(ir.block(entry).edges, vec![ir.find_block("exit").unwrap()]);
}
