use crate::block::LocalId;
use crate::ir::Ir;
use crate::opcode::Opcode;
use crate::types::Type;
use crate::value::ValueId;

impl Ir {
    // -- Internal helpers --

    fn emit_unary(
        &mut self,
        op: Opcode,
        ty: Type,
        a: ValueId,
    ) -> ValueId {
        let instr = self.append_instr(op, Some(ty));
        self.set_arg(instr, 0, a);
        self.result_of(instr)
    }

    fn emit_binary(
        &mut self,
        op: Opcode,
        ty: Type,
        a: ValueId,
        b: ValueId,
    ) -> ValueId {
        let instr = self.append_instr(op, Some(ty));
        self.set_arg(instr, 0, a);
        self.set_arg(instr, 1, b);
        self.result_of(instr)
    }

    fn emit_void(&mut self, op: Opcode, args: &[ValueId]) {
        let instr = self.append_instr(op, None);
        for (n, &a) in args.iter().enumerate() {
            self.set_arg(instr, n, a);
        }
    }

    fn int_binary(&mut self, op: Opcode, a: ValueId, b: ValueId) -> ValueId {
        let ty = self.ty(a);
        assert!(ty.is_int(), "{} expects integer operands", op.name());
        assert_eq!(ty, self.ty(b), "{} operand types differ", op.name());
        self.emit_binary(op, ty, a, b)
    }

    fn float_binary(&mut self, op: Opcode, a: ValueId, b: ValueId) -> ValueId {
        let ty = self.ty(a);
        assert!(ty.is_float(), "{} expects float operands", op.name());
        assert_eq!(ty, self.ty(b), "{} operand types differ", op.name());
        self.emit_binary(op, ty, a, b)
    }

    fn shift(&mut self, op: Opcode, a: ValueId, n: ValueId) -> ValueId {
        let ty = self.ty(a);
        assert!(ty.is_int(), "{} expects an integer operand", op.name());
        assert!(self.ty(n).is_int(), "{} amount must be an integer", op.name());
        self.emit_binary(op, ty, a, n)
    }

    // -- Meta --

    /// Guest address and cycle cost of the guest instruction whose IR
    /// follows.
    pub fn source_info(&mut self, addr: u32, cycles: i32) {
        let addr = self.alloc_i32(addr as i32);
        let cycles = self.alloc_i32(cycles);
        self.emit_void(Opcode::SourceInfo, &[addr, cycles]);
    }

    /// Interpret one guest instruction through a host fallback routine.
    pub fn fallback(&mut self, func: usize, addr: u32, raw: u32) {
        let func = self.alloc_i64(func as i64);
        let addr = self.alloc_i32(addr as i32);
        let raw = self.alloc_i32(raw as i32);
        self.emit_void(Opcode::Fallback, &[func, addr, raw]);
    }

    // -- Memory --

    pub fn load_host(&mut self, addr: ValueId, ty: Type) -> ValueId {
        assert_eq!(self.ty(addr), Type::I64, "host address must be i64");
        self.emit_unary(Opcode::LoadHost, ty, addr)
    }

    pub fn store_host(&mut self, addr: ValueId, v: ValueId) {
        assert_eq!(self.ty(addr), Type::I64, "host address must be i64");
        self.emit_void(Opcode::StoreHost, &[addr, v]);
    }

    pub fn load_guest(&mut self, addr: ValueId, ty: Type) -> ValueId {
        assert_eq!(self.ty(addr), Type::I32, "guest address must be i32");
        assert!(ty.is_int(), "guest loads are integer typed");
        self.emit_unary(Opcode::LoadGuest, ty, addr)
    }

    pub fn store_guest(&mut self, addr: ValueId, v: ValueId) {
        assert_eq!(self.ty(addr), Type::I32, "guest address must be i32");
        assert!(self.ty(v).is_int(), "guest stores are integer typed");
        self.emit_void(Opcode::StoreGuest, &[addr, v]);
    }

    pub fn load_context(&mut self, offset: i32, ty: Type) -> ValueId {
        let offset = self.alloc_i32(offset);
        self.emit_unary(Opcode::LoadContext, ty, offset)
    }

    pub fn store_context(&mut self, offset: i32, v: ValueId) {
        let offset = self.alloc_i32(offset);
        self.emit_void(Opcode::StoreContext, &[offset, v]);
    }

    pub fn load_local(&mut self, local: LocalId) -> ValueId {
        let local = self.local(local);
        let offset = self.alloc_i32(local.offset);
        self.emit_unary(Opcode::LoadLocal, local.ty, offset)
    }

    pub fn store_local(&mut self, local: LocalId, v: ValueId) {
        let local = self.local(local);
        assert_eq!(local.ty, self.ty(v), "local slot type mismatch");
        let offset = self.alloc_i32(local.offset);
        self.emit_void(Opcode::StoreLocal, &[offset, v]);
    }

    // -- Conversion --

    pub fn ftoi(&mut self, v: ValueId, dest: Type) -> ValueId {
        assert!(self.ty(v).is_float() && dest.is_int());
        self.emit_unary(Opcode::Ftoi, dest, v)
    }

    pub fn itof(&mut self, v: ValueId, dest: Type) -> ValueId {
        assert!(self.ty(v).is_int() && dest.is_float());
        self.emit_unary(Opcode::Itof, dest, v)
    }

    pub fn sext(&mut self, v: ValueId, dest: Type) -> ValueId {
        assert!(self.ty(v).is_int() && dest.is_int());
        self.emit_unary(Opcode::Sext, dest, v)
    }

    pub fn zext(&mut self, v: ValueId, dest: Type) -> ValueId {
        assert!(self.ty(v).is_int() && dest.is_int());
        self.emit_unary(Opcode::Zext, dest, v)
    }

    pub fn trunc(&mut self, v: ValueId, dest: Type) -> ValueId {
        assert!(self.ty(v).is_int() && dest.is_int());
        self.emit_unary(Opcode::Trunc, dest, v)
    }

    pub fn fext(&mut self, v: ValueId, dest: Type) -> ValueId {
        assert!(self.ty(v) == Type::F32 && dest == Type::F64);
        self.emit_unary(Opcode::Fext, dest, v)
    }

    pub fn ftrunc(&mut self, v: ValueId, dest: Type) -> ValueId {
        assert!(self.ty(v) == Type::F64 && dest == Type::F32);
        self.emit_unary(Opcode::Ftrunc, dest, v)
    }

    // -- Conditional --

    /// `cond != 0 ? t : f`.
    pub fn select(&mut self, cond: ValueId, t: ValueId, f: ValueId) -> ValueId {
        assert!(self.ty(cond).is_int(), "select condition must be integer");
        let ty = self.ty(t);
        assert_eq!(ty, self.ty(f), "select operand types differ");
        let instr = self.append_instr(Opcode::Select, Some(ty));
        self.set_arg(instr, 0, cond);
        self.set_arg(instr, 1, t);
        self.set_arg(instr, 2, f);
        self.result_of(instr)
    }

    fn cmp(&mut self, op: Opcode, a: ValueId, b: ValueId) -> ValueId {
        assert!(self.ty(a).is_int(), "{} expects integers", op.name());
        assert_eq!(self.ty(a), self.ty(b), "{} operand types differ", op.name());
        self.emit_binary(op, Type::I8, a, b)
    }

    fn fcmp(&mut self, op: Opcode, a: ValueId, b: ValueId) -> ValueId {
        assert!(self.ty(a).is_float(), "{} expects floats", op.name());
        assert_eq!(self.ty(a), self.ty(b), "{} operand types differ", op.name());
        self.emit_binary(op, Type::I8, a, b)
    }

    pub fn cmp_eq(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.cmp(Opcode::CmpEq, a, b)
    }

    pub fn cmp_ne(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.cmp(Opcode::CmpNe, a, b)
    }

    pub fn cmp_sge(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.cmp(Opcode::CmpSge, a, b)
    }

    pub fn cmp_sgt(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.cmp(Opcode::CmpSgt, a, b)
    }

    pub fn cmp_uge(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.cmp(Opcode::CmpUge, a, b)
    }

    pub fn cmp_ugt(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.cmp(Opcode::CmpUgt, a, b)
    }

    pub fn cmp_sle(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.cmp(Opcode::CmpSle, a, b)
    }

    pub fn cmp_slt(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.cmp(Opcode::CmpSlt, a, b)
    }

    pub fn cmp_ule(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.cmp(Opcode::CmpUle, a, b)
    }

    pub fn cmp_ult(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.cmp(Opcode::CmpUlt, a, b)
    }

    pub fn fcmp_eq(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.fcmp(Opcode::FcmpEq, a, b)
    }

    pub fn fcmp_ne(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.fcmp(Opcode::FcmpNe, a, b)
    }

    pub fn fcmp_ge(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.fcmp(Opcode::FcmpGe, a, b)
    }

    pub fn fcmp_gt(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.fcmp(Opcode::FcmpGt, a, b)
    }

    pub fn fcmp_le(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.fcmp(Opcode::FcmpLe, a, b)
    }

    pub fn fcmp_lt(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.fcmp(Opcode::FcmpLt, a, b)
    }

    // -- Integer arithmetic --

    pub fn add(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.int_binary(Opcode::Add, a, b)
    }

    pub fn sub(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.int_binary(Opcode::Sub, a, b)
    }

    pub fn smul(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.int_binary(Opcode::Smul, a, b)
    }

    pub fn umul(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.int_binary(Opcode::Umul, a, b)
    }

    /// Signed division.
    pub fn div(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.int_binary(Opcode::Div, a, b)
    }

    pub fn neg(&mut self, a: ValueId) -> ValueId {
        let ty = self.ty(a);
        assert!(ty.is_int());
        self.emit_unary(Opcode::Neg, ty, a)
    }

    pub fn abs(&mut self, a: ValueId) -> ValueId {
        let ty = self.ty(a);
        assert!(ty.is_int());
        self.emit_unary(Opcode::Abs, ty, a)
    }

    // -- Float arithmetic --

    pub fn fadd(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.float_binary(Opcode::Fadd, a, b)
    }

    pub fn fsub(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.float_binary(Opcode::Fsub, a, b)
    }

    pub fn fmul(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.float_binary(Opcode::Fmul, a, b)
    }

    pub fn fdiv(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.float_binary(Opcode::Fdiv, a, b)
    }

    pub fn fneg(&mut self, a: ValueId) -> ValueId {
        let ty = self.ty(a);
        assert!(ty.is_float());
        self.emit_unary(Opcode::Fneg, ty, a)
    }

    pub fn fabs(&mut self, a: ValueId) -> ValueId {
        let ty = self.ty(a);
        assert!(ty.is_float());
        self.emit_unary(Opcode::Fabs, ty, a)
    }

    pub fn sqrt(&mut self, a: ValueId) -> ValueId {
        let ty = self.ty(a);
        assert!(ty.is_float());
        self.emit_unary(Opcode::Sqrt, ty, a)
    }

    // -- Bitwise --

    pub fn and(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.int_binary(Opcode::And, a, b)
    }

    pub fn or(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.int_binary(Opcode::Or, a, b)
    }

    pub fn xor(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.int_binary(Opcode::Xor, a, b)
    }

    pub fn not(&mut self, a: ValueId) -> ValueId {
        let ty = self.ty(a);
        assert!(ty.is_int());
        self.emit_unary(Opcode::Not, ty, a)
    }

    pub fn shl(&mut self, a: ValueId, n: ValueId) -> ValueId {
        self.shift(Opcode::Shl, a, n)
    }

    pub fn shli(&mut self, a: ValueId, n: i32) -> ValueId {
        let n = self.alloc_i32(n);
        self.shl(a, n)
    }

    pub fn ashr(&mut self, a: ValueId, n: ValueId) -> ValueId {
        self.shift(Opcode::Ashr, a, n)
    }

    pub fn ashri(&mut self, a: ValueId, n: i32) -> ValueId {
        let n = self.alloc_i32(n);
        self.ashr(a, n)
    }

    pub fn lshr(&mut self, a: ValueId, n: ValueId) -> ValueId {
        self.shift(Opcode::Lshr, a, n)
    }

    pub fn lshri(&mut self, a: ValueId, n: i32) -> ValueId {
        let n = self.alloc_i32(n);
        self.lshr(a, n)
    }

    /// Arithmetic shift by a signed amount: left when positive, right
    /// when negative.
    pub fn ashd(&mut self, a: ValueId, n: ValueId) -> ValueId {
        assert_eq!(self.ty(a), Type::I32);
        self.shift(Opcode::Ashd, a, n)
    }

    /// Logical shift by a signed amount: left when positive, right when
    /// negative.
    pub fn lshd(&mut self, a: ValueId, n: ValueId) -> ValueId {
        assert_eq!(self.ty(a), Type::I32);
        self.shift(Opcode::Lshd, a, n)
    }

    // -- Control flow --

    /// Unconditional branch. A `blk` target jumps within the unit and
    /// records a CFG edge; an `i32` target exits to that guest address.
    pub fn branch(&mut self, dst: ValueId) {
        self.check_branch_target(dst);
        self.emit_void(Opcode::Branch, &[dst]);
        self.add_branch_edge(dst);
    }

    /// Branch to `dst` when `cond` is zero, fall through otherwise.
    pub fn branch_false(&mut self, cond: ValueId, dst: ValueId) {
        assert!(self.ty(cond).is_int(), "branch condition must be integer");
        self.check_branch_target(dst);
        self.emit_void(Opcode::BranchFalse, &[cond, dst]);
        self.add_branch_edge(dst);
    }

    /// Branch to `dst` when `cond` is nonzero, fall through otherwise.
    pub fn branch_true(&mut self, cond: ValueId, dst: ValueId) {
        assert!(self.ty(cond).is_int(), "branch condition must be integer");
        self.check_branch_target(dst);
        self.emit_void(Opcode::BranchTrue, &[cond, dst]);
        self.add_branch_edge(dst);
    }

    fn check_branch_target(&self, dst: ValueId) {
        let ty = self.ty(dst);
        assert!(
            ty == Type::Blk || ty == Type::I32,
            "branch target must be blk or i32, found {ty}"
        );
    }

    fn add_branch_edge(&mut self, dst: ValueId) {
        if self.ty(dst) != Type::Blk {
            return;
        }
        let target = self.value(dst).blk();
        if let Some(src) = self.insert_point().block {
            self.add_edge(src, target);
        }
    }

    /// Call a host routine with up to two i64 arguments.
    pub fn call(
        &mut self,
        func: usize,
        arg0: Option<ValueId>,
        arg1: Option<ValueId>,
    ) {
        let func = self.alloc_i64(func as i64);
        let instr = self.append_instr(Opcode::Call, None);
        self.set_arg(instr, 0, func);
        if let Some(a) = arg0 {
            assert_eq!(self.ty(a), Type::I64, "call arguments are i64");
            self.set_arg(instr, 1, a);
        }
        if let Some(a) = arg1 {
            assert_eq!(self.ty(a), Type::I64, "call arguments are i64");
            self.set_arg(instr, 2, a);
        }
    }
}
