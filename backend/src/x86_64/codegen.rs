//! x86-64 code generator.
//!
//! Every op loads its operands into the scratch registers, computes
//! there, and moves the result into the register chosen by the
//! allocator. Integer values are kept zero-extended to 64 bits in
//! their host registers; floats live in the low lane of an XMM.
//!
//! A block is entered as `extern "C" fn(ctx, cell) -> u32` and
//! returns its exit slot, or [`DYNAMIC_EXIT`].

use std::collections::HashMap;
use std::io::Write;

use jit_core::{
    BlockId, CallFn, Constant, FallbackFn, Guest, GuestOffsets, InstrId, Ir, Opcode, Type,
    ValueId,
};

use crate::code_buffer::{CodeBuffer, DEFAULT_CODE_BUF_SIZE};
use crate::x86_64::emitter::*;
use crate::x86_64::regs::*;
use crate::{
    dump_hex, exit_slot, static_exits, Backend, BackendError, BlockExit, CodeHandle, Register,
    DYNAMIC_EXIT,
};

/// Guest handle reachable from generated code.
struct GuestCell<'a> {
    guest: &'a mut dyn Guest,
}

type BlockFn = unsafe extern "C" fn(ctx: *mut u8, cell: *mut u8) -> u32;

// -- Thunks called from generated code --

/// # Safety
/// `cell` must be the `GuestCell` the running block was entered with.
unsafe fn cell_guest<'a>(cell: *mut u8) -> &'a mut dyn Guest {
    let cell = &mut *(cell as *mut GuestCell<'a>);
    &mut *cell.guest
}

extern "C" fn load_guest_thunk(cell: *mut u8, addr: u32, size: u32) -> u64 {
    // SAFETY: generated code forwards its own cell.
    let guest = unsafe { cell_guest(cell) };
    match size {
        1 => guest.r8(addr) as u64,
        2 => guest.r16(addr) as u64,
        4 => guest.r32(addr) as u64,
        _ => guest.r64(addr),
    }
}

extern "C" fn store_guest_thunk(cell: *mut u8, addr: u32, value: u64, size: u32) {
    // SAFETY: generated code forwards its own cell.
    let guest = unsafe { cell_guest(cell) };
    match size {
        1 => guest.w8(addr, value as u8),
        2 => guest.w16(addr, value as u16),
        4 => guest.w32(addr, value as u32),
        _ => guest.w64(addr, value),
    }
}

extern "C" fn fallback_thunk(cell: *mut u8, func: usize, addr: u32, raw: u32) {
    // SAFETY: generated code forwards its own cell, and `fallback` ops
    // only carry FallbackFn addresses.
    unsafe {
        let func: FallbackFn = std::mem::transmute(func);
        func(cell_guest(cell), addr, raw);
    }
}

extern "C" fn call_thunk(cell: *mut u8, func: usize, arg0: u64, arg1: u64) {
    // SAFETY: as above, `call` ops only carry CallFn addresses.
    unsafe {
        let func: CallFn = std::mem::transmute(func);
        func(cell_guest(cell), arg0, arg1);
    }
}

// -- Assembler --

/// Where an operand comes from.
#[derive(Debug, Clone, Copy)]
enum Src {
    Reg(HostReg),
    Imm(u64),
}

struct Assembler<'a> {
    buf: &'a mut CodeBuffer,
    ir: &'a Ir,
    offsets: GuestOffsets,
    frame: Frame,
    exits: Vec<u32>,
    save_xmms: bool,
    labels: HashMap<BlockId, usize>,
    block_jumps: Vec<(usize, BlockId)>,
    epilogue_jumps: Vec<usize>,
}

impl<'a> Assembler<'a> {
    fn new(buf: &'a mut CodeBuffer, ir: &'a Ir, offsets: GuestOffsets) -> Self {
        let save_xmms = ir.all_instrs().into_iter().any(|i| {
            ir.instr(i)
                .result
                .map_or(false, |r| ir.ty(r).is_float())
        });
        Self {
            buf,
            ir,
            offsets,
            frame: Frame::new(ir.locals_size()),
            exits: static_exits(ir),
            save_xmms,
            labels: HashMap::new(),
            block_jumps: Vec::new(),
            epilogue_jumps: Vec::new(),
        }
    }

    fn run(mut self) -> Result<(), BackendError> {
        let ir = self.ir;
        self.emit_prologue();
        for &block in ir.blocks() {
            self.labels.insert(block, self.buf.offset());
            for instr in ir.block_instrs(block) {
                self.emit_instr(instr)?;
            }
        }

        // Only reached when the last block does not end in a branch.
        emit_mov_ri(self.buf, TMP0, DYNAMIC_EXIT as u64);
        for site in std::mem::take(&mut self.epilogue_jumps) {
            bind(self.buf, site);
        }
        self.emit_epilogue();

        for (site, block) in std::mem::take(&mut self.block_jumps) {
            let target = self.labels[&block];
            patch_rel32(self.buf, site, target);
        }
        Ok(())
    }

    fn emit_prologue(&mut self) {
        for &reg in CALLEE_SAVED {
            emit_push(self.buf, reg);
        }
        emit_arith_ri(self.buf, ArithOp::Sub, true, Reg::Rsp, self.frame.size);
        emit_mov_rr(self.buf, true, CTX_REG, CALL_ARG_REGS[0]);
        emit_mov_rr(self.buf, true, GUEST_REG, CALL_ARG_REGS[1]);
    }

    fn emit_epilogue(&mut self) {
        emit_arith_ri(self.buf, ArithOp::Add, true, Reg::Rsp, self.frame.size);
        for &reg in CALLEE_SAVED.iter().rev() {
            emit_pop(self.buf, reg);
        }
        emit_ret(self.buf);
    }

    // -- Operands --

    fn arg(&self, instr: InstrId, n: usize) -> ValueId {
        match self.ir.instr(instr).arg(n) {
            Some(v) => v,
            None => panic!(
                "{} is missing argument {n}",
                self.ir.instr(instr).op.name()
            ),
        }
    }

    fn arg_ty(&self, instr: InstrId, n: usize) -> Type {
        self.ir.ty(self.arg(instr, n))
    }

    fn src(&self, op: Opcode, v: ValueId) -> Result<Src, BackendError> {
        let value = self.ir.value(v);
        if value.ty.is_vector() {
            return Err(BackendError::Unsupported {
                op: op.name(),
                ty: value.ty,
            });
        }
        match value.constant() {
            Some(Constant::Str(_)) | Some(Constant::Blk(_)) => Err(BackendError::Unsupported {
                op: op.name(),
                ty: value.ty,
            }),
            Some(_) => Ok(Src::Imm(value.bits())),
            None => match value.reg {
                Some(r) => Ok(Src::Reg(HOST_REGS[r as usize])),
                None => panic!("value {} reached the backend unallocated", v.0),
            },
        }
    }

    fn load_src(&mut self, dst: Reg, src: Src) {
        match src {
            Src::Imm(bits) => emit_mov_ri(self.buf, dst, bits),
            Src::Reg(HostReg::Gpr(r)) => {
                if r != dst {
                    emit_mov_rr(self.buf, true, dst, r);
                }
            }
            Src::Reg(HostReg::Xmm(x)) => emit_movq_rx(self.buf, dst, x),
        }
    }

    /// Load the raw bits of `v` into a GPR.
    fn load_gpr(&mut self, op: Opcode, dst: Reg, v: ValueId) -> Result<(), BackendError> {
        let src = self.src(op, v)?;
        self.load_src(dst, src);
        Ok(())
    }

    /// Load a float into an XMM. Clobbers `TMP0` for constants.
    fn load_xmm(&mut self, op: Opcode, dst: Xmm, v: ValueId) -> Result<(), BackendError> {
        match self.src(op, v)? {
            Src::Imm(bits) => {
                emit_mov_ri(self.buf, TMP0, bits);
                emit_movq_xr(self.buf, dst, TMP0);
            }
            Src::Reg(HostReg::Xmm(x)) => {
                if x != dst {
                    emit_sse_rr(self.buf, OPC_MOVAPS, dst, x);
                }
            }
            Src::Reg(HostReg::Gpr(r)) => emit_movq_xr(self.buf, dst, r),
        }
        Ok(())
    }

    fn result_reg(&self, instr: InstrId) -> Option<HostReg> {
        let result = self.ir.instr(instr).result?;
        self.ir.value(result).reg.map(|r| HOST_REGS[r as usize])
    }

    fn set_result(&mut self, instr: InstrId, from: Reg) {
        match self.result_reg(instr) {
            Some(HostReg::Gpr(r)) => emit_mov_rr(self.buf, true, r, from),
            Some(HostReg::Xmm(x)) => emit_movq_xr(self.buf, x, from),
            None => {}
        }
    }

    fn set_result_xmm(&mut self, instr: InstrId, from: Xmm) {
        match self.result_reg(instr) {
            Some(HostReg::Xmm(x)) => {
                if x != from {
                    emit_sse_rr(self.buf, OPC_MOVAPS, x, from);
                }
            }
            Some(HostReg::Gpr(r)) => emit_movq_rx(self.buf, r, from),
            None => {}
        }
    }

    /// Zero-extend the low `ty` bits of `reg` to 64 bits.
    fn zext(&mut self, ty: Type, reg: Reg) {
        match ty {
            Type::I8 => emit_movx(self.buf, OPC_MOVZBL, reg, reg),
            Type::I16 => emit_movx(self.buf, OPC_MOVZWL, reg, reg),
            Type::I32 | Type::F32 => emit_mov_rr(self.buf, false, reg, reg),
            _ => {}
        }
    }

    /// Sign-extend the low `ty` bits of `reg` to 64 bits.
    fn sext(&mut self, ty: Type, reg: Reg) {
        match ty {
            Type::I8 => emit_movx(self.buf, OPC_MOVSBQ, reg, reg),
            Type::I16 => emit_movx(self.buf, OPC_MOVSWQ, reg, reg),
            Type::I32 => emit_movx(self.buf, OPC_MOVSLQ, reg, reg),
            _ => {}
        }
    }

    // -- Calls and exits --

    /// Call `thunk(cell, args...)`, preserving the allocatable XMMs.
    fn emit_call(&mut self, thunk: usize, args: &[Src]) {
        if self.save_xmms {
            for (n, &x) in SAVED_XMMS.iter().enumerate() {
                let offset = self.frame.xmm_save + 8 * n as i32;
                emit_sse_mem(self.buf, OPC_MOVSD_WxVx, x, Reg::Rsp, offset);
            }
        }
        emit_mov_rr(self.buf, true, CALL_ARG_REGS[0], GUEST_REG);
        for (n, &arg) in args.iter().enumerate() {
            self.load_src(CALL_ARG_REGS[n + 1], arg);
        }
        emit_mov_ri(self.buf, TMP0, thunk as u64);
        emit_call_reg(self.buf, TMP0);
        if self.save_xmms {
            for (n, &x) in SAVED_XMMS.iter().enumerate() {
                let offset = self.frame.xmm_save + 8 * n as i32;
                emit_sse_mem(self.buf, OPC_MOVSD_VxWx, x, Reg::Rsp, offset);
            }
        }
    }

    fn jmp_epilogue(&mut self) {
        let site = emit_jmp_fwd(self.buf);
        self.epilogue_jumps.push(site);
    }

    /// Unconditional transfer to `target`: a block of this unit, a
    /// constant guest address, or a computed one.
    fn emit_goto(&mut self, op: Opcode, target: ValueId) -> Result<(), BackendError> {
        let ir = self.ir;
        match ir.value(target).constant() {
            Some(Constant::Blk(block)) => {
                let site = emit_jmp_fwd(self.buf);
                self.block_jumps.push((site, *block));
            }
            Some(Constant::I32(addr)) => {
                let addr = *addr as u32;
                emit_store_imm(self.buf, CTX_REG, self.offsets.pc, addr as i32);
                emit_mov_ri(self.buf, TMP0, exit_slot(&self.exits, addr) as u64);
                self.jmp_epilogue();
            }
            _ => {
                self.load_gpr(op, TMP1, target)?;
                emit_store_sized(self.buf, 4, TMP1, CTX_REG, self.offsets.pc);
                emit_mov_ri(self.buf, TMP0, DYNAMIC_EXIT as u64);
                self.jmp_epilogue();
            }
        }
        Ok(())
    }

    // -- Memory --

    fn emit_load_mem(&mut self, instr: InstrId, ty: Type, base: Reg, offset: i32) {
        match ty {
            Type::F32 | Type::F64 => {
                let opc = if ty == Type::F64 {
                    OPC_MOVSD_VxWx
                } else {
                    OPC_MOVSS_VxWx
                };
                emit_sse_mem(self.buf, opc, XTMP0, base, offset);
                self.set_result_xmm(instr, XTMP0);
            }
            _ => {
                emit_load_zx(self.buf, ty.size_bytes(), TMP0, base, offset);
                self.set_result(instr, TMP0);
            }
        }
    }

    /// Store `v` to `[base + offset]`. `base` must not be `TMP0` or
    /// `TMP1`.
    fn emit_store_mem(
        &mut self,
        op: Opcode,
        v: ValueId,
        base: Reg,
        offset: i32,
    ) -> Result<(), BackendError> {
        let ty = self.ir.ty(v);
        match ty {
            Type::F32 | Type::F64 => {
                self.load_xmm(op, XTMP0, v)?;
                let opc = if ty == Type::F64 {
                    OPC_MOVSD_WxVx
                } else {
                    OPC_MOVSS_WxVx
                };
                emit_sse_mem(self.buf, opc, XTMP0, base, offset);
            }
            _ => {
                self.load_gpr(op, TMP1, v)?;
                emit_store_sized(self.buf, ty.size_bytes(), TMP1, base, offset);
            }
        }
        Ok(())
    }

    fn const_offset(&self, instr: InstrId) -> i32 {
        self.ir.value(self.arg(instr, 0)).i32()
    }

    // -- Instructions --

    fn emit_instr(&mut self, instr: InstrId) -> Result<(), BackendError> {
        let i = self.ir.instr(instr);
        let op = i.op;
        let ty = i.result.map(|r| self.ir.ty(r));
        if let Some(ty) = ty.filter(|t| t.is_vector()) {
            return Err(BackendError::Unsupported { op: op.name(), ty });
        }
        let rty = ty.unwrap_or(Type::I64);

        match op {
            Opcode::SourceInfo => {
                let cycles = self.ir.value(self.arg(instr, 1)).i32();
                emit_arith_mi(self.buf, ArithOp::Sub, CTX_REG, self.offsets.cycles, cycles);
                emit_arith_mi(self.buf, ArithOp::Add, CTX_REG, self.offsets.instrs, 1);
            }
            Opcode::Fallback => {
                let args = [
                    self.src(op, self.arg(instr, 0))?,
                    self.src(op, self.arg(instr, 1))?,
                    self.src(op, self.arg(instr, 2))?,
                ];
                self.emit_call(fallback_thunk as usize, &args);
            }
            Opcode::Call => {
                let func = self.src(op, self.arg(instr, 0))?;
                let mut args = [func, Src::Imm(0), Src::Imm(0)];
                for (n, slot) in args.iter_mut().enumerate().skip(1) {
                    if let Some(v) = self.ir.instr(instr).arg(n) {
                        *slot = self.src(op, v)?;
                    }
                }
                self.emit_call(call_thunk as usize, &args);
            }
            Opcode::LoadGuest => {
                let addr = self.src(op, self.arg(instr, 0))?;
                let size = Src::Imm(rty.size_bytes() as u64);
                self.emit_call(load_guest_thunk as usize, &[addr, size]);
                self.zext(rty, TMP0);
                self.set_result(instr, TMP0);
            }
            Opcode::StoreGuest => {
                let addr = self.src(op, self.arg(instr, 0))?;
                let value = self.src(op, self.arg(instr, 1))?;
                let size = Src::Imm(self.arg_ty(instr, 1).size_bytes() as u64);
                self.emit_call(store_guest_thunk as usize, &[addr, value, size]);
            }
            Opcode::LoadHost => {
                self.load_gpr(op, TMP2, self.arg(instr, 0))?;
                self.emit_load_mem(instr, rty, TMP2, 0);
            }
            Opcode::StoreHost => {
                self.load_gpr(op, TMP2, self.arg(instr, 0))?;
                self.emit_store_mem(op, self.arg(instr, 1), TMP2, 0)?;
            }
            Opcode::LoadContext => {
                let offset = self.const_offset(instr);
                self.emit_load_mem(instr, rty, CTX_REG, offset);
            }
            Opcode::StoreContext => {
                let offset = self.const_offset(instr);
                self.emit_store_mem(op, self.arg(instr, 1), CTX_REG, offset)?;
            }
            Opcode::LoadLocal => {
                let offset = self.const_offset(instr);
                self.emit_load_mem(instr, rty, Reg::Rsp, offset);
            }
            Opcode::StoreLocal => {
                let offset = self.const_offset(instr);
                self.emit_store_mem(op, self.arg(instr, 1), Reg::Rsp, offset)?;
            }

            Opcode::Ftoi => {
                self.load_xmm(op, XTMP0, self.arg(instr, 0))?;
                emit_cvttf2si(self.buf, self.arg_ty(instr, 0) == Type::F64, TMP0, XTMP0);
                self.zext(rty, TMP0);
                self.set_result(instr, TMP0);
            }
            Opcode::Itof => {
                self.load_gpr(op, TMP0, self.arg(instr, 0))?;
                self.sext(self.arg_ty(instr, 0), TMP0);
                emit_cvtsi2f(self.buf, rty == Type::F64, XTMP0, TMP0);
                self.set_result_xmm(instr, XTMP0);
            }
            Opcode::Sext => {
                self.load_gpr(op, TMP0, self.arg(instr, 0))?;
                self.sext(self.arg_ty(instr, 0), TMP0);
                self.zext(rty, TMP0);
                self.set_result(instr, TMP0);
            }
            Opcode::Zext | Opcode::Trunc => {
                self.load_gpr(op, TMP0, self.arg(instr, 0))?;
                self.zext(rty, TMP0);
                self.set_result(instr, TMP0);
            }
            Opcode::Fext | Opcode::Ftrunc => {
                self.load_xmm(op, XTMP0, self.arg(instr, 0))?;
                let opc = if op == Opcode::Fext {
                    OPC_CVTSS2SD
                } else {
                    OPC_CVTSD2SS
                };
                emit_sse_rr(self.buf, opc, XTMP0, XTMP0);
                self.set_result_xmm(instr, XTMP0);
            }

            Opcode::Select => self.emit_select(instr, rty)?,
            Opcode::CmpEq
            | Opcode::CmpNe
            | Opcode::CmpSge
            | Opcode::CmpSgt
            | Opcode::CmpUge
            | Opcode::CmpUgt
            | Opcode::CmpSle
            | Opcode::CmpSlt
            | Opcode::CmpUle
            | Opcode::CmpUlt => self.emit_cmp(instr, op, self.arg_ty(instr, 0))?,
            Opcode::FcmpEq
            | Opcode::FcmpNe
            | Opcode::FcmpGe
            | Opcode::FcmpGt
            | Opcode::FcmpLe
            | Opcode::FcmpLt => self.emit_fcmp(instr, op, self.arg_ty(instr, 0))?,

            Opcode::Add
            | Opcode::Sub
            | Opcode::Smul
            | Opcode::Umul
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor => {
                self.load_gpr(op, TMP0, self.arg(instr, 0))?;
                self.load_gpr(op, TMP1, self.arg(instr, 1))?;
                match op {
                    Opcode::Add => emit_arith_rr(self.buf, ArithOp::Add, true, TMP0, TMP1),
                    Opcode::Sub => emit_arith_rr(self.buf, ArithOp::Sub, true, TMP0, TMP1),
                    Opcode::And => emit_arith_rr(self.buf, ArithOp::And, true, TMP0, TMP1),
                    Opcode::Or => emit_arith_rr(self.buf, ArithOp::Or, true, TMP0, TMP1),
                    Opcode::Xor => emit_arith_rr(self.buf, ArithOp::Xor, true, TMP0, TMP1),
                    // The low bits of a product do not depend on signedness.
                    _ => emit_imul_rr(self.buf, true, TMP0, TMP1),
                }
                self.zext(rty, TMP0);
                self.set_result(instr, TMP0);
            }
            Opcode::Div => self.emit_div(instr, rty)?,
            Opcode::Neg | Opcode::Not => {
                self.load_gpr(op, TMP0, self.arg(instr, 0))?;
                if op == Opcode::Neg {
                    emit_neg(self.buf, true, TMP0);
                } else {
                    emit_not(self.buf, true, TMP0);
                }
                self.zext(rty, TMP0);
                self.set_result(instr, TMP0);
            }
            Opcode::Abs => {
                self.load_gpr(op, TMP0, self.arg(instr, 0))?;
                self.sext(rty, TMP0);
                emit_mov_rr(self.buf, true, TMP1, TMP0);
                emit_neg(self.buf, true, TMP0);
                emit_cmovcc(self.buf, X86Cond::Js, true, TMP0, TMP1);
                self.zext(rty, TMP0);
                self.set_result(instr, TMP0);
            }

            Opcode::Fadd | Opcode::Fsub | Opcode::Fmul | Opcode::Fdiv => {
                self.load_xmm(op, XTMP0, self.arg(instr, 0))?;
                self.load_xmm(op, XTMP1, self.arg(instr, 1))?;
                let opc = match op {
                    Opcode::Fadd => OPC_ADD,
                    Opcode::Fsub => OPC_SUB,
                    Opcode::Fmul => OPC_MUL,
                    _ => OPC_DIV,
                };
                emit_sse_rr(self.buf, opc | sse_scalar(rty == Type::F64), XTMP0, XTMP1);
                self.set_result_xmm(instr, XTMP0);
            }
            Opcode::Sqrt => {
                self.load_xmm(op, XTMP0, self.arg(instr, 0))?;
                emit_sse_rr(self.buf, OPC_SQRT | sse_scalar(rty == Type::F64), XTMP0, XTMP0);
                self.set_result_xmm(instr, XTMP0);
            }
            Opcode::Fneg | Opcode::Fabs => {
                let sign: u64 = if rty == Type::F64 { 1 << 63 } else { 1 << 31 };
                self.load_gpr(op, TMP0, self.arg(instr, 0))?;
                if op == Opcode::Fneg {
                    emit_mov_ri(self.buf, TMP1, sign);
                    emit_arith_rr(self.buf, ArithOp::Xor, true, TMP0, TMP1);
                } else {
                    emit_mov_ri(self.buf, TMP1, sign - 1);
                    emit_arith_rr(self.buf, ArithOp::And, true, TMP0, TMP1);
                }
                self.set_result(instr, TMP0);
            }

            Opcode::Shl | Opcode::Lshr | Opcode::Ashr => {
                self.load_gpr(op, TMP0, self.arg(instr, 0))?;
                self.load_gpr(op, TMP1, self.arg(instr, 1))?;
                let shift = match op {
                    Opcode::Shl => ShiftOp::Shl,
                    Opcode::Lshr => ShiftOp::Shr,
                    _ => {
                        self.sext(rty, TMP0);
                        ShiftOp::Sar
                    }
                };
                emit_shift_cl(self.buf, shift, true, TMP0);
                self.zext(rty, TMP0);
                self.set_result(instr, TMP0);
            }
            Opcode::Ashd | Opcode::Lshd => self.emit_shift_dynamic(instr, op)?,

            Opcode::Branch => self.emit_goto(op, self.arg(instr, 0))?,
            Opcode::BranchTrue | Opcode::BranchFalse => {
                self.load_gpr(op, TMP0, self.arg(instr, 0))?;
                emit_test_rr(self.buf, true, TMP0, TMP0);
                let taken = if op == Opcode::BranchTrue {
                    X86Cond::Jne
                } else {
                    X86Cond::Je
                };
                let target = self.arg(instr, 1);
                let ir = self.ir;
                if let Some(Constant::Blk(block)) = ir.value(target).constant() {
                    let site = emit_jcc_fwd(self.buf, taken);
                    self.block_jumps.push((site, *block));
                } else {
                    let skip = emit_jcc_fwd(self.buf, taken.invert());
                    self.emit_goto(op, target)?;
                    bind(self.buf, skip);
                }
            }
            Opcode::Count => unreachable!("Count is not an opcode"),
        }
        Ok(())
    }

    fn emit_select(&mut self, instr: InstrId, ty: Type) -> Result<(), BackendError> {
        let op = Opcode::Select;
        let (cond, t, f) = (self.arg(instr, 0), self.arg(instr, 1), self.arg(instr, 2));
        if ty.is_float() {
            self.load_xmm(op, XTMP0, f)?;
            self.load_gpr(op, TMP2, cond)?;
            emit_test_rr(self.buf, true, TMP2, TMP2);
            let skip = emit_jcc_fwd(self.buf, X86Cond::Je);
            self.load_xmm(op, XTMP0, t)?;
            bind(self.buf, skip);
            self.set_result_xmm(instr, XTMP0);
        } else {
            self.load_gpr(op, TMP1, t)?;
            self.load_gpr(op, TMP2, f)?;
            self.load_gpr(op, TMP0, cond)?;
            emit_test_rr(self.buf, true, TMP0, TMP0);
            emit_cmovcc(self.buf, X86Cond::Je, true, TMP1, TMP2);
            self.set_result(instr, TMP1);
        }
        Ok(())
    }

    fn emit_cmp(&mut self, instr: InstrId, op: Opcode, ty: Type) -> Result<(), BackendError> {
        let (cond, signed) = match op {
            Opcode::CmpEq => (X86Cond::Je, false),
            Opcode::CmpNe => (X86Cond::Jne, false),
            Opcode::CmpSge => (X86Cond::Jge, true),
            Opcode::CmpSgt => (X86Cond::Jg, true),
            Opcode::CmpUge => (X86Cond::Jae, false),
            Opcode::CmpUgt => (X86Cond::Ja, false),
            Opcode::CmpSle => (X86Cond::Jle, true),
            Opcode::CmpSlt => (X86Cond::Jl, true),
            Opcode::CmpUle => (X86Cond::Jbe, false),
            _ => (X86Cond::Jb, false),
        };
        self.load_gpr(op, TMP0, self.arg(instr, 0))?;
        self.load_gpr(op, TMP1, self.arg(instr, 1))?;
        if signed {
            self.sext(ty, TMP0);
            self.sext(ty, TMP1);
        }
        emit_arith_rr(self.buf, ArithOp::Cmp, true, TMP0, TMP1);
        emit_setcc(self.buf, cond, TMP0);
        emit_movx(self.buf, OPC_MOVZBL, TMP0, TMP0);
        self.set_result(instr, TMP0);
        Ok(())
    }

    /// Float compares. Unordered operands compare unequal and fail
    /// every ordered relation.
    fn emit_fcmp(&mut self, instr: InstrId, op: Opcode, ty: Type) -> Result<(), BackendError> {
        self.load_xmm(op, XTMP0, self.arg(instr, 0))?;
        self.load_xmm(op, XTMP1, self.arg(instr, 1))?;
        let ucomis = if ty == Type::F64 {
            OPC_UCOMISD
        } else {
            OPC_UCOMISS
        };

        match op {
            Opcode::FcmpEq | Opcode::FcmpNe => {
                emit_sse_rr(self.buf, ucomis, XTMP0, XTMP1);
                let (cc, parity, combine) = if op == Opcode::FcmpEq {
                    (X86Cond::Je, X86Cond::Jnp, ArithOp::And)
                } else {
                    (X86Cond::Jne, X86Cond::Jp, ArithOp::Or)
                };
                emit_setcc(self.buf, cc, TMP0);
                emit_setcc(self.buf, parity, TMP1);
                emit_movx(self.buf, OPC_MOVZBL, TMP0, TMP0);
                emit_movx(self.buf, OPC_MOVZBL, TMP1, TMP1);
                emit_arith_rr(self.buf, combine, false, TMP0, TMP1);
            }
            _ => {
                // a < b is b > a; CF is set for unordered inputs.
                let (lhs, rhs, cc) = match op {
                    Opcode::FcmpGt => (XTMP0, XTMP1, X86Cond::Ja),
                    Opcode::FcmpGe => (XTMP0, XTMP1, X86Cond::Jae),
                    Opcode::FcmpLt => (XTMP1, XTMP0, X86Cond::Ja),
                    _ => (XTMP1, XTMP0, X86Cond::Jae),
                };
                emit_sse_rr(self.buf, ucomis, lhs, rhs);
                emit_setcc(self.buf, cc, TMP0);
                emit_movx(self.buf, OPC_MOVZBL, TMP0, TMP0);
            }
        }
        self.set_result(instr, TMP0);
        Ok(())
    }

    /// Signed division. Division by zero yields zero and overflow
    /// wraps.
    fn emit_div(&mut self, instr: InstrId, ty: Type) -> Result<(), BackendError> {
        let op = Opcode::Div;
        self.load_gpr(op, TMP0, self.arg(instr, 0))?;
        self.load_gpr(op, TMP1, self.arg(instr, 1))?;
        self.sext(ty, TMP0);
        self.sext(ty, TMP1);

        emit_test_rr(self.buf, true, TMP1, TMP1);
        let zero = emit_jcc_fwd(self.buf, X86Cond::Je);
        emit_arith_ri(self.buf, ArithOp::Cmp, true, TMP1, -1);
        let divide = emit_jcc_fwd(self.buf, X86Cond::Jne);
        emit_neg(self.buf, true, TMP0);
        let done_neg = emit_jmp_fwd(self.buf);

        bind(self.buf, divide);
        emit_cqo(self.buf);
        emit_idiv(self.buf, true, TMP1);
        let done_div = emit_jmp_fwd(self.buf);

        bind(self.buf, zero);
        emit_mov_ri(self.buf, TMP0, 0);

        bind(self.buf, done_neg);
        bind(self.buf, done_div);
        self.zext(ty, TMP0);
        self.set_result(instr, TMP0);
        Ok(())
    }

    /// 32-bit shift by a signed amount: left for non-negative counts,
    /// right by `-n & 31` otherwise, where a count of 32 shifts every
    /// bit out.
    fn emit_shift_dynamic(&mut self, instr: InstrId, op: Opcode) -> Result<(), BackendError> {
        let arithmetic = op == Opcode::Ashd;
        self.load_gpr(op, TMP0, self.arg(instr, 0))?;
        self.load_gpr(op, TMP1, self.arg(instr, 1))?;

        emit_test_rr(self.buf, false, TMP1, TMP1);
        let right = emit_jcc_fwd(self.buf, X86Cond::Js);
        emit_shift_cl(self.buf, ShiftOp::Shl, false, TMP0);
        let done_left = emit_jmp_fwd(self.buf);

        bind(self.buf, right);
        emit_mov_rr(self.buf, false, TMP2, TMP1);
        emit_arith_ri(self.buf, ArithOp::And, false, TMP2, 31);
        let full = emit_jcc_fwd(self.buf, X86Cond::Je);
        emit_neg(self.buf, false, TMP1);
        let shift = if arithmetic { ShiftOp::Sar } else { ShiftOp::Shr };
        emit_shift_cl(self.buf, shift, false, TMP0);
        let done_right = emit_jmp_fwd(self.buf);

        bind(self.buf, full);
        if arithmetic {
            emit_shift_ri(self.buf, ShiftOp::Sar, false, TMP0, 31);
        } else {
            emit_mov_ri(self.buf, TMP0, 0);
        }

        bind(self.buf, done_left);
        bind(self.buf, done_right);
        self.zext(Type::I32, TMP0);
        self.set_result(instr, TMP0);
        Ok(())
    }
}

// -- Backend --

struct X64Block {
    guest_addr: u32,
    offset: usize,
    size: usize,
}

/// Native x86-64 backend (System V).
pub struct X64Backend {
    offsets: GuestOffsets,
    buf: CodeBuffer,
    blocks: Vec<Option<X64Block>>,
}

impl X64Backend {
    pub fn new(offsets: GuestOffsets) -> Result<Self, BackendError> {
        Self::with_capacity(offsets, DEFAULT_CODE_BUF_SIZE)
    }

    pub fn with_capacity(offsets: GuestOffsets, size: usize) -> Result<Self, BackendError> {
        let buf = CodeBuffer::new(size)?;
        buf.set_executable()?;
        Ok(Self {
            offsets,
            buf,
            blocks: Vec::new(),
        })
    }

    fn block(&self, code: CodeHandle) -> &X64Block {
        match self.blocks.get(code.0).and_then(|b| b.as_ref()) {
            Some(b) => b,
            None => panic!("stale code handle {}", code.0),
        }
    }

    /// Machine code of an assembled block.
    pub fn code_bytes(&self, code: CodeHandle) -> &[u8] {
        let block = self.block(code);
        self.buf.slice(block.offset, block.offset + block.size)
    }

    /// Bytes of the code buffer in use.
    pub fn code_used(&self) -> usize {
        self.buf.offset()
    }
}

impl Backend for X64Backend {
    fn name(&self) -> &'static str {
        "x64"
    }

    fn registers(&self) -> &[Register] {
        &X64_REGISTERS
    }

    fn assemble(&mut self, guest_addr: u32, ir: &Ir) -> Result<CodeHandle, BackendError> {
        self.buf.set_writable()?;
        let start = self.buf.offset();
        let result = Assembler::new(&mut self.buf, ir, self.offsets).run();
        let overflowed = self.buf.overflowed();
        if result.is_err() || overflowed {
            self.buf.rewind(start);
        }
        self.buf.set_executable()?;
        result?;
        if overflowed {
            return Err(BackendError::Overflow);
        }

        let block = X64Block {
            guest_addr,
            offset: start,
            size: self.buf.offset() - start,
        };
        log::trace!(
            "x64: 0x{:08x} assembled to {} bytes at +{:#x}",
            guest_addr,
            block.size,
            start
        );
        self.blocks.push(Some(block));
        Ok(CodeHandle(self.blocks.len() - 1))
    }

    fn execute(&mut self, code: CodeHandle, guest: &mut dyn Guest) -> BlockExit {
        let offset = self.block(code).offset;
        // SAFETY: the block was assembled by us with the BlockFn ABI and
        // the buffer is executable outside `assemble`.
        let entry: BlockFn = unsafe { std::mem::transmute(self.buf.ptr_at(offset)) };
        let mut cell = GuestCell { guest };
        let ctx = cell.guest.ctx_ptr();
        // SAFETY: ctx and cell stay valid for the duration of the call.
        let raw = unsafe { entry(ctx, &mut cell as *mut GuestCell<'_> as *mut u8) };
        if raw == DYNAMIC_EXIT {
            BlockExit::Dynamic
        } else {
            BlockExit::Static(raw)
        }
    }

    fn free(&mut self, code: CodeHandle) {
        if let Some(slot) = self.blocks.get_mut(code.0) {
            if let Some(block) = slot.take() {
                log::trace!("x64: freed 0x{:08x}", block.guest_addr);
            }
        }
    }

    fn reset(&mut self) {
        self.blocks.clear();
        self.buf.rewind(0);
    }

    fn code_addr(&self, code: CodeHandle) -> usize {
        self.buf.ptr_at(self.block(code).offset) as usize
    }

    fn code_size(&self, code: CodeHandle) -> usize {
        self.block(code).size
    }

    fn dump_code(&self, code: CodeHandle, w: &mut dyn Write) -> std::io::Result<()> {
        dump_hex(self.code_bytes(code), self.code_addr(code), w)
    }
}
