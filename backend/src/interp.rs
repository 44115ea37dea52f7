//! Interpreter backend.
//!
//! Register-allocated IR is lowered into a flat stream of operations
//! whose operands are register file indices, immediates or stream
//! positions, then executed directly against the guest. Values are
//! kept as raw bits, zero-extended to 64 bits: integers in their
//! natural width and floats by their IEEE encoding.

use std::collections::HashMap;
use std::io::Write;

use jit_core::guest::{ctx_read, ctx_write};
use jit_core::{
    BlockId, CallFn, Constant, FallbackFn, Guest, GuestOffsets, Ir, Opcode, Type, ValueId,
    FLOAT_TYPES, INT_TYPES,
};

use crate::{exit_slot, static_exits, Backend, BackendError, BlockExit, CodeHandle, Register};

/// Default register set: eight integer and eight float registers.
pub const INTERP_REGISTERS: [Register; 16] = [
    Register::new("r0", INT_TYPES),
    Register::new("r1", INT_TYPES),
    Register::new("r2", INT_TYPES),
    Register::new("r3", INT_TYPES),
    Register::new("r4", INT_TYPES),
    Register::new("r5", INT_TYPES),
    Register::new("r6", INT_TYPES),
    Register::new("r7", INT_TYPES),
    Register::new("f0", FLOAT_TYPES),
    Register::new("f1", FLOAT_TYPES),
    Register::new("f2", FLOAT_TYPES),
    Register::new("f3", FLOAT_TYPES),
    Register::new("f4", FLOAT_TYPES),
    Register::new("f5", FLOAT_TYPES),
    Register::new("f6", FLOAT_TYPES),
    Register::new("f7", FLOAT_TYPES),
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Operand {
    None,
    Reg(u8),
    Imm(u64),
    /// Position in the op stream.
    Label(usize),
}

#[derive(Debug, Clone)]
struct IOp {
    op: Opcode,
    /// Result type, or the type of the stored value for stores.
    ty: Type,
    arg_tys: [Type; 3],
    args: [Operand; 3],
    result: Option<u8>,
}

struct InterpBlock {
    guest_addr: u32,
    ops: Vec<IOp>,
    locals_size: usize,
    exits: Vec<u32>,
}

pub struct InterpBackend {
    offsets: GuestOffsets,
    registers: Vec<Register>,
    blocks: Vec<Option<InterpBlock>>,
}

impl InterpBackend {
    pub fn new(offsets: GuestOffsets) -> Self {
        Self::with_registers(offsets, INTERP_REGISTERS.to_vec())
    }

    /// Interpreter exposing a custom register set to the allocator.
    pub fn with_registers(offsets: GuestOffsets, registers: Vec<Register>) -> Self {
        Self {
            offsets,
            registers,
            blocks: Vec::new(),
        }
    }

    fn block(&self, code: CodeHandle) -> &InterpBlock {
        match self.blocks.get(code.0).and_then(|b| b.as_ref()) {
            Some(b) => b,
            None => panic!("stale code handle {}", code.0),
        }
    }

    fn operand(ir: &Ir, v: ValueId) -> Result<Operand, BackendError> {
        let value = ir.value(v);
        match value.constant() {
            Some(Constant::Str(_)) => Err(BackendError::Unsupported {
                op: "string operand",
                ty: Type::Str,
            }),
            // Patched once every block has a position.
            Some(Constant::Blk(b)) => Ok(Operand::Label(b.0 as usize)),
            Some(_) => Ok(Operand::Imm(value.bits())),
            None => match value.reg {
                Some(r) => Ok(Operand::Reg(r)),
                None => panic!("value {} reached the backend unallocated", v.0),
            },
        }
    }

    fn lower(ir: &Ir) -> Result<Vec<IOp>, BackendError> {
        let mut ops = Vec::with_capacity(ir.num_instrs());
        let mut block_pos: HashMap<BlockId, usize> = HashMap::new();

        for &block in ir.blocks() {
            block_pos.insert(block, ops.len());
            for instr in ir.block_instrs(block) {
                let i = ir.instr(instr);
                let mut iop = IOp {
                    op: i.op,
                    ty: Type::I64,
                    arg_tys: [Type::I64; 3],
                    args: [Operand::None; 3],
                    result: None,
                };
                for (n, arg) in i.args() {
                    iop.args[n] = Self::operand(ir, arg)?;
                    iop.arg_tys[n] = ir.ty(arg);
                }
                if let Some(result) = i.result {
                    iop.ty = ir.ty(result);
                    iop.result = ir.value(result).reg;
                } else if let Some(stored) = i.arg(1) {
                    iop.ty = ir.ty(stored);
                }
                if iop.ty.is_vector() || iop.arg_tys.iter().any(|t| t.is_vector()) {
                    return Err(BackendError::Unsupported {
                        op: i.op.name(),
                        ty: Type::V128,
                    });
                }
                ops.push(iop);
            }
        }

        for iop in &mut ops {
            for arg in &mut iop.args {
                if let Operand::Label(b) = *arg {
                    *arg = Operand::Label(block_pos[&BlockId(b as u32)]);
                }
            }
        }
        Ok(ops)
    }
}

// -- Evaluation helpers --

fn sext(ty: Type, bits: u64) -> i64 {
    let shift = 64 - ty.size_bits().min(64);
    ((bits << shift) as i64) >> shift
}

fn trunc(ty: Type, bits: u64) -> u64 {
    bits & ty.int_mask()
}

fn to_f64(ty: Type, bits: u64) -> f64 {
    match ty {
        Type::F32 => f32::from_bits(bits as u32) as f64,
        _ => f64::from_bits(bits),
    }
}

fn from_f64(ty: Type, v: f64) -> u64 {
    match ty {
        Type::F32 => (v as f32).to_bits() as u64,
        _ => v.to_bits(),
    }
}

/// Shift by a signed amount, as done by `ashd`/`lshd`.
fn shift_dynamic(a: u32, n: i32, arithmetic: bool) -> u32 {
    if n >= 0 {
        a << (n & 0x1f)
    } else if n & 0x1f == 0 {
        if arithmetic {
            ((a as i32) >> 31) as u32
        } else {
            0
        }
    } else {
        let count = ((!n) & 0x1f) + 1;
        if arithmetic {
            ((a as i32) >> count) as u32
        } else {
            a >> count
        }
    }
}

struct Frame<'a> {
    regs: Vec<u64>,
    locals: Vec<u8>,
    guest: &'a mut dyn Guest,
    offsets: GuestOffsets,
}

impl Frame<'_> {
    fn get(&self, iop: &IOp, n: usize) -> u64 {
        match iop.args[n] {
            Operand::Reg(r) => self.regs[r as usize],
            Operand::Imm(v) => v,
            Operand::None | Operand::Label(_) => 0,
        }
    }

    fn set(&mut self, iop: &IOp, bits: u64) {
        if let Some(r) = iop.result {
            self.regs[r as usize] = if iop.ty.is_int() {
                trunc(iop.ty, bits)
            } else {
                bits
            };
        }
    }

    fn local(&self, offset: u64, size: u32) -> u64 {
        let start = offset as usize;
        let mut raw = [0u8; 8];
        raw[..size as usize].copy_from_slice(&self.locals[start..start + size as usize]);
        u64::from_le_bytes(raw)
    }

    fn set_local(&mut self, offset: u64, size: u32, bits: u64) {
        let start = offset as usize;
        let raw = bits.to_le_bytes();
        self.locals[start..start + size as usize].copy_from_slice(&raw[..size as usize]);
    }

    fn write_pc(&mut self, pc: u32) {
        // SAFETY: offsets come from the guest describing its own context.
        unsafe { ctx_write(self.guest, self.offsets.pc, 4, pc as u64) };
    }
}

/// Evaluate a pure op on raw operand bits.
fn eval(iop: &IOp, a: u64, b: u64, c: u64) -> u64 {
    let ty = iop.ty;
    let aty = iop.arg_tys[0];
    let sa = sext(aty, a);
    let sb = sext(iop.arg_tys[1], b);
    let fa = to_f64(aty, a);
    let fb = to_f64(iop.arg_tys[1], b);

    match iop.op {
        Opcode::Ftoi => (fa as i64) as u64,
        Opcode::Itof => from_f64(ty, sa as f64),
        Opcode::Sext => sa as u64,
        Opcode::Zext | Opcode::Trunc => a,
        Opcode::Fext | Opcode::Ftrunc => from_f64(ty, fa),
        Opcode::Select => {
            if a != 0 {
                b
            } else {
                c
            }
        }
        Opcode::CmpEq => (a == b) as u64,
        Opcode::CmpNe => (a != b) as u64,
        Opcode::CmpSge => (sa >= sb) as u64,
        Opcode::CmpSgt => (sa > sb) as u64,
        Opcode::CmpUge => (a >= b) as u64,
        Opcode::CmpUgt => (a > b) as u64,
        Opcode::CmpSle => (sa <= sb) as u64,
        Opcode::CmpSlt => (sa < sb) as u64,
        Opcode::CmpUle => (a <= b) as u64,
        Opcode::CmpUlt => (a < b) as u64,
        Opcode::FcmpEq => (fa == fb) as u64,
        Opcode::FcmpNe => (fa != fb) as u64,
        Opcode::FcmpGe => (fa >= fb) as u64,
        Opcode::FcmpGt => (fa > fb) as u64,
        Opcode::FcmpLe => (fa <= fb) as u64,
        Opcode::FcmpLt => (fa < fb) as u64,
        Opcode::Add => a.wrapping_add(b),
        Opcode::Sub => a.wrapping_sub(b),
        Opcode::Smul => sa.wrapping_mul(sb) as u64,
        Opcode::Umul => a.wrapping_mul(b),
        Opcode::Div => {
            if sb == 0 {
                0
            } else {
                sa.wrapping_div(sb) as u64
            }
        }
        Opcode::Neg => sa.wrapping_neg() as u64,
        Opcode::Abs => sa.wrapping_abs() as u64,
        Opcode::Fadd => from_f64(ty, fa + fb),
        Opcode::Fsub => from_f64(ty, fa - fb),
        Opcode::Fmul => from_f64(ty, fa * fb),
        Opcode::Fdiv => from_f64(ty, fa / fb),
        Opcode::Fneg => from_f64(ty, -fa),
        Opcode::Fabs => from_f64(ty, fa.abs()),
        Opcode::Sqrt => from_f64(ty, fa.sqrt()),
        Opcode::And => a & b,
        Opcode::Or => a | b,
        Opcode::Xor => a ^ b,
        Opcode::Not => !a,
        Opcode::Shl => a << (b & 63),
        Opcode::Ashr => (sa >> (b & 63)) as u64,
        Opcode::Lshr => a >> (b & 63),
        Opcode::Ashd => shift_dynamic(a as u32, b as i32, true) as u64,
        Opcode::Lshd => shift_dynamic(a as u32, b as i32, false) as u64,
        op => panic!("{} is not a pure op", op.name()),
    }
}

impl Backend for InterpBackend {
    fn name(&self) -> &'static str {
        "interp"
    }

    fn registers(&self) -> &[Register] {
        &self.registers
    }

    fn assemble(&mut self, guest_addr: u32, ir: &Ir) -> Result<CodeHandle, BackendError> {
        let ops = Self::lower(ir)?;
        let block = InterpBlock {
            guest_addr,
            ops,
            locals_size: ir.locals_size() as usize,
            exits: static_exits(ir),
        };
        let slot = self.blocks.iter().position(|b| b.is_none());
        let handle = match slot {
            Some(n) => {
                self.blocks[n] = Some(block);
                n
            }
            None => {
                self.blocks.push(Some(block));
                self.blocks.len() - 1
            }
        };
        Ok(CodeHandle(handle))
    }

    fn execute(&mut self, code: CodeHandle, guest: &mut dyn Guest) -> BlockExit {
        let offsets = self.offsets;
        let nregs = self.registers.len();
        let block = self.block(code);
        let mut f = Frame {
            regs: vec![0; nregs],
            locals: vec![0; block.locals_size],
            guest,
            offsets,
        };

        let mut pc = 0;
        while let Some(iop) = block.ops.get(pc) {
            pc += 1;
            let a = f.get(iop, 0);
            let b = f.get(iop, 1);
            match iop.op {
                Opcode::SourceInfo => {
                    // SAFETY: offsets describe the guest's own context.
                    unsafe {
                        let cycles = ctx_read(f.guest, offsets.cycles, 4) as i32;
                        ctx_write(
                            f.guest,
                            offsets.cycles,
                            4,
                            cycles.wrapping_sub(b as i32) as u32 as u64,
                        );
                        let instrs = ctx_read(f.guest, offsets.instrs, 4) as i32;
                        ctx_write(f.guest, offsets.instrs, 4, instrs.wrapping_add(1) as u32 as u64);
                    }
                }
                Opcode::Fallback => {
                    // SAFETY: frontends only emit addresses of FallbackFn items.
                    let func: FallbackFn = unsafe { std::mem::transmute(a as usize) };
                    let raw = f.get(iop, 2) as u32;
                    func(f.guest, b as u32, raw);
                }
                Opcode::Call => {
                    // SAFETY: `call` is only emitted with CallFn addresses.
                    let func: CallFn = unsafe { std::mem::transmute(a as usize) };
                    let c = f.get(iop, 2);
                    func(f.guest, b, c);
                }
                Opcode::LoadHost => {
                    let ptr = a as usize as *const u8;
                    // SAFETY: host loads are only emitted for live host memory.
                    let bits = unsafe {
                        match iop.ty.size_bytes() {
                            1 => ptr.read() as u64,
                            2 => (ptr as *const u16).read_unaligned() as u64,
                            4 => (ptr as *const u32).read_unaligned() as u64,
                            _ => (ptr as *const u64).read_unaligned(),
                        }
                    };
                    f.set(iop, bits);
                }
                Opcode::StoreHost => {
                    let ptr = a as usize as *mut u8;
                    // SAFETY: as for LoadHost.
                    unsafe {
                        match iop.ty.size_bytes() {
                            1 => ptr.write(b as u8),
                            2 => (ptr as *mut u16).write_unaligned(b as u16),
                            4 => (ptr as *mut u32).write_unaligned(b as u32),
                            _ => (ptr as *mut u64).write_unaligned(b),
                        }
                    }
                }
                Opcode::LoadGuest => {
                    let addr = a as u32;
                    let bits = match iop.ty {
                        Type::I8 => f.guest.r8(addr) as u64,
                        Type::I16 => f.guest.r16(addr) as u64,
                        Type::I32 => f.guest.r32(addr) as u64,
                        _ => f.guest.r64(addr),
                    };
                    f.set(iop, bits);
                }
                Opcode::StoreGuest => {
                    let addr = a as u32;
                    match iop.ty {
                        Type::I8 => f.guest.w8(addr, b as u8),
                        Type::I16 => f.guest.w16(addr, b as u16),
                        Type::I32 => f.guest.w32(addr, b as u32),
                        _ => f.guest.w64(addr, b),
                    }
                }
                Opcode::LoadContext => {
                    // SAFETY: context offsets are produced by the frontend
                    // for its own context layout.
                    let bits = unsafe { ctx_read(f.guest, a as i32, iop.ty.size_bytes()) };
                    f.set(iop, bits);
                }
                Opcode::StoreContext => {
                    // SAFETY: as for LoadContext.
                    unsafe { ctx_write(f.guest, a as i32, iop.ty.size_bytes(), b) };
                }
                Opcode::LoadLocal => {
                    let bits = f.local(a, iop.ty.size_bytes());
                    f.set(iop, bits);
                }
                Opcode::StoreLocal => {
                    f.set_local(a, iop.ty.size_bytes(), b);
                }
                Opcode::Branch | Opcode::BranchTrue | Opcode::BranchFalse => {
                    let (taken, target) = match iop.op {
                        Opcode::Branch => (true, iop.args[0]),
                        Opcode::BranchTrue => (a != 0, iop.args[1]),
                        _ => (a == 0, iop.args[1]),
                    };
                    if !taken {
                        continue;
                    }
                    match target {
                        Operand::Label(pos) => pc = pos,
                        Operand::Imm(addr) => {
                            f.write_pc(addr as u32);
                            return BlockExit::Static(exit_slot(&block.exits, addr as u32));
                        }
                        Operand::Reg(r) => {
                            let addr = f.regs[r as usize] as u32;
                            f.write_pc(addr);
                            return BlockExit::Dynamic;
                        }
                        Operand::None => panic!("branch without a target"),
                    }
                }
                _ => {
                    let c = f.get(iop, 2);
                    let bits = eval(iop, a, b, c);
                    f.set(iop, bits);
                }
            }
        }

        // Ran off the end without branching; resume at the pc as is.
        log::warn!("block 0x{:08x} fell off its end", block.guest_addr);
        BlockExit::Dynamic
    }

    fn free(&mut self, code: CodeHandle) {
        if let Some(slot) = self.blocks.get_mut(code.0) {
            *slot = None;
        }
    }

    fn reset(&mut self) {
        self.blocks.clear();
    }

    fn code_addr(&self, code: CodeHandle) -> usize {
        self.block(code).ops.as_ptr() as usize
    }

    fn code_size(&self, code: CodeHandle) -> usize {
        self.block(code).ops.len() * std::mem::size_of::<IOp>()
    }

    fn dump_code(&self, code: CodeHandle, w: &mut dyn Write) -> std::io::Result<()> {
        let block = self.block(code);
        for (n, iop) in block.ops.iter().enumerate() {
            write!(w, "{n:4}: ")?;
            if let Some(r) = iop.result {
                write!(w, "{} = ", self.registers[r as usize].name)?;
            }
            write!(w, "{}.{}", iop.op.name(), iop.ty)?;
            for arg in iop.args.iter() {
                match *arg {
                    Operand::None => {}
                    Operand::Reg(r) => write!(w, " {}", self.registers[r as usize].name)?,
                    Operand::Imm(v) => write!(w, " 0x{v:x}")?,
                    Operand::Label(pos) => write!(w, " @{pos}")?,
                }
            }
            writeln!(w)?;
        }
        Ok(())
    }
}
