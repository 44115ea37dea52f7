#![allow(non_upper_case_globals)]

use crate::code_buffer::CodeBuffer;
use crate::x86_64::regs::{Reg, Xmm};

// -- Prefix flags --

pub const P_EXT: u32 = 0x100; // 0x0F prefix
pub const P_DATA16: u32 = 0x400; // 0x66 prefix
pub const P_REXW: u32 = 0x1000; // REX.W = 1
pub const P_REXB_R: u32 = 0x2000; // REG field as byte register
pub const P_REXB_RM: u32 = 0x4000; // R/M field as byte register
pub const P_SIMDF3: u32 = 0x20000; // 0xF3 prefix
pub const P_SIMDF2: u32 = 0x40000; // 0xF2 prefix

// -- Opcode constants (OPC_*) --

// Arithmetic
pub const OPC_ARITH_EvIb: u32 = 0x83;
pub const OPC_ARITH_EvIz: u32 = 0x81;
pub const OPC_ARITH_GvEv: u32 = 0x03;

// Shift
pub const OPC_SHIFT_1: u32 = 0xD1;
pub const OPC_SHIFT_Ib: u32 = 0xC1;
pub const OPC_SHIFT_cl: u32 = 0xD3;

// Data movement
pub const OPC_MOVB_EvGv: u32 = 0x88;
pub const OPC_MOVL_EvGv: u32 = 0x89;
pub const OPC_MOVL_GvEv: u32 = 0x8B;
pub const OPC_MOVL_EvIz: u32 = 0xC7;
pub const OPC_MOVL_Iv: u32 = 0xB8;

// Extensions
pub const OPC_MOVZBL: u32 = 0xB6 | P_EXT;
pub const OPC_MOVZWL: u32 = 0xB7 | P_EXT;
pub const OPC_MOVSBQ: u32 = 0xBE | P_EXT | P_REXW;
pub const OPC_MOVSWQ: u32 = 0xBF | P_EXT | P_REXW;
pub const OPC_MOVSLQ: u32 = 0x63 | P_REXW;

// Branch
pub const OPC_JCC_long: u32 = 0x80 | P_EXT;
pub const OPC_JMP_long: u32 = 0xE9;

// Compare / conditional
pub const OPC_CMOVCC: u32 = 0x40 | P_EXT;
pub const OPC_SETCC: u32 = 0x90 | P_EXT | P_REXB_RM;
pub const OPC_TESTL: u32 = 0x85;

// Group opcodes
pub const OPC_GRP3_Ev: u32 = 0xF7;
pub const OPC_GRP5: u32 = 0xFF;

// Multiply
pub const OPC_IMUL_GvEv: u32 = 0xAF | P_EXT;

// Misc
pub const OPC_PUSH_r32: u32 = 0x50;
pub const OPC_POP_r32: u32 = 0x58;
pub const OPC_RET: u32 = 0xC3;

// SSE
pub const OPC_MOVSS_VxWx: u32 = 0x10 | P_EXT | P_SIMDF3;
pub const OPC_MOVSD_VxWx: u32 = 0x10 | P_EXT | P_SIMDF2;
pub const OPC_MOVSS_WxVx: u32 = 0x11 | P_EXT | P_SIMDF3;
pub const OPC_MOVSD_WxVx: u32 = 0x11 | P_EXT | P_SIMDF2;
pub const OPC_MOVAPS: u32 = 0x28 | P_EXT;
pub const OPC_MOVQ_VqEq: u32 = 0x6E | P_EXT | P_DATA16 | P_REXW;
pub const OPC_MOVQ_EqVq: u32 = 0x7E | P_EXT | P_DATA16 | P_REXW;
pub const OPC_CVTSI2SS: u32 = 0x2A | P_EXT | P_SIMDF3 | P_REXW;
pub const OPC_CVTSI2SD: u32 = 0x2A | P_EXT | P_SIMDF2 | P_REXW;
pub const OPC_CVTTSS2SI: u32 = 0x2C | P_EXT | P_SIMDF3 | P_REXW;
pub const OPC_CVTTSD2SI: u32 = 0x2C | P_EXT | P_SIMDF2 | P_REXW;
pub const OPC_CVTSS2SD: u32 = 0x5A | P_EXT | P_SIMDF3;
pub const OPC_CVTSD2SS: u32 = 0x5A | P_EXT | P_SIMDF2;
pub const OPC_UCOMISS: u32 = 0x2E | P_EXT;
pub const OPC_UCOMISD: u32 = 0x2E | P_EXT | P_DATA16;

/// Scalar SSE arithmetic, combined with [`sse_scalar`] to pick the
/// single or double precision form.
pub const OPC_SQRT: u32 = 0x51 | P_EXT;
pub const OPC_ADD: u32 = 0x58 | P_EXT;
pub const OPC_MUL: u32 = 0x59 | P_EXT;
pub const OPC_SUB: u32 = 0x5C | P_EXT;
pub const OPC_DIV: u32 = 0x5E | P_EXT;

/// Mandatory prefix selecting `ss` (f32) or `sd` (f64) forms.
pub const fn sse_scalar(double: bool) -> u32 {
    if double {
        P_SIMDF2
    } else {
        P_SIMDF3
    }
}

// -- Sub-operation enums --

/// Arithmetic sub-opcodes (used in /r field of 0x81/0x83 and shifted into GvEv).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// Shift sub-opcodes (used in /r field of 0xC1/0xD1/0xD3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// Group 3 extension codes (used in /r field of 0xF7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ext3Op {
    Not = 2,
    Neg = 3,
    Idiv = 7,
}

/// x86 condition codes for Jcc/SETcc/CMOVcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum X86Cond {
    Jb = 0x2,
    Jae = 0x3,
    Je = 0x4,
    Jne = 0x5,
    Jbe = 0x6,
    Ja = 0x7,
    Js = 0x8,
    Jns = 0x9,
    Jp = 0xA,
    Jnp = 0xB,
    Jl = 0xC,
    Jge = 0xD,
    Jle = 0xE,
    Jg = 0xF,
}

impl X86Cond {
    /// Return the inverted condition.
    pub fn invert(self) -> Self {
        match self {
            X86Cond::Jb => X86Cond::Jae,
            X86Cond::Jae => X86Cond::Jb,
            X86Cond::Je => X86Cond::Jne,
            X86Cond::Jne => X86Cond::Je,
            X86Cond::Jbe => X86Cond::Ja,
            X86Cond::Ja => X86Cond::Jbe,
            X86Cond::Js => X86Cond::Jns,
            X86Cond::Jns => X86Cond::Js,
            X86Cond::Jp => X86Cond::Jnp,
            X86Cond::Jnp => X86Cond::Jp,
            X86Cond::Jl => X86Cond::Jge,
            X86Cond::Jge => X86Cond::Jl,
            X86Cond::Jle => X86Cond::Jg,
            X86Cond::Jg => X86Cond::Jle,
        }
    }
}

// -- Core encoding functions --

#[inline]
fn rexw_flag(rexw: bool) -> u32 {
    if rexw {
        P_REXW
    } else {
        0
    }
}

/// Emit opcode with prefixes and REX. `r` is the reg field, `rm` is
/// the r/m field, both raw register numbers (0-15).
pub fn emit_opc(buf: &mut CodeBuffer, opc: u32, r: u8, rm: u8) {
    let mut rex: u8 = 0;
    if opc & P_REXW != 0 {
        rex |= 0x08; // REX.W
    }
    if r >= 8 {
        rex |= 0x04; // REX.R
    }
    if rm >= 8 {
        rex |= 0x01; // REX.B
    }
    // SPL/BPL/SIL/DIL are only reachable with a REX prefix present.
    if opc & P_REXB_R != 0 && r >= 4 && rex == 0 {
        rex = 0x40;
    }
    if opc & P_REXB_RM != 0 && rm >= 4 && rex == 0 {
        rex = 0x40;
    }

    // Mandatory prefixes go before REX.
    if opc & P_DATA16 != 0 {
        buf.emit_u8(0x66);
    }
    if opc & P_SIMDF3 != 0 {
        buf.emit_u8(0xF3);
    } else if opc & P_SIMDF2 != 0 {
        buf.emit_u8(0xF2);
    }
    if rex != 0 {
        buf.emit_u8(0x40 | rex);
    }
    if opc & P_EXT != 0 {
        buf.emit_u8(0x0F);
    }
    buf.emit_u8(opc as u8);
}

/// Emit opcode + register-direct ModR/M from raw register numbers.
pub fn emit_modrm_raw(buf: &mut CodeBuffer, opc: u32, r: u8, rm: u8) {
    emit_opc(buf, opc, r, rm);
    buf.emit_u8(0xC0 | ((r & 7) << 3) | (rm & 7));
}

/// Emit opcode + ModR/M for register-register operation.
pub fn emit_modrm(buf: &mut CodeBuffer, opc: u32, r: Reg, rm: Reg) {
    emit_modrm_raw(buf, opc, r as u8, rm as u8);
}

/// Emit opcode + ModR/M with /r extension (for group opcodes).
pub fn emit_modrm_ext(buf: &mut CodeBuffer, opc: u32, ext: u8, rm: Reg) {
    emit_opc(buf, opc, ext, rm as u8);
    buf.emit_u8(0xC0 | (ext << 3) | rm.low3());
}

/// Emit opcode + ModR/M + displacement for memory `[base + offset]`.
/// `r` is a raw reg field: a register number or a /r extension.
/// RBP/R13 need an explicit displacement, RSP/R12 need a SIB byte.
pub fn emit_modrm_offset_raw(buf: &mut CodeBuffer, opc: u32, r: u8, base: Reg, offset: i32) {
    emit_opc(buf, opc, r, base as u8);

    let r3 = r & 7;
    let b3 = base.low3();
    let mode: u8 = if offset == 0 && b3 != 5 {
        0x00
    } else if (-128..=127).contains(&offset) {
        0x40
    } else {
        0x80
    };

    buf.emit_u8(mode | (r3 << 3) | b3);
    if b3 == 4 {
        buf.emit_u8(0x24); // SIB: no index, base=RSP/R12
    }
    match mode {
        0x00 => {}
        0x40 => buf.emit_u8(offset as u8),
        _ => buf.emit_u32(offset as u32),
    }
}

pub fn emit_modrm_offset(buf: &mut CodeBuffer, opc: u32, r: Reg, base: Reg, offset: i32) {
    emit_modrm_offset_raw(buf, opc, r as u8, base, offset);
}

// -- Arithmetic instructions --

/// Emit arithmetic reg, reg (ADD/SUB/AND/OR/XOR/CMP).
pub fn emit_arith_rr(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, dst: Reg, src: Reg) {
    let opc = (OPC_ARITH_GvEv + ((op as u32) << 3)) | rexw_flag(rexw);
    emit_modrm(buf, opc, dst, src);
}

/// Emit arithmetic reg, imm (auto-selects imm8 vs imm32).
pub fn emit_arith_ri(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, dst: Reg, imm: i32) {
    let w = rexw_flag(rexw);
    if (-128..=127).contains(&imm) {
        emit_modrm_ext(buf, OPC_ARITH_EvIb | w, op as u8, dst);
        buf.emit_u8(imm as u8);
    } else {
        emit_modrm_ext(buf, OPC_ARITH_EvIz | w, op as u8, dst);
        buf.emit_u32(imm as u32);
    }
}

/// Emit arithmetic dword [base+offset], imm32.
pub fn emit_arith_mi(buf: &mut CodeBuffer, op: ArithOp, base: Reg, offset: i32, imm: i32) {
    emit_modrm_offset_raw(buf, OPC_ARITH_EvIz, op as u8, base, offset);
    buf.emit_u32(imm as u32);
}

/// Emit NEG reg.
pub fn emit_neg(buf: &mut CodeBuffer, rexw: bool, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP3_Ev | rexw_flag(rexw), Ext3Op::Neg as u8, reg);
}

/// Emit NOT reg.
pub fn emit_not(buf: &mut CodeBuffer, rexw: bool, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP3_Ev | rexw_flag(rexw), Ext3Op::Not as u8, reg);
}

// -- Shift instructions --

/// Emit shift reg, imm8.
pub fn emit_shift_ri(buf: &mut CodeBuffer, op: ShiftOp, rexw: bool, dst: Reg, imm: u8) {
    let w = rexw_flag(rexw);
    if imm == 1 {
        emit_modrm_ext(buf, OPC_SHIFT_1 | w, op as u8, dst);
    } else {
        emit_modrm_ext(buf, OPC_SHIFT_Ib | w, op as u8, dst);
        buf.emit_u8(imm);
    }
}

/// Emit shift reg, CL.
pub fn emit_shift_cl(buf: &mut CodeBuffer, op: ShiftOp, rexw: bool, dst: Reg) {
    emit_modrm_ext(buf, OPC_SHIFT_cl | rexw_flag(rexw), op as u8, dst);
}

// -- Data movement --

/// Emit MOV reg, reg (32-bit or 64-bit).
pub fn emit_mov_rr(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_MOVL_EvGv | rexw_flag(rexw), src, dst);
}

/// Emit MOV reg, imm64 using the shortest encoding. Never touches
/// flags, so it is safe between a compare and its consumer.
pub fn emit_mov_ri(buf: &mut CodeBuffer, reg: Reg, val: u64) {
    if val <= u32::MAX as u64 {
        emit_opc(buf, OPC_MOVL_Iv + (reg.low3() as u32), 0, reg as u8);
        buf.emit_u32(val as u32);
    } else if val as i64 >= i32::MIN as i64 && val as i64 <= i32::MAX as i64 {
        emit_modrm_ext(buf, OPC_MOVL_EvIz | P_REXW, 0, reg);
        buf.emit_u32(val as u32);
    } else {
        emit_opc(
            buf,
            (OPC_MOVL_Iv + (reg.low3() as u32)) | P_REXW,
            0,
            reg as u8,
        );
        buf.emit_u64(val);
    }
}

/// Emit a register-to-register extension (MOVZBL, MOVSLQ, ...).
pub fn emit_movx(buf: &mut CodeBuffer, opc: u32, dst: Reg, src: Reg) {
    emit_modrm(buf, opc, dst, src);
}

// -- Memory operations --

/// Emit MOV reg, [base+offset] (load).
pub fn emit_load(buf: &mut CodeBuffer, rexw: bool, dst: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, OPC_MOVL_GvEv | rexw_flag(rexw), dst, base, offset);
}

/// Emit zero-extending load of `size` bytes into `dst`.
pub fn emit_load_zx(buf: &mut CodeBuffer, size: u32, dst: Reg, base: Reg, offset: i32) {
    match size {
        1 => emit_modrm_offset(buf, OPC_MOVZBL, dst, base, offset),
        2 => emit_modrm_offset(buf, OPC_MOVZWL, dst, base, offset),
        4 => emit_load(buf, false, dst, base, offset),
        _ => emit_load(buf, true, dst, base, offset),
    }
}

/// Emit store of the low `size` bytes of `src`.
pub fn emit_store_sized(buf: &mut CodeBuffer, size: u32, src: Reg, base: Reg, offset: i32) {
    match size {
        1 => emit_modrm_offset(buf, OPC_MOVB_EvGv | P_REXB_R, src, base, offset),
        2 => emit_modrm_offset(buf, OPC_MOVL_EvGv | P_DATA16, src, base, offset),
        4 => emit_modrm_offset(buf, OPC_MOVL_EvGv, src, base, offset),
        _ => emit_modrm_offset(buf, OPC_MOVL_EvGv | P_REXW, src, base, offset),
    }
}

/// Emit MOV dword [base+offset], imm32.
pub fn emit_store_imm(buf: &mut CodeBuffer, base: Reg, offset: i32, imm: i32) {
    emit_modrm_offset_raw(buf, OPC_MOVL_EvIz, 0, base, offset);
    buf.emit_u32(imm as u32);
}

// -- Multiply / Divide --

/// Emit two-operand IMUL: dst = dst * src.
pub fn emit_imul_rr(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_IMUL_GvEv | rexw_flag(rexw), dst, src);
}

/// Emit IDIV (signed): RAX = RDX:RAX / reg, RDX = remainder.
pub fn emit_idiv(buf: &mut CodeBuffer, rexw: bool, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP3_Ev | rexw_flag(rexw), Ext3Op::Idiv as u8, reg);
}

/// Emit CQO: sign-extend RAX into RDX:RAX.
pub fn emit_cqo(buf: &mut CodeBuffer) {
    buf.emit_u8(0x48);
    buf.emit_u8(0x99);
}

// -- Branches and comparisons --

/// Emit Jcc rel32 to a not yet known target. Returns the offset of
/// the displacement for [`bind`].
pub fn emit_jcc_fwd(buf: &mut CodeBuffer, cond: X86Cond) -> usize {
    emit_opc(buf, OPC_JCC_long + (cond as u32), 0, 0);
    let site = buf.offset();
    buf.emit_u32(0);
    site
}

/// Emit JMP rel32 to a not yet known target.
pub fn emit_jmp_fwd(buf: &mut CodeBuffer) -> usize {
    buf.emit_u8(OPC_JMP_long as u8);
    let site = buf.offset();
    buf.emit_u32(0);
    site
}

/// Point the rel32 at `site` to `target`.
pub fn patch_rel32(buf: &mut CodeBuffer, site: usize, target: usize) {
    let disp = target as i64 - (site as i64 + 4);
    assert!(
        (i32::MIN as i64..=i32::MAX as i64).contains(&disp),
        "jump displacement out of i32 range"
    );
    buf.patch_u32(site, disp as u32);
}

/// Point the rel32 at `site` to the current offset.
pub fn bind(buf: &mut CodeBuffer, site: usize) {
    let here = buf.offset();
    patch_rel32(buf, site, here);
}

/// Emit CALL *reg.
pub fn emit_call_reg(buf: &mut CodeBuffer, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP5, 2, reg);
}

/// Emit SETcc dst (set byte on condition).
pub fn emit_setcc(buf: &mut CodeBuffer, cond: X86Cond, dst: Reg) {
    emit_modrm_ext(buf, OPC_SETCC + (cond as u32), 0, dst);
}

/// Emit CMOVcc dst, src (conditional move).
pub fn emit_cmovcc(buf: &mut CodeBuffer, cond: X86Cond, rexw: bool, dst: Reg, src: Reg) {
    emit_modrm(
        buf,
        (OPC_CMOVCC + (cond as u32)) | rexw_flag(rexw),
        dst,
        src,
    );
}

/// Emit TEST reg, reg.
pub fn emit_test_rr(buf: &mut CodeBuffer, rexw: bool, r1: Reg, r2: Reg) {
    emit_modrm(buf, OPC_TESTL | rexw_flag(rexw), r2, r1);
}

// -- Stack --

/// Emit PUSH reg.
pub fn emit_push(buf: &mut CodeBuffer, reg: Reg) {
    emit_opc(buf, OPC_PUSH_r32 + (reg.low3() as u32), 0, reg as u8);
}

/// Emit POP reg.
pub fn emit_pop(buf: &mut CodeBuffer, reg: Reg) {
    emit_opc(buf, OPC_POP_r32 + (reg.low3() as u32), 0, reg as u8);
}

/// Emit RET.
pub fn emit_ret(buf: &mut CodeBuffer) {
    buf.emit_u8(OPC_RET as u8);
}

// -- SSE --

/// Emit an SSE op between two XMM registers.
pub fn emit_sse_rr(buf: &mut CodeBuffer, opc: u32, dst: Xmm, src: Xmm) {
    emit_modrm_raw(buf, opc, dst.0, src.0);
}

/// Emit an SSE load/store between an XMM register and `[base+offset]`.
pub fn emit_sse_mem(buf: &mut CodeBuffer, opc: u32, xmm: Xmm, base: Reg, offset: i32) {
    emit_modrm_offset_raw(buf, opc, xmm.0, base, offset);
}

/// Emit MOVQ xmm, r64.
pub fn emit_movq_xr(buf: &mut CodeBuffer, dst: Xmm, src: Reg) {
    emit_modrm_raw(buf, OPC_MOVQ_VqEq, dst.0, src as u8);
}

/// Emit MOVQ r64, xmm.
pub fn emit_movq_rx(buf: &mut CodeBuffer, dst: Reg, src: Xmm) {
    emit_modrm_raw(buf, OPC_MOVQ_EqVq, src.0, dst as u8);
}

/// Emit CVTSI2SS/CVTSI2SD xmm, r64.
pub fn emit_cvtsi2f(buf: &mut CodeBuffer, double: bool, dst: Xmm, src: Reg) {
    let opc = if double { OPC_CVTSI2SD } else { OPC_CVTSI2SS };
    emit_modrm_raw(buf, opc, dst.0, src as u8);
}

/// Emit CVTTSS2SI/CVTTSD2SI r64, xmm.
pub fn emit_cvttf2si(buf: &mut CodeBuffer, double: bool, dst: Reg, src: Xmm) {
    let opc = if double { OPC_CVTTSD2SI } else { OPC_CVTTSS2SI };
    emit_modrm_raw(buf, opc, dst as u8, src.0);
}
