//! SH4 instruction translation: IR generation.
//!
//! Repetitive translation logic is factored into `gen_*` helpers,
//! parameterised by a [`BinOp`] or [`CmpOp`] builder method.

use jit_core::{Guest, Ir, Type, ValueId};

use super::context::{
    gpr_offset, sh4_ctx, FPSCR_OFFSET, PR_OFFSET, SR_OFFSET, SR_T,
};
use super::opdefs::{cond_target, disp8, pc_rel_addr, rm, rn, simm8, uncond_target};
use crate::DisasContext;

/// Binary IR operation: `fn(ir, lhs, rhs) -> result`.
type BinOp = fn(&mut Ir, ValueId, ValueId) -> ValueId;
/// Comparison producing an `i8` truth value.
type CmpOp = fn(&mut Ir, ValueId, ValueId) -> ValueId;

/// Usable FPSCR bits.
const FPSCR_MASK: i32 = 0x003f_ffff;

// ── Context access ─────────────────────────────────────────────

fn load_gpr(ir: &mut Ir, n: usize) -> ValueId {
    ir.load_context(gpr_offset(n), Type::I32)
}

fn store_gpr(ir: &mut Ir, n: usize, v: ValueId) {
    assert_eq!(ir.ty(v), Type::I32, "sh4 registers are i32");
    ir.store_context(gpr_offset(n), v);
}

fn load_sr(ir: &mut Ir) -> ValueId {
    ir.load_context(SR_OFFSET, Type::I32)
}

fn load_t(ir: &mut Ir) -> ValueId {
    let sr = load_sr(ir);
    let mask = ir.alloc_i32(SR_T as i32);
    ir.and(sr, mask)
}

/// Set SR.T from an integer truth value (0 or 1). Only T changes, so
/// the register banks need no reconciling.
fn store_t(ir: &mut Ir, v: ValueId) {
    let t = match ir.ty(v) {
        Type::I32 => v,
        _ => ir.zext(v, Type::I32),
    };
    let sr = load_sr(ir);
    let mask = ir.alloc_i32(!SR_T as i32);
    let cleared = ir.and(sr, mask);
    let sr = ir.or(cleared, t);
    ir.store_context(SR_OFFSET, sr);
}

/// Full SR write; the host swaps register banks if RB flipped.
fn store_sr(ir: &mut Ir, v: ValueId) {
    let old = load_sr(ir);
    ir.store_context(SR_OFFSET, v);
    let old = ir.zext(old, Type::I64);
    ir.call(sr_updated as usize, Some(old), None);
}

fn store_fpscr(ir: &mut Ir, v: ValueId) {
    let old = ir.load_context(FPSCR_OFFSET, Type::I32);
    let mask = ir.alloc_i32(FPSCR_MASK);
    let v = ir.and(v, mask);
    ir.store_context(FPSCR_OFFSET, v);
    let old = ir.zext(old, Type::I64);
    ir.call(fpscr_updated as usize, Some(old), None);
}

fn sr_updated(guest: &mut dyn Guest, old: u64, _: u64) {
    sh4_ctx(guest).sr_updated(old as u32);
}

fn fpscr_updated(guest: &mut dyn Guest, old: u64, _: u64) {
    sh4_ctx(guest).fpscr_updated(old as u32);
}

// ── Helpers ────────────────────────────────────────────────────

impl DisasContext<'_> {
    /// `Rn = op(Rn, Rm)`.
    fn gen_arith(&mut self, raw: u32, op: BinOp) {
        let a = load_gpr(self.ir, rn(raw));
        let b = load_gpr(self.ir, rm(raw));
        let r = op(self.ir, a, b);
        store_gpr(self.ir, rn(raw), r);
    }

    /// `T = op(Rn, Rm)`.
    fn gen_cmp(&mut self, raw: u32, op: CmpOp) {
        let a = load_gpr(self.ir, rn(raw));
        let b = load_gpr(self.ir, rm(raw));
        let t = op(self.ir, a, b);
        store_t(self.ir, t);
    }

    /// `Rn = ext(trunc(Rm, ty))`.
    fn gen_ext(&mut self, raw: u32, ty: Type, signed: bool) {
        let v = load_gpr(self.ir, rm(raw));
        let v = self.ir.trunc(v, ty);
        let v = if signed {
            self.ir.sext(v, Type::I32)
        } else {
            self.ir.zext(v, Type::I32)
        };
        store_gpr(self.ir, rn(raw), v);
    }

    /// `Rn = sext(@Rm)`.
    fn gen_load(&mut self, raw: u32, ty: Type) {
        let addr = load_gpr(self.ir, rm(raw));
        let v = self.load_mem(addr, ty);
        let v = match ty {
            Type::I32 => v,
            _ => self.ir.sext(v, Type::I32),
        };
        store_gpr(self.ir, rn(raw), v);
    }

    /// `@Rn = trunc(Rm)`.
    fn gen_store(&mut self, raw: u32, ty: Type) {
        let addr = load_gpr(self.ir, rn(raw));
        let v = load_gpr(self.ir, rm(raw));
        let v = match ty {
            Type::I32 => v,
            _ => self.ir.trunc(v, ty),
        };
        self.store_mem(addr, v);
    }

    /// Conditional branch on T. Delayed forms read T before the slot.
    fn gen_cond_branch(&mut self, raw: u32, taken_if: bool, delayed: bool) {
        let cond = load_t(self.ir);
        if delayed {
            self.mark_delay_slot();
        }
        let dst = self.ir.alloc_i32(cond_target(self.addr, raw) as i32);
        if taken_if {
            self.ir.branch_true(cond, dst);
        } else {
            self.ir.branch_false(cond, dst);
        }
    }

    /// Delayed jump to `dst`, optionally linking through PR. The slot
    /// sees the old PR.
    fn gen_jump(&mut self, dst: ValueId, link: bool) {
        self.mark_delay_slot();
        if link {
            let ret = self.ir.alloc_i32(self.addr.wrapping_add(4) as i32);
            self.ir.store_context(PR_OFFSET, ret);
        }
        self.ir.branch(dst);
    }

    /// `Rn + addr + 4`, the target of the far branches.
    fn gen_far_target(&mut self, raw: u32) -> ValueId {
        let r = load_gpr(self.ir, rn(raw));
        let base = self.ir.alloc_i32(self.addr.wrapping_add(4) as i32);
        self.ir.add(r, base)
    }
}

// ── Data transfer ──────────────────────────────────────────────

pub(super) fn trans_nop(_ctx: &mut DisasContext<'_>, _raw: u32) {}

pub(super) fn trans_mov_imm(ctx: &mut DisasContext<'_>, raw: u32) {
    let v = ctx.ir.alloc_i32(simm8(raw));
    store_gpr(ctx.ir, rn(raw), v);
}

pub(super) fn trans_mov(ctx: &mut DisasContext<'_>, raw: u32) {
    let v = load_gpr(ctx.ir, rm(raw));
    store_gpr(ctx.ir, rn(raw), v);
}

pub(super) fn trans_movb_load(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_load(raw, Type::I8);
}

pub(super) fn trans_movw_load(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_load(raw, Type::I16);
}

pub(super) fn trans_movl_load(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_load(raw, Type::I32);
}

pub(super) fn trans_movb_store(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_store(raw, Type::I8);
}

pub(super) fn trans_movw_store(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_store(raw, Type::I16);
}

pub(super) fn trans_movl_store(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_store(raw, Type::I32);
}

/// MOV.L @(disp,PC),Rn
pub(super) fn trans_movl_pcrel(ctx: &mut DisasContext<'_>, raw: u32) {
    let addr = ctx.ir.alloc_i32(pc_rel_addr(ctx.addr, disp8(raw)) as i32);
    let v = ctx.load_mem(addr, Type::I32);
    store_gpr(ctx.ir, rn(raw), v);
}

/// MOVA @(disp,PC),R0
pub(super) fn trans_mova(ctx: &mut DisasContext<'_>, raw: u32) {
    let v = ctx.ir.alloc_i32(pc_rel_addr(ctx.addr, disp8(raw)) as i32);
    store_gpr(ctx.ir, 0, v);
}

pub(super) fn trans_movt(ctx: &mut DisasContext<'_>, raw: u32) {
    let t = load_t(ctx.ir);
    store_gpr(ctx.ir, rn(raw), t);
}

pub(super) fn trans_extsb(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_ext(raw, Type::I8, true);
}

pub(super) fn trans_extsw(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_ext(raw, Type::I16, true);
}

pub(super) fn trans_extub(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_ext(raw, Type::I8, false);
}

pub(super) fn trans_extuw(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_ext(raw, Type::I16, false);
}

// ── Arithmetic / logic ─────────────────────────────────────────

pub(super) fn trans_add(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_arith(raw, Ir::add);
}

pub(super) fn trans_add_imm(ctx: &mut DisasContext<'_>, raw: u32) {
    let a = load_gpr(ctx.ir, rn(raw));
    let imm = ctx.ir.alloc_i32(simm8(raw));
    let r = ctx.ir.add(a, imm);
    store_gpr(ctx.ir, rn(raw), r);
}

pub(super) fn trans_sub(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_arith(raw, Ir::sub);
}

pub(super) fn trans_and(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_arith(raw, Ir::and);
}

pub(super) fn trans_or(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_arith(raw, Ir::or);
}

pub(super) fn trans_xor(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_arith(raw, Ir::xor);
}

pub(super) fn trans_not(ctx: &mut DisasContext<'_>, raw: u32) {
    let v = load_gpr(ctx.ir, rm(raw));
    let r = ctx.ir.not(v);
    store_gpr(ctx.ir, rn(raw), r);
}

pub(super) fn trans_dt(ctx: &mut DisasContext<'_>, raw: u32) {
    let v = load_gpr(ctx.ir, rn(raw));
    let one = ctx.ir.alloc_i32(1);
    let r = ctx.ir.sub(v, one);
    store_gpr(ctx.ir, rn(raw), r);
    let zero = ctx.ir.alloc_i32(0);
    let t = ctx.ir.cmp_eq(r, zero);
    store_t(ctx.ir, t);
}

pub(super) fn trans_shll(ctx: &mut DisasContext<'_>, raw: u32) {
    let v = load_gpr(ctx.ir, rn(raw));
    let t = ctx.ir.lshri(v, 31);
    store_t(ctx.ir, t);
    let r = ctx.ir.shli(v, 1);
    store_gpr(ctx.ir, rn(raw), r);
}

pub(super) fn trans_shlr(ctx: &mut DisasContext<'_>, raw: u32) {
    let v = load_gpr(ctx.ir, rn(raw));
    let one = ctx.ir.alloc_i32(1);
    let t = ctx.ir.and(v, one);
    store_t(ctx.ir, t);
    let r = ctx.ir.lshri(v, 1);
    store_gpr(ctx.ir, rn(raw), r);
}

pub(super) fn trans_shad(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_arith(raw, Ir::ashd);
}

pub(super) fn trans_shld(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_arith(raw, Ir::lshd);
}

// ── Compare ────────────────────────────────────────────────────

pub(super) fn trans_cmp_eq(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_cmp(raw, Ir::cmp_eq);
}

pub(super) fn trans_cmp_hs(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_cmp(raw, Ir::cmp_uge);
}

pub(super) fn trans_cmp_ge(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_cmp(raw, Ir::cmp_sge);
}

pub(super) fn trans_cmp_hi(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_cmp(raw, Ir::cmp_ugt);
}

pub(super) fn trans_cmp_gt(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_cmp(raw, Ir::cmp_sgt);
}

/// CMP/EQ #imm,R0
pub(super) fn trans_cmp_eq_imm(ctx: &mut DisasContext<'_>, raw: u32) {
    let r0 = load_gpr(ctx.ir, 0);
    let imm = ctx.ir.alloc_i32(simm8(raw));
    let t = ctx.ir.cmp_eq(r0, imm);
    store_t(ctx.ir, t);
}

pub(super) fn trans_tst(ctx: &mut DisasContext<'_>, raw: u32) {
    let a = load_gpr(ctx.ir, rn(raw));
    let b = load_gpr(ctx.ir, rm(raw));
    let v = ctx.ir.and(a, b);
    let zero = ctx.ir.alloc_i32(0);
    let t = ctx.ir.cmp_eq(v, zero);
    store_t(ctx.ir, t);
}

pub(super) fn trans_clrt(ctx: &mut DisasContext<'_>, _raw: u32) {
    let t = ctx.ir.alloc_i32(0);
    store_t(ctx.ir, t);
}

pub(super) fn trans_sett(ctx: &mut DisasContext<'_>, _raw: u32) {
    let t = ctx.ir.alloc_i32(1);
    store_t(ctx.ir, t);
}

// ── Branch ─────────────────────────────────────────────────────

pub(super) fn trans_bt(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_cond_branch(raw, true, false);
}

pub(super) fn trans_bf(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_cond_branch(raw, false, false);
}

pub(super) fn trans_bts(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_cond_branch(raw, true, true);
}

pub(super) fn trans_bfs(ctx: &mut DisasContext<'_>, raw: u32) {
    ctx.gen_cond_branch(raw, false, true);
}

pub(super) fn trans_bra(ctx: &mut DisasContext<'_>, raw: u32) {
    let dst = ctx.ir.alloc_i32(uncond_target(ctx.addr, raw) as i32);
    ctx.gen_jump(dst, false);
}

pub(super) fn trans_bsr(ctx: &mut DisasContext<'_>, raw: u32) {
    let dst = ctx.ir.alloc_i32(uncond_target(ctx.addr, raw) as i32);
    ctx.gen_jump(dst, true);
}

pub(super) fn trans_braf(ctx: &mut DisasContext<'_>, raw: u32) {
    let dst = ctx.gen_far_target(raw);
    ctx.gen_jump(dst, false);
}

pub(super) fn trans_bsrf(ctx: &mut DisasContext<'_>, raw: u32) {
    let dst = ctx.gen_far_target(raw);
    ctx.gen_jump(dst, true);
}

pub(super) fn trans_jmp(ctx: &mut DisasContext<'_>, raw: u32) {
    let dst = load_gpr(ctx.ir, rn(raw));
    ctx.gen_jump(dst, false);
}

pub(super) fn trans_jsr(ctx: &mut DisasContext<'_>, raw: u32) {
    let dst = load_gpr(ctx.ir, rn(raw));
    ctx.gen_jump(dst, true);
}

pub(super) fn trans_rts(ctx: &mut DisasContext<'_>, _raw: u32) {
    let dst = ctx.ir.load_context(PR_OFFSET, Type::I32);
    ctx.gen_jump(dst, false);
}

// ── System ─────────────────────────────────────────────────────

pub(super) fn trans_ldc_sr(ctx: &mut DisasContext<'_>, raw: u32) {
    let v = load_gpr(ctx.ir, rn(raw));
    store_sr(ctx.ir, v);
}

pub(super) fn trans_stc_sr(ctx: &mut DisasContext<'_>, raw: u32) {
    let v = load_sr(ctx.ir);
    store_gpr(ctx.ir, rn(raw), v);
}

pub(super) fn trans_lds_fpscr(ctx: &mut DisasContext<'_>, raw: u32) {
    let v = load_gpr(ctx.ir, rn(raw));
    store_fpscr(ctx.ir, v);
}

pub(super) fn trans_sts_fpscr(ctx: &mut DisasContext<'_>, raw: u32) {
    let v = ctx.ir.load_context(FPSCR_OFFSET, Type::I32);
    store_gpr(ctx.ir, rn(raw), v);
}

pub(super) fn trans_lds_pr(ctx: &mut DisasContext<'_>, raw: u32) {
    let v = load_gpr(ctx.ir, rn(raw));
    ctx.ir.store_context(PR_OFFSET, v);
}

pub(super) fn trans_sts_pr(ctx: &mut DisasContext<'_>, raw: u32) {
    let v = ctx.ir.load_context(PR_OFFSET, Type::I32);
    store_gpr(ctx.ir, rn(raw), v);
}
