//! SH4 host interpreter routines.
//!
//! Every opcode has one. The JIT emits them for instructions without
//! an IR translator; [`step`] runs a whole program through them.
//! Branch routines write the pc and run their own delay slot; all
//! others leave the pc to the caller.

use jit_core::Guest;

use super::context::{
    sh4_ctx, Sh4Context, EXPEVT_ILLEGAL, EXPEVT_TRAPA, VECTOR_GENERAL,
};
use super::opdefs::{
    cond_target, disp8, imm8, lookup, pc_rel_addr, rm, rn, simm8, uncond_target,
};
use crate::InstrFlags;

fn ctx(guest: &mut dyn Guest) -> &mut Sh4Context {
    sh4_ctx(guest)
}

/// Execute the instruction at the pc and advance past it.
pub fn step(guest: &mut dyn Guest) {
    let pc = ctx(guest).pc;
    let raw = guest.r16(pc) as u32;
    let def = lookup(raw);
    (def.fallback)(guest, pc, raw);
    let c = ctx(guest);
    if !def.flags.contains(InstrFlags::STORE_PC) {
        c.pc = pc.wrapping_add(2);
    }
    c.remaining_cycles -= def.cycles;
    c.ran_instrs += 1;
}

fn run_delay_slot(guest: &mut dyn Guest, addr: u32) {
    let raw = guest.r16(addr) as u32;
    let def = lookup(raw);
    assert!(
        !def.flags.contains(InstrFlags::DELAYED),
        "nested delay slot at {addr:#010x}"
    );
    (def.fallback)(guest, addr, raw);
}

type AluFn = fn(u32, u32) -> u32;
type CmpFn = fn(u32, u32) -> bool;

fn alu(guest: &mut dyn Guest, raw: u32, f: AluFn) {
    let c = ctx(guest);
    c.r[rn(raw)] = f(c.r[rn(raw)], c.r[rm(raw)]);
}

fn cmp(guest: &mut dyn Guest, raw: u32, f: CmpFn) {
    let c = ctx(guest);
    let t = f(c.r[rn(raw)], c.r[rm(raw)]);
    c.set_t(t);
}

// ── Data transfer ──────────────────────────────────────────────

pub(super) fn fb_nop(_guest: &mut dyn Guest, _addr: u32, _raw: u32) {}

pub(super) fn fb_mov_imm(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    ctx(guest).r[rn(raw)] = simm8(raw) as u32;
}

pub(super) fn fb_mov(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    alu(guest, raw, |_, m| m);
}

pub(super) fn fb_movb_load(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let addr = ctx(guest).r[rm(raw)];
    let v = guest.r8(addr) as i8 as u32;
    ctx(guest).r[rn(raw)] = v;
}

pub(super) fn fb_movw_load(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let addr = ctx(guest).r[rm(raw)];
    let v = guest.r16(addr) as i16 as u32;
    ctx(guest).r[rn(raw)] = v;
}

pub(super) fn fb_movl_load(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let addr = ctx(guest).r[rm(raw)];
    let v = guest.r32(addr);
    ctx(guest).r[rn(raw)] = v;
}

pub(super) fn fb_movb_store(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    let (addr, v) = (c.r[rn(raw)], c.r[rm(raw)]);
    guest.w8(addr, v as u8);
}

pub(super) fn fb_movw_store(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    let (addr, v) = (c.r[rn(raw)], c.r[rm(raw)]);
    guest.w16(addr, v as u16);
}

pub(super) fn fb_movl_store(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    let (addr, v) = (c.r[rn(raw)], c.r[rm(raw)]);
    guest.w32(addr, v);
}

pub(super) fn fb_movl_pcrel(guest: &mut dyn Guest, addr: u32, raw: u32) {
    let v = guest.r32(pc_rel_addr(addr, disp8(raw)));
    ctx(guest).r[rn(raw)] = v;
}

pub(super) fn fb_mova(guest: &mut dyn Guest, addr: u32, raw: u32) {
    ctx(guest).r[0] = pc_rel_addr(addr, disp8(raw));
}

pub(super) fn fb_movt(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    c.r[rn(raw)] = c.t() as u32;
}

pub(super) fn fb_extsb(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    alu(guest, raw, |_, m| m as i8 as u32);
}

pub(super) fn fb_extsw(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    alu(guest, raw, |_, m| m as i16 as u32);
}

pub(super) fn fb_extub(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    alu(guest, raw, |_, m| m & 0xff);
}

pub(super) fn fb_extuw(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    alu(guest, raw, |_, m| m & 0xffff);
}

// ── Arithmetic / logic ─────────────────────────────────────────

pub(super) fn fb_add(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    alu(guest, raw, u32::wrapping_add);
}

pub(super) fn fb_add_imm(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    c.r[rn(raw)] = c.r[rn(raw)].wrapping_add(simm8(raw) as u32);
}

pub(super) fn fb_sub(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    alu(guest, raw, u32::wrapping_sub);
}

pub(super) fn fb_and(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    alu(guest, raw, |n, m| n & m);
}

pub(super) fn fb_or(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    alu(guest, raw, |n, m| n | m);
}

pub(super) fn fb_xor(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    alu(guest, raw, |n, m| n ^ m);
}

pub(super) fn fb_not(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    alu(guest, raw, |_, m| !m);
}

pub(super) fn fb_dt(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    let v = c.r[rn(raw)].wrapping_sub(1);
    c.r[rn(raw)] = v;
    c.set_t(v == 0);
}

pub(super) fn fb_shll(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    let v = c.r[rn(raw)];
    c.set_t(v >> 31 != 0);
    c.r[rn(raw)] = v << 1;
}

pub(super) fn fb_shlr(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    let v = c.r[rn(raw)];
    c.set_t(v & 1 != 0);
    c.r[rn(raw)] = v >> 1;
}

/// Shift left by a positive amount, right by `32 - amount` when
/// negative; a negative amount with zero low bits shifts everything
/// out.
fn shift_dynamic(v: u32, n: u32, arithmetic: bool) -> u32 {
    if (n as i32) >= 0 {
        return v << (n & 0x1f);
    }
    match (n & 0x1f, arithmetic) {
        (0, true) => ((v as i32) >> 31) as u32,
        (0, false) => 0,
        (s, true) => ((v as i32) >> (32 - s)) as u32,
        (s, false) => v >> (32 - s),
    }
}

pub(super) fn fb_shad(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    alu(guest, raw, |n, m| shift_dynamic(n, m, true));
}

pub(super) fn fb_shld(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    alu(guest, raw, |n, m| shift_dynamic(n, m, false));
}

// ── Compare ────────────────────────────────────────────────────

pub(super) fn fb_cmp_eq(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    cmp(guest, raw, |n, m| n == m);
}

pub(super) fn fb_cmp_hs(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    cmp(guest, raw, |n, m| n >= m);
}

pub(super) fn fb_cmp_ge(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    cmp(guest, raw, |n, m| n as i32 >= m as i32);
}

pub(super) fn fb_cmp_hi(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    cmp(guest, raw, |n, m| n > m);
}

pub(super) fn fb_cmp_gt(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    cmp(guest, raw, |n, m| n as i32 > m as i32);
}

pub(super) fn fb_cmp_eq_imm(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    let t = c.r[0] == simm8(raw) as u32;
    c.set_t(t);
}

pub(super) fn fb_tst(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    cmp(guest, raw, |n, m| n & m == 0);
}

pub(super) fn fb_clrt(guest: &mut dyn Guest, _addr: u32, _raw: u32) {
    ctx(guest).set_t(false);
}

pub(super) fn fb_sett(guest: &mut dyn Guest, _addr: u32, _raw: u32) {
    ctx(guest).set_t(true);
}

// ── Branch ─────────────────────────────────────────────────────

fn cond_branch(guest: &mut dyn Guest, addr: u32, raw: u32, taken_if: bool, delayed: bool) {
    let taken = ctx(guest).t() == taken_if;
    let next = if delayed {
        run_delay_slot(guest, addr.wrapping_add(2));
        addr.wrapping_add(4)
    } else {
        addr.wrapping_add(2)
    };
    ctx(guest).pc = if taken { cond_target(addr, raw) } else { next };
}

/// Delayed jump; the target was read before the slot runs and PR is
/// written after it.
fn jump(guest: &mut dyn Guest, addr: u32, dst: u32, link: bool) {
    run_delay_slot(guest, addr.wrapping_add(2));
    let c = ctx(guest);
    if link {
        c.pr = addr.wrapping_add(4);
    }
    c.pc = dst;
}

pub(super) fn fb_bt(guest: &mut dyn Guest, addr: u32, raw: u32) {
    cond_branch(guest, addr, raw, true, false);
}

pub(super) fn fb_bf(guest: &mut dyn Guest, addr: u32, raw: u32) {
    cond_branch(guest, addr, raw, false, false);
}

pub(super) fn fb_bts(guest: &mut dyn Guest, addr: u32, raw: u32) {
    cond_branch(guest, addr, raw, true, true);
}

pub(super) fn fb_bfs(guest: &mut dyn Guest, addr: u32, raw: u32) {
    cond_branch(guest, addr, raw, false, true);
}

pub(super) fn fb_bra(guest: &mut dyn Guest, addr: u32, raw: u32) {
    jump(guest, addr, uncond_target(addr, raw), false);
}

pub(super) fn fb_bsr(guest: &mut dyn Guest, addr: u32, raw: u32) {
    jump(guest, addr, uncond_target(addr, raw), true);
}

pub(super) fn fb_braf(guest: &mut dyn Guest, addr: u32, raw: u32) {
    let dst = ctx(guest).r[rn(raw)].wrapping_add(addr.wrapping_add(4));
    jump(guest, addr, dst, false);
}

pub(super) fn fb_bsrf(guest: &mut dyn Guest, addr: u32, raw: u32) {
    let dst = ctx(guest).r[rn(raw)].wrapping_add(addr.wrapping_add(4));
    jump(guest, addr, dst, true);
}

pub(super) fn fb_jmp(guest: &mut dyn Guest, addr: u32, raw: u32) {
    let dst = ctx(guest).r[rn(raw)];
    jump(guest, addr, dst, false);
}

pub(super) fn fb_jsr(guest: &mut dyn Guest, addr: u32, raw: u32) {
    let dst = ctx(guest).r[rn(raw)];
    jump(guest, addr, dst, true);
}

pub(super) fn fb_rts(guest: &mut dyn Guest, addr: u32, _raw: u32) {
    let dst = ctx(guest).pr;
    jump(guest, addr, dst, false);
}

// ── System ─────────────────────────────────────────────────────

pub(super) fn fb_rte(guest: &mut dyn Guest, addr: u32, _raw: u32) {
    let (dst, ssr) = {
        let c = ctx(guest);
        (c.spc, c.ssr)
    };
    run_delay_slot(guest, addr.wrapping_add(2));
    let c = ctx(guest);
    c.set_sr(ssr);
    c.pc = dst;
}

pub(super) fn fb_trapa(guest: &mut dyn Guest, addr: u32, raw: u32) {
    let c = ctx(guest);
    c.tra = imm8(raw) << 2;
    c.expevt = EXPEVT_TRAPA;
    c.enter_exception(addr.wrapping_add(2), VECTOR_GENERAL);
}

/// Raise a general illegal instruction exception.
pub(super) fn fb_invalid(guest: &mut dyn Guest, addr: u32, raw: u32) {
    log::warn!("sh4: invalid instruction {:#06x} at {addr:#010x}", raw & 0xffff);
    let c = ctx(guest);
    c.expevt = EXPEVT_ILLEGAL;
    c.enter_exception(addr, VECTOR_GENERAL);
}

pub(super) fn fb_ldc_sr(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    let v = c.r[rn(raw)];
    c.set_sr(v);
}

pub(super) fn fb_stc_sr(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    c.r[rn(raw)] = c.sr;
}

pub(super) fn fb_lds_fpscr(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    let v = c.r[rn(raw)] & 0x003f_ffff;
    c.set_fpscr(v);
}

pub(super) fn fb_sts_fpscr(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    c.r[rn(raw)] = c.fpscr;
}

pub(super) fn fb_lds_pr(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    c.pr = c.r[rn(raw)];
}

pub(super) fn fb_sts_pr(guest: &mut dyn Guest, _addr: u32, raw: u32) {
    let c = ctx(guest);
    c.r[rn(raw)] = c.pr;
}
