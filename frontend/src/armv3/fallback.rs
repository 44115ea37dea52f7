//! ARMv3 host interpreter routines.
//!
//! Each routine first points r15 at the following instruction, then
//! evaluates the condition field. Reading r15 as an operand yields the
//! instruction address plus 8 (plus 12 for register-specified shifts
//! and stored values).

use jit_core::Guest;

use super::context::{
    armv3_ctx, Armv3Context, CPSR_C, CPSR_MODE, CPSR_N, CPSR_V, CPSR_Z, MODE_SVC, MODE_UND,
    MODE_USR, VECTOR_SWI, VECTOR_UNDEFINED,
};
use super::opdefs::{lookup, rd};

fn ctx(guest: &mut dyn Guest) -> &mut Armv3Context {
    armv3_ctx(guest)
}

/// Execute the instruction at r15 and advance.
pub fn step(guest: &mut dyn Guest) {
    let pc = ctx(guest).r[15];
    let raw = guest.r32(pc);
    let def = lookup(raw);
    (def.fallback)(guest, pc, raw);
    let c = ctx(guest);
    c.remaining_cycles -= def.cycles;
    c.ran_instrs += 1;
}

pub fn cond_passed(cpsr: u32, cond: u32) -> bool {
    let n = cpsr & CPSR_N != 0;
    let z = cpsr & CPSR_Z != 0;
    let c = cpsr & CPSR_C != 0;
    let v = cpsr & CPSR_V != 0;
    match cond & 0xf {
        0x0 => z,
        0x1 => !z,
        0x2 => c,
        0x3 => !c,
        0x4 => n,
        0x5 => !n,
        0x6 => v,
        0x7 => !v,
        0x8 => c && !z,
        0x9 => !c || z,
        0xa => n == v,
        0xb => n != v,
        0xc => !z && n == v,
        0xd => z || n != v,
        0xe => true,
        _ => false,
    }
}

/// Advance r15 and check the condition.
fn begin(guest: &mut dyn Guest, addr: u32, raw: u32) -> bool {
    let c = ctx(guest);
    c.r[15] = addr.wrapping_add(4);
    cond_passed(c.cpsr, raw >> 28)
}

/// Register `n`, with r15 reading as `pc`.
fn reg(c: &Armv3Context, n: usize, pc: u32) -> u32 {
    if n == 15 {
        pc
    } else {
        c.r[n]
    }
}

// ── Barrel shifter ─────────────────────────────────────────────

/// Shift by a 5-bit immediate. Amount 0 encodes LSR/ASR #32 and RRX.
pub fn shift_by_immediate(v: u32, ty: u32, amount: u32, carry: bool) -> (u32, bool) {
    let bit = |n: u32| (v >> n) & 1 != 0;
    match (ty & 3, amount) {
        (0, 0) => (v, carry),
        (0, n) => (v << n, bit(32 - n)),
        (1, 0) => (0, bit(31)),
        (1, n) => (v >> n, bit(n - 1)),
        (2, 0) => (((v as i32) >> 31) as u32, bit(31)),
        (2, n) => (((v as i32) >> n) as u32, bit(n - 1)),
        (_, 0) => ((carry as u32) << 31 | v >> 1, bit(0)),
        (_, n) => (v.rotate_right(n), bit(n - 1)),
    }
}

/// Shift by the low byte of a register.
pub fn shift_by_register(v: u32, ty: u32, amount: u32, carry: bool) -> (u32, bool) {
    let bit = |n: u32| (v >> n) & 1 != 0;
    if amount == 0 {
        return (v, carry);
    }
    match ty & 3 {
        0 => match amount {
            1..=31 => (v << amount, bit(32 - amount)),
            32 => (0, bit(0)),
            _ => (0, false),
        },
        1 => match amount {
            1..=31 => (v >> amount, bit(amount - 1)),
            32 => (0, bit(31)),
            _ => (0, false),
        },
        2 if amount < 32 => (((v as i32) >> amount) as u32, bit(amount - 1)),
        2 => {
            let sign = ((v as i32) >> 31) as u32;
            (sign, sign & 1 != 0)
        }
        _ => match amount & 31 {
            0 => (v, bit(31)),
            r => (v.rotate_right(r), bit(r - 1)),
        },
    }
}

/// Rotated 8-bit immediate operand.
fn rotated_immediate(raw: u32, carry: bool) -> (u32, bool) {
    let rot = ((raw >> 8) & 0xf) * 2;
    let v = (raw & 0xff).rotate_right(rot);
    (v, if rot == 0 { carry } else { v >> 31 != 0 })
}

/// Second operand of a data processing instruction, with the
/// shifter's carry out.
fn shifter_operand(c: &Armv3Context, raw: u32, pc: u32) -> (u32, bool) {
    let carry = c.flag(CPSR_C);
    if raw & (1 << 25) != 0 {
        return rotated_immediate(raw, carry);
    }
    let rm = reg(c, (raw & 0xf) as usize, pc);
    let ty = (raw >> 5) & 3;
    if raw & (1 << 4) != 0 {
        let amount = reg(c, ((raw >> 8) & 0xf) as usize, pc) & 0xff;
        shift_by_register(rm, ty, amount, carry)
    } else {
        shift_by_immediate(rm, ty, (raw >> 7) & 0x1f, carry)
    }
}

/// `a + b + carry` with carry out and signed overflow.
pub fn add_with_carry(a: u32, b: u32, carry: bool) -> (u32, bool, bool) {
    let wide = a as u64 + b as u64 + carry as u64;
    let r = wide as u32;
    let v = (!(a ^ b) & (a ^ r)) >> 31 != 0;
    (r, wide >> 32 != 0, v)
}

// ── Data processing ────────────────────────────────────────────

pub(super) fn fb_data(guest: &mut dyn Guest, addr: u32, raw: u32) {
    if !begin(guest, addr, raw) {
        return;
    }
    let c = ctx(guest);
    let reg_shift = raw & (1 << 25) == 0 && raw & (1 << 4) != 0;
    let pc = addr.wrapping_add(if reg_shift { 12 } else { 8 });
    let (op2, shifter_carry) = shifter_operand(c, raw, pc);
    let rn = reg(c, ((raw >> 16) & 0xf) as usize, pc);
    let carry = c.flag(CPSR_C);
    let opcode = (raw >> 21) & 0xf;

    let (result, arith) = match opcode {
        0x0 | 0x8 => (rn & op2, None),
        0x1 | 0x9 => (rn ^ op2, None),
        0x2 | 0xa => split(add_with_carry(rn, !op2, true)),
        0x3 => split(add_with_carry(op2, !rn, true)),
        0x4 | 0xb => split(add_with_carry(rn, op2, false)),
        0x5 => split(add_with_carry(rn, op2, carry)),
        0x6 => split(add_with_carry(rn, !op2, carry)),
        0x7 => split(add_with_carry(op2, !rn, carry)),
        0xc => (rn | op2, None),
        0xd => (op2, None),
        0xe => (rn & !op2, None),
        _ => (!op2, None),
    };

    let writes = !(0x8..=0xb).contains(&opcode);
    let d = rd(raw);
    if writes {
        c.r[d] = result;
    }
    if raw & (1 << 20) != 0 {
        if writes && d == 15 {
            c.cpsr = c.spsr;
            return;
        }
        c.set_nz(result);
        match arith {
            Some((cf, vf)) => {
                c.set_flag(CPSR_C, cf);
                c.set_flag(CPSR_V, vf);
            }
            None => c.set_flag(CPSR_C, shifter_carry),
        }
    }
}

fn split((r, c, v): (u32, bool, bool)) -> (u32, Option<(bool, bool)>) {
    (r, Some((c, v)))
}

/// MUL / MLA
pub(super) fn fb_mul(guest: &mut dyn Guest, addr: u32, raw: u32) {
    if !begin(guest, addr, raw) {
        return;
    }
    let c = ctx(guest);
    let field = |shift: u32| ((raw >> shift) & 0xf) as usize;
    let mut r = c.r[field(0)].wrapping_mul(c.r[field(8)]);
    if raw & (1 << 21) != 0 {
        r = r.wrapping_add(c.r[field(12)]);
    }
    c.r[field(16)] = r;
    if raw & (1 << 20) != 0 {
        c.set_nz(r);
    }
}

// ── Status register transfer ───────────────────────────────────

pub(super) fn fb_mrs(guest: &mut dyn Guest, addr: u32, raw: u32) {
    if !begin(guest, addr, raw) {
        return;
    }
    let c = ctx(guest);
    c.r[rd(raw)] = if raw & (1 << 22) != 0 { c.spsr } else { c.cpsr };
}

pub(super) fn fb_msr(guest: &mut dyn Guest, addr: u32, raw: u32) {
    if !begin(guest, addr, raw) {
        return;
    }
    let c = ctx(guest);
    let value = if raw & (1 << 25) != 0 {
        rotated_immediate(raw, false).0
    } else {
        c.r[(raw & 0xf) as usize]
    };
    let all_fields = raw & (1 << 16) != 0 && c.cpsr & CPSR_MODE != MODE_USR;
    let mask = if all_fields { u32::MAX } else { 0xf000_0000 };
    if raw & (1 << 22) != 0 {
        c.spsr = (c.spsr & !mask) | (value & mask);
    } else {
        c.cpsr = (c.cpsr & !mask) | (value & mask);
    }
}

// ── Memory ─────────────────────────────────────────────────────

/// Word load; misaligned addresses rotate the aligned word.
fn read_word(guest: &mut dyn Guest, addr: u32) -> u32 {
    guest.r32(addr & !3).rotate_right((addr & 3) * 8)
}

pub(super) fn fb_swp(guest: &mut dyn Guest, addr: u32, raw: u32) {
    if !begin(guest, addr, raw) {
        return;
    }
    let c = ctx(guest);
    let base = c.r[((raw >> 16) & 0xf) as usize];
    let src = c.r[(raw & 0xf) as usize];
    let old = if raw & (1 << 22) != 0 {
        let old = guest.r8(base) as u32;
        guest.w8(base, src as u8);
        old
    } else {
        let old = read_word(guest, base);
        guest.w32(base & !3, src);
        old
    };
    ctx(guest).r[rd(raw)] = old;
}

/// LDR / STR
pub(super) fn fb_xfr(guest: &mut dyn Guest, addr: u32, raw: u32) {
    if !begin(guest, addr, raw) {
        return;
    }
    let c = ctx(guest);
    let pc = addr.wrapping_add(8);
    let offset = if raw & (1 << 25) != 0 {
        let rm = reg(c, (raw & 0xf) as usize, pc);
        shift_by_immediate(rm, (raw >> 5) & 3, (raw >> 7) & 0x1f, c.flag(CPSR_C)).0
    } else {
        raw & 0xfff
    };
    let n = ((raw >> 16) & 0xf) as usize;
    let base = reg(c, n, pc);
    let indexed = if raw & (1 << 23) != 0 {
        base.wrapping_add(offset)
    } else {
        base.wrapping_sub(offset)
    };
    let pre = raw & (1 << 24) != 0;
    let xfer = if pre { indexed } else { base };
    let writeback = (!pre || raw & (1 << 21) != 0) && n != 15;
    let byte = raw & (1 << 22) != 0;
    let d = rd(raw);

    if raw & (1 << 20) != 0 {
        let value = if byte {
            guest.r8(xfer) as u32
        } else {
            read_word(guest, xfer)
        };
        let c = ctx(guest);
        if writeback {
            c.r[n] = indexed;
        }
        c.r[d] = value;
    } else {
        let value = reg(c, d, addr.wrapping_add(12));
        if byte {
            guest.w8(xfer, value as u8);
        } else {
            guest.w32(xfer & !3, value);
        }
        if writeback {
            ctx(guest).r[n] = indexed;
        }
    }
}

/// LDM / STM. The lowest register transfers at the lowest address.
pub(super) fn fb_blk(guest: &mut dyn Guest, addr: u32, raw: u32) {
    if !begin(guest, addr, raw) {
        return;
    }
    let c = ctx(guest);
    let n = ((raw >> 16) & 0xf) as usize;
    let rlist = raw & 0xffff;
    let size = rlist.count_ones() * 4;
    let base = c.r[n];
    let up = raw & (1 << 23) != 0;
    let pre = raw & (1 << 24) != 0;
    let mut at = match (pre, up) {
        (false, true) => base,
        (true, true) => base.wrapping_add(4),
        (false, false) => base.wrapping_sub(size).wrapping_add(4),
        (true, false) => base.wrapping_sub(size),
    };
    let final_base = if up {
        base.wrapping_add(size)
    } else {
        base.wrapping_sub(size)
    };
    let writeback = raw & (1 << 21) != 0;

    if raw & (1 << 20) != 0 {
        if writeback {
            c.r[n] = final_base;
        }
        for i in (0..16).filter(|i| rlist & (1 << i) != 0) {
            let v = guest.r32(at);
            ctx(guest).r[i] = v;
            at = at.wrapping_add(4);
        }
        if raw & (1 << 22) != 0 && rlist & (1 << 15) != 0 {
            let c = ctx(guest);
            c.cpsr = c.spsr;
        }
    } else {
        for i in (0..16).filter(|i| rlist & (1 << i) != 0) {
            let v = reg(ctx(guest), i, addr.wrapping_add(12));
            guest.w32(at, v);
            at = at.wrapping_add(4);
        }
        if writeback {
            ctx(guest).r[n] = final_base;
        }
    }
}

// ── Control ────────────────────────────────────────────────────

/// B / BL
pub(super) fn fb_branch(guest: &mut dyn Guest, addr: u32, raw: u32) {
    if !begin(guest, addr, raw) {
        return;
    }
    let c = ctx(guest);
    let offset = (((raw & 0x00ff_ffff) << 8) as i32 >> 6) as u32;
    if raw & (1 << 24) != 0 {
        c.r[14] = addr.wrapping_add(4);
    }
    c.r[15] = addr.wrapping_add(8).wrapping_add(offset);
}

pub(super) fn fb_swi(guest: &mut dyn Guest, addr: u32, raw: u32) {
    if !begin(guest, addr, raw) {
        return;
    }
    ctx(guest).enter_exception(MODE_SVC, VECTOR_SWI, addr.wrapping_add(4));
}

/// Raise an undefined instruction exception.
pub(super) fn fb_invalid(guest: &mut dyn Guest, addr: u32, raw: u32) {
    if !begin(guest, addr, raw) {
        return;
    }
    log::warn!("armv3: undefined instruction {raw:#010x} at {addr:#010x}");
    ctx(guest).enter_exception(MODE_UND, VECTOR_UNDEFINED, addr.wrapping_add(4));
}
