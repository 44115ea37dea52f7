//! SH4 opcode table, decoding and disassembly.
//!
//! Each entry carries a 16-character bit signature in the style of the
//! architecture manual: `0`/`1` are fixed opcode bits, `n`/`m` register
//! fields, `i` an immediate and `d` a displacement.

use crate::{InstrFlags, OpDef};

use super::fallback::*;
use super::trans::*;

const NONE: InstrFlags = InstrFlags::NONE;
const LOAD: InstrFlags = InstrFlags::LOAD;
const STORE: InstrFlags = InstrFlags::STORE;
const CMP: InstrFlags = InstrFlags::CMP;
const BR: InstrFlags = InstrFlags::BRANCH.union(InstrFlags::STORE_PC);
const CBR: InstrFlags = BR.union(InstrFlags::COND);
const DBR: InstrFlags = BR.union(InstrFlags::DELAYED);
const DCBR: InstrFlags = CBR.union(InstrFlags::DELAYED);
const SR: InstrFlags = InstrFlags::STORE_SR;
const FPSCR: InstrFlags = InstrFlags::STORE_FPSCR;

/// One row of the opcode table.
pub struct Sh4Op {
    pub sig: &'static str,
    pub def: OpDef,
}

const fn op(
    sig: &'static str,
    name: &'static str,
    desc: &'static str,
    cycles: i32,
    flags: InstrFlags,
    translate: Option<crate::TranslateFn>,
    fallback: jit_core::FallbackFn,
) -> Sh4Op {
    Sh4Op {
        sig,
        def: OpDef {
            name,
            desc,
            flags,
            cycles,
            translate,
            fallback,
        },
    }
}

/// Definition for encodings no table row matches.
pub static SH4_INVALID: OpDef = OpDef {
    name: "invalid",
    desc: ".word",
    flags: InstrFlags::INVALID
        .union(InstrFlags::LOAD_PC)
        .union(InstrFlags::STORE_PC),
    cycles: 1,
    translate: None,
    fallback: fb_invalid,
};

#[rustfmt::skip]
pub const SH4_OPS: &[Sh4Op] = &[
    // Data transfer
    op("0000000000001001", "nop",      "nop",                 1, NONE,  Some(trans_nop),        fb_nop),
    op("1110nnnniiiiiiii", "mov_imm",  "mov #imm,Rn",         1, NONE,  Some(trans_mov_imm),    fb_mov_imm),
    op("0110nnnnmmmm0011", "mov",      "mov Rm,Rn",           1, NONE,  Some(trans_mov),        fb_mov),
    op("0110nnnnmmmm0000", "movb_ld",  "mov.b @Rm,Rn",        1, LOAD,  Some(trans_movb_load),  fb_movb_load),
    op("0110nnnnmmmm0001", "movw_ld",  "mov.w @Rm,Rn",        1, LOAD,  Some(trans_movw_load),  fb_movw_load),
    op("0110nnnnmmmm0010", "movl_ld",  "mov.l @Rm,Rn",        1, LOAD,  Some(trans_movl_load),  fb_movl_load),
    op("0010nnnnmmmm0000", "movb_st",  "mov.b Rm,@Rn",        1, STORE, Some(trans_movb_store), fb_movb_store),
    op("0010nnnnmmmm0001", "movw_st",  "mov.w Rm,@Rn",        1, STORE, Some(trans_movw_store), fb_movw_store),
    op("0010nnnnmmmm0010", "movl_st",  "mov.l Rm,@Rn",        1, STORE, Some(trans_movl_store), fb_movl_store),
    op("1101nnnndddddddd", "movl_pc",  "mov.l @(disp,pc),Rn", 1, LOAD,  Some(trans_movl_pcrel), fb_movl_pcrel),
    op("11000111dddddddd", "mova",     "mova @(disp,pc),r0",  1, NONE,  Some(trans_mova),       fb_mova),
    op("0000nnnn00101001", "movt",     "movt Rn",             1, NONE,  Some(trans_movt),       fb_movt),
    op("0110nnnnmmmm1110", "extsb",    "exts.b Rm,Rn",        1, NONE,  Some(trans_extsb),      fb_extsb),
    op("0110nnnnmmmm1111", "extsw",    "exts.w Rm,Rn",        1, NONE,  Some(trans_extsw),      fb_extsw),
    op("0110nnnnmmmm1100", "extub",    "extu.b Rm,Rn",        1, NONE,  Some(trans_extub),      fb_extub),
    op("0110nnnnmmmm1101", "extuw",    "extu.w Rm,Rn",        1, NONE,  Some(trans_extuw),      fb_extuw),
    // Arithmetic / logic
    op("0011nnnnmmmm1100", "add",      "add Rm,Rn",           1, NONE,  Some(trans_add),        fb_add),
    op("0111nnnniiiiiiii", "add_imm",  "add #imm,Rn",         1, NONE,  Some(trans_add_imm),    fb_add_imm),
    op("0011nnnnmmmm1000", "sub",      "sub Rm,Rn",           1, NONE,  Some(trans_sub),        fb_sub),
    op("0010nnnnmmmm1001", "and",      "and Rm,Rn",           1, NONE,  Some(trans_and),        fb_and),
    op("0010nnnnmmmm1011", "or",       "or Rm,Rn",            1, NONE,  Some(trans_or),         fb_or),
    op("0010nnnnmmmm1010", "xor",      "xor Rm,Rn",           1, NONE,  Some(trans_xor),        fb_xor),
    op("0110nnnnmmmm0111", "not",      "not Rm,Rn",           1, NONE,  Some(trans_not),        fb_not),
    op("0100nnnn00010000", "dt",       "dt Rn",               1, CMP,   Some(trans_dt),         fb_dt),
    op("0100nnnn00000000", "shll",     "shll Rn",             1, NONE,  Some(trans_shll),       fb_shll),
    op("0100nnnn00000001", "shlr",     "shlr Rn",             1, NONE,  Some(trans_shlr),       fb_shlr),
    op("0100nnnnmmmm1100", "shad",     "shad Rm,Rn",          1, NONE,  Some(trans_shad),       fb_shad),
    op("0100nnnnmmmm1101", "shld",     "shld Rm,Rn",          1, NONE,  Some(trans_shld),       fb_shld),
    // Compare
    op("0011nnnnmmmm0000", "cmp_eq",   "cmp/eq Rm,Rn",        1, CMP,   Some(trans_cmp_eq),     fb_cmp_eq),
    op("0011nnnnmmmm0010", "cmp_hs",   "cmp/hs Rm,Rn",        1, CMP,   Some(trans_cmp_hs),     fb_cmp_hs),
    op("0011nnnnmmmm0011", "cmp_ge",   "cmp/ge Rm,Rn",        1, CMP,   Some(trans_cmp_ge),     fb_cmp_ge),
    op("0011nnnnmmmm0110", "cmp_hi",   "cmp/hi Rm,Rn",        1, CMP,   Some(trans_cmp_hi),     fb_cmp_hi),
    op("0011nnnnmmmm0111", "cmp_gt",   "cmp/gt Rm,Rn",        1, CMP,   Some(trans_cmp_gt),     fb_cmp_gt),
    op("10001000iiiiiiii", "cmp_eq_i", "cmp/eq #imm,r0",      1, CMP,   Some(trans_cmp_eq_imm), fb_cmp_eq_imm),
    op("0010nnnnmmmm1000", "tst",      "tst Rm,Rn",           1, CMP,   Some(trans_tst),        fb_tst),
    op("0000000000001000", "clrt",     "clrt",                1, NONE,  Some(trans_clrt),       fb_clrt),
    op("0000000000011000", "sett",     "sett",                1, NONE,  Some(trans_sett),       fb_sett),
    // Branch
    op("10001001dddddddd", "bt",       "bt disp",             1, CBR,   Some(trans_bt),         fb_bt),
    op("10001011dddddddd", "bf",       "bf disp",             1, CBR,   Some(trans_bf),         fb_bf),
    op("10001101dddddddd", "bts",      "bt/s disp",           1, DCBR,  Some(trans_bts),        fb_bts),
    op("10001111dddddddd", "bfs",      "bf/s disp",           1, DCBR,  Some(trans_bfs),        fb_bfs),
    op("1010dddddddddddd", "bra",      "bra disp",            1, DBR,   Some(trans_bra),        fb_bra),
    op("1011dddddddddddd", "bsr",      "bsr disp",            1, DBR,   Some(trans_bsr),        fb_bsr),
    op("0000mmmm00100011", "braf",     "braf Rm",             2, DBR,   Some(trans_braf),       fb_braf),
    op("0000mmmm00000011", "bsrf",     "bsrf Rm",             2, DBR,   Some(trans_bsrf),       fb_bsrf),
    op("0100mmmm00101011", "jmp",      "jmp @Rm",             2, DBR,   Some(trans_jmp),        fb_jmp),
    op("0100mmmm00001011", "jsr",      "jsr @Rm",             2, DBR,   Some(trans_jsr),        fb_jsr),
    op("0000000000001011", "rts",      "rts",                 2, DBR,   Some(trans_rts),        fb_rts),
    // System
    op("0000000000101011", "rte",      "rte",                 5, DBR.union(SR), None,           fb_rte),
    op("11000011iiiiiiii", "trapa",    "trapa #imm",          7, BR.union(SR),  None,           fb_trapa),
    op("0100mmmm00001110", "ldc_sr",   "ldc Rm,sr",           4, SR,    Some(trans_ldc_sr),     fb_ldc_sr),
    op("0000nnnn00000010", "stc_sr",   "stc sr,Rn",           2, NONE,  Some(trans_stc_sr),     fb_stc_sr),
    op("0100mmmm01101010", "lds_fpscr","lds Rm,fpscr",        1, FPSCR, Some(trans_lds_fpscr),  fb_lds_fpscr),
    op("0000nnnn01101010", "sts_fpscr","sts fpscr,Rn",        1, NONE,  Some(trans_sts_fpscr),  fb_sts_fpscr),
    op("0100mmmm00101010", "lds_pr",   "lds Rm,pr",           2, NONE,  Some(trans_lds_pr),     fb_lds_pr),
    op("0000nnnn00101010", "sts_pr",   "sts pr,Rn",           2, NONE,  Some(trans_sts_pr),     fb_sts_pr),
];

// ── Decoding ───────────────────────────────────────────────────

/// Mask and value of the fixed bits of a signature.
const fn opcode_bits(sig: &str) -> (u16, u16) {
    let bytes = sig.as_bytes();
    assert!(bytes.len() == 16, "sh4 signatures are 16 bits");
    let (mut mask, mut value) = (0u16, 0u16);
    let mut i = 0;
    while i < 16 {
        mask <<= 1;
        value <<= 1;
        match bytes[i] {
            b'0' => mask |= 1,
            b'1' => {
                mask |= 1;
                value |= 1;
            }
            _ => {}
        }
        i += 1;
    }
    (mask, value)
}

const NO_OP: u8 = u8::MAX;
const BUCKET_SIZE: usize = 16;

static SH4_BITS: [(u16, u16); SH4_OPS.len()] = {
    let mut bits = [(0, 0); SH4_OPS.len()];
    let mut i = 0;
    while i < SH4_OPS.len() {
        bits[i] = opcode_bits(SH4_OPS[i].sig);
        assert!(bits[i].0 & 0xf000 == 0xf000, "top nibble must be fixed");
        i += 1;
    }
    bits
};

/// Rows of [`SH4_OPS`] grouped by the top nibble of their encoding, in
/// table order and padded with `NO_OP`.
static SH4_BUCKETS: [[u8; BUCKET_SIZE]; 16] = {
    assert!(SH4_OPS.len() < NO_OP as usize);
    let mut buckets = [[NO_OP; BUCKET_SIZE]; 16];
    let mut fill = [0usize; 16];
    let mut i = 0;
    while i < SH4_OPS.len() {
        let nibble = (opcode_bits(SH4_OPS[i].sig).1 >> 12) as usize;
        assert!(fill[nibble] < BUCKET_SIZE, "sh4 decode bucket overflow");
        buckets[nibble][fill[nibble]] = i as u8;
        fill[nibble] += 1;
        i += 1;
    }
    buckets
};

/// Table row for `raw`, if it is a valid encoding. The first matching
/// row wins.
pub fn lookup_row(raw: u32) -> Option<&'static Sh4Op> {
    let raw = raw as u16;
    SH4_BUCKETS[(raw >> 12) as usize]
        .iter()
        .take_while(|&&i| i != NO_OP)
        .map(|&i| i as usize)
        .find(|&i| {
            let (mask, value) = SH4_BITS[i];
            raw & mask == value
        })
        .map(|i| &SH4_OPS[i])
}

pub fn lookup(raw: u32) -> &'static OpDef {
    lookup_row(raw).map_or(&SH4_INVALID, |row| &row.def)
}

// ── Instruction fields ─────────────────────────────────────────

/// Register field in bits 11..8.
#[inline]
pub fn rn(raw: u32) -> usize {
    ((raw >> 8) & 0xf) as usize
}

/// Register field in bits 7..4.
#[inline]
pub fn rm(raw: u32) -> usize {
    ((raw >> 4) & 0xf) as usize
}

#[inline]
pub fn imm8(raw: u32) -> u32 {
    raw & 0xff
}

#[inline]
pub fn simm8(raw: u32) -> i32 {
    raw as u8 as i8 as i32
}

#[inline]
pub fn disp8(raw: u32) -> u32 {
    raw & 0xff
}

/// Sign-extended 12-bit displacement.
#[inline]
pub fn disp12(raw: u32) -> i32 {
    ((raw & 0xfff) as i32) << 20 >> 20
}

/// Target of `bt`/`bf` and their delayed forms.
pub fn cond_target(addr: u32, raw: u32) -> u32 {
    addr.wrapping_add(4).wrapping_add((simm8(raw) * 2) as u32)
}

/// Target of `bra`/`bsr`.
pub fn uncond_target(addr: u32, raw: u32) -> u32 {
    addr.wrapping_add(4).wrapping_add((disp12(raw) * 2) as u32)
}

/// Longword-aligned pc-relative address used by `mova` and `mov.l`.
pub fn pc_rel_addr(addr: u32, disp: u32) -> u32 {
    (addr & !3).wrapping_add(4).wrapping_add(disp * 4)
}

/// Static target of a pc-relative branch.
pub fn branch_target(addr: u32, raw: u32) -> Option<u32> {
    match raw >> 12 {
        0x8 if matches!((raw >> 8) & 0xf, 0x9 | 0xb | 0xd | 0xf) => Some(cond_target(addr, raw)),
        0xa | 0xb => Some(uncond_target(addr, raw)),
        _ => None,
    }
}

// ── Disassembly ────────────────────────────────────────────────

/// Value of the field marked by `c` in `sig`.
fn field(sig: &str, raw: u32, c: u8) -> u32 {
    sig.bytes()
        .enumerate()
        .filter(|&(_, s)| s == c)
        .fold(0, |v, (i, _)| v << 1 | (raw >> (15 - i)) & 1)
}

/// One line of disassembly: address, then the instruction.
pub fn format(addr: u32, raw: u32) -> String {
    let Some(row) = lookup_row(raw) else {
        return format!("{addr:08x}  .word 0x{:04x}", raw & 0xffff);
    };
    let sig = row.sig;
    let mut text = row
        .def
        .desc
        .replace("Rm", &format!("r{}", field(sig, raw, b'm')))
        .replace("Rn", &format!("r{}", field(sig, raw, b'n')))
        .replace("#imm", &format!("#0x{:02x}", field(sig, raw, b'i')));
    if text.contains("disp") {
        let target = match branch_target(addr, raw) {
            Some(target) => target,
            None => pc_rel_addr(addr, field(sig, raw, b'd')),
        };
        text = text
            .replace("disp,pc", &format!("0x{target:08x}"))
            .replace("disp", &format!("0x{target:08x}"));
    }
    format!("{addr:08x}  {text}")
}
