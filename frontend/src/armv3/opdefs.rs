//! ARMv3 instruction classes, decoding and disassembly.

use crate::{InstrFlags, OpDef};

use super::fallback::*;

/// Decoded instruction class; indexes [`ARMV3_OPS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Armv3Op {
    Invalid,
    And,
    Eor,
    Sub,
    Rsb,
    Add,
    Adc,
    Sbc,
    Rsc,
    Tst,
    Teq,
    Cmp,
    Cmn,
    Orr,
    Mov,
    Bic,
    Mvn,
    Mul,
    Swp,
    Mrs,
    Msr,
    Ldr,
    Str,
    Ldm,
    Stm,
    B,
    Swi,
}

const fn def(name: &'static str, flags: InstrFlags, fallback: jit_core::FallbackFn) -> OpDef {
    OpDef {
        name,
        desc: name,
        flags,
        cycles: CYCLES_PER_INSTR,
        translate: None,
        fallback,
    }
}

/// Every instruction is charged the same.
pub const CYCLES_PER_INSTR: i32 = 12;

const DATA: InstrFlags = InstrFlags::DATA;
const PSR: InstrFlags = InstrFlags::PSR;
const LDR: InstrFlags = InstrFlags::XFR.union(InstrFlags::LOAD);
const STR: InstrFlags = InstrFlags::XFR.union(InstrFlags::STORE);
const LDM: InstrFlags = InstrFlags::BLK.union(InstrFlags::LOAD);
const STM: InstrFlags = InstrFlags::BLK.union(InstrFlags::STORE);

pub static ARMV3_OPS: [OpDef; 27] = [
    def("invalid", InstrFlags::INVALID, fb_invalid),
    def("and", DATA, fb_data),
    def("eor", DATA, fb_data),
    def("sub", DATA, fb_data),
    def("rsb", DATA, fb_data),
    def("add", DATA, fb_data),
    def("adc", DATA, fb_data),
    def("sbc", DATA, fb_data),
    def("rsc", DATA, fb_data),
    def("tst", DATA, fb_data),
    def("teq", DATA, fb_data),
    def("cmp", DATA, fb_data),
    def("cmn", DATA, fb_data),
    def("orr", DATA, fb_data),
    def("mov", DATA, fb_data),
    def("bic", DATA, fb_data),
    def("mvn", DATA, fb_data),
    def("mul", InstrFlags::MUL, fb_mul),
    def("swp", InstrFlags::LOAD.union(InstrFlags::STORE), fb_swp),
    def("mrs", PSR, fb_mrs),
    def("msr", PSR, fb_msr),
    def("ldr", LDR, fb_xfr),
    def("str", STR, fb_xfr),
    def("ldm", LDM, fb_blk),
    def("stm", STM, fb_blk),
    def("b", InstrFlags::BRANCH, fb_branch),
    def("swi", InstrFlags::SWI, fb_swi),
];

const DATA_OPS: [Armv3Op; 16] = [
    Armv3Op::And,
    Armv3Op::Eor,
    Armv3Op::Sub,
    Armv3Op::Rsb,
    Armv3Op::Add,
    Armv3Op::Adc,
    Armv3Op::Sbc,
    Armv3Op::Rsc,
    Armv3Op::Tst,
    Armv3Op::Teq,
    Armv3Op::Cmp,
    Armv3Op::Cmn,
    Armv3Op::Orr,
    Armv3Op::Mov,
    Armv3Op::Bic,
    Armv3Op::Mvn,
];

/// Classify a raw instruction word. Coprocessor encodings are invalid;
/// the core has no coprocessor.
pub fn decode(raw: u32) -> Armv3Op {
    if raw & 0x0fc0_00f0 == 0x0000_0090 {
        return Armv3Op::Mul;
    }
    if raw & 0x0fb0_0ff0 == 0x0100_0090 {
        return Armv3Op::Swp;
    }
    if raw & 0x0fbf_0fff == 0x010f_0000 {
        return Armv3Op::Mrs;
    }
    if raw & 0x0fbf_fff0 == 0x0129_f000 || raw & 0x0dbf_f000 == 0x0128_f000 {
        return Armv3Op::Msr;
    }
    match (raw >> 25) & 0x7 {
        0b000 | 0b001 => {
            // Multiply/swap space not claimed above.
            if raw & 0x0200_0090 == 0x90 {
                return Armv3Op::Invalid;
            }
            let opcode = (raw >> 21) & 0xf;
            let s = raw & (1 << 20) != 0;
            // Compare ops without S are PSR transfers we don't know.
            if (0x8..=0xb).contains(&opcode) && !s {
                return Armv3Op::Invalid;
            }
            DATA_OPS[opcode as usize]
        }
        0b010 => xfr(raw),
        0b011 if raw & 0x10 == 0 => xfr(raw),
        0b100 if raw & (1 << 20) != 0 => Armv3Op::Ldm,
        0b100 => Armv3Op::Stm,
        0b101 => Armv3Op::B,
        0b111 if raw & (1 << 24) != 0 => Armv3Op::Swi,
        _ => Armv3Op::Invalid,
    }
}

fn xfr(raw: u32) -> Armv3Op {
    if raw & (1 << 20) != 0 {
        Armv3Op::Ldr
    } else {
        Armv3Op::Str
    }
}

pub fn lookup(raw: u32) -> &'static OpDef {
    &ARMV3_OPS[decode(raw) as usize]
}

/// Destination register field, bits 15..12.
#[inline]
pub fn rd(raw: u32) -> usize {
    ((raw >> 12) & 0xf) as usize
}

/// Whether the instruction may write r15 and so has to end a block.
pub fn writes_pc(raw: u32) -> bool {
    let flags = lookup(raw).flags;
    flags.intersects(InstrFlags::BRANCH | InstrFlags::PSR | InstrFlags::SWI | InstrFlags::INVALID)
        || (flags.intersects(InstrFlags::DATA | InstrFlags::XFR) && rd(raw) == 15)
        || (flags.contains(InstrFlags::BLK) && raw & (1 << 15) != 0)
}

const COND_SUFFIX: [&str; 16] = [
    "eq", "ne", "cs", "cc", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le", "", "nv",
];

/// One line of disassembly: address, raw word, mnemonic.
pub fn format(addr: u32, raw: u32) -> String {
    let op = decode(raw);
    let def = &ARMV3_OPS[op as usize];
    if op == Armv3Op::Invalid {
        return format!("{addr:08x}  {raw:08x}  .word 0x{raw:08x}");
    }
    let cond = COND_SUFFIX[(raw >> 28) as usize];
    let link = if op == Armv3Op::B && raw & (1 << 24) != 0 { "l" } else { "" };
    format!("{addr:08x}  {raw:08x}  {}{link}{cond}", def.desc)
}
