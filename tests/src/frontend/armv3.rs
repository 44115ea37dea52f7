use jit_backend::BlockExit;
use jit_core::Guest;
use jit_frontend::armv3::context::{
    CPSR_I, CPSR_MODE, CPSR_Z, MODE_IRQ, MODE_SVC, MODE_UND, MODE_USR,
};
use jit_frontend::armv3::opdefs::CYCLES_PER_INSTR;
use jit_frontend::armv3::{decode, format, step, writes_pc, Armv3Frontend, Armv3Guest, Armv3Op};
use jit_frontend::Frontend;

use super::run_block;

const RAM_SIZE: usize = 0x1000;

/// r1 = 5 + 4 + 3 + 2 + 1, stored at [r2].
const SUM_LOOP: [u32; 7] = [
    0xe3a0_0005, // mov r0, #5
    0xe3a0_1000, // mov r1, #0
    0xe081_1000, // add r1, r1, r0
    0xe250_0001, // subs r0, r0, #1
    0x1aff_fffc, // bne 0x8
    0xe582_1000, // str r1, [r2]
    0xeaff_fffe, // b 0x18
];

fn guest_with(addr: u32, code: &[u32]) -> Armv3Guest {
    let mut guest = Armv3Guest::new(RAM_SIZE);
    guest.ram.load_u32s(addr, code);
    guest.ctx.r[15] = addr;
    guest
}

#[test]
fn test_armv3_decode() {
    assert_eq!(decode(0xe3a0_0005), Armv3Op::Mov);
    assert_eq!(decode(0xe250_0001), Armv3Op::Sub);
    assert_eq!(decode(0x1aff_fffc), Armv3Op::B);
    assert_eq!(decode(0xe582_1000), Armv3Op::Str);
    assert_eq!(decode(0xe590_f000), Armv3Op::Ldr);
    assert_eq!(decode(0xe8bd_8001), Armv3Op::Ldm);
    assert_eq!(decode(0xe000_0291), Armv3Op::Mul);
    assert_eq!(decode(0xe10f_0000), Armv3Op::Mrs);
    assert_eq!(decode(0xef00_0000), Armv3Op::Swi);
    // No coprocessor.
    assert_eq!(decode(0xee00_0000), Armv3Op::Invalid);
}

#[test]
fn test_armv3_block_terminators() {
    for raw in [
        0xeaff_fffe, // b
        0xe1a0_f00e, // mov pc, lr
        0xe590_f000, // ldr pc, [r0]
        0xe8bd_8001, // ldmia sp!, {r0, pc}
        0xef00_0000, // swi
        0xee00_0000, // undefined
        0xe10f_0000, // mrs r0, cpsr
    ] {
        assert!(writes_pc(raw), "{raw:#010x}");
    }
    for raw in [0xe3a0_0005, 0xe8bd_0003, 0xe582_1000] {
        assert!(!writes_pc(raw), "{raw:#010x}");
    }

    let mut guest = guest_with(0, &SUM_LOOP);
    let fe = Armv3Frontend::new();
    assert_eq!(fe.analyze_code(&mut guest, 0), 0x14);
    assert_eq!(fe.analyze_code(&mut guest, 0x14), 8);
}

#[test]
fn test_armv3_format() {
    assert_eq!(format(0x10, 0x1aff_fffc), "00000010  1afffffc  bne");
    assert_eq!(format(0x18, 0xeaff_fffe), "00000018  eafffffe  b");
    assert_eq!(format(0, 0xeb00_0000), "00000000  eb000000  bl");
    assert_eq!(format(0, 0xee00_0000), "00000000  ee000000  .word 0xee000000");
}

#[test]
fn test_armv3_step_runs_loop() {
    let mut guest = guest_with(0, &SUM_LOOP);
    guest.ctx.r[2] = 0x100;
    let mut steps = 0;
    while guest.ctx.r[15] != 0x18 {
        step(&mut guest);
        steps += 1;
        assert!(steps < 100, "loop did not terminate");
    }
    assert_eq!(guest.ctx.r[1], 15);
    assert_eq!(guest.ctx.r[0], 0);
    assert_eq!(guest.ram.read(0x100, 4), 15);
    assert_eq!(guest.ctx.remaining_cycles, -steps * CYCLES_PER_INSTR);
}

#[test]
fn test_armv3_jit_matches_step() {
    let fe = Armv3Frontend::new();
    let mut jit = guest_with(0, &SUM_LOOP);
    jit.ctx.r[2] = 0x100;
    let mut interp = guest_with(0, &SUM_LOOP);
    interp.ctx.r[2] = 0x100;

    // Step the reference through the same blocks the JIT runs, so both
    // stop after the final block's `b .`.
    let mut blocks = 0;
    while jit.ctx.r[15] != 0x18 {
        let begin = jit.ctx.r[15];
        assert_eq!(interp.ctx.r[15], begin);
        let size = fe.analyze_code(&mut interp, begin);
        for _ in 0..size / 4 {
            step(&mut interp);
        }
        let exit = run_block(&fe, &mut jit, begin);
        assert_eq!(exit, BlockExit::Dynamic);
        blocks += 1;
        assert!(blocks < 20, "loop did not terminate");
    }
    assert_eq!(interp.ctx.r[15], 0x18);

    assert_eq!(jit.ctx.r, interp.ctx.r);
    assert_eq!(jit.ctx.cpsr, interp.ctx.cpsr);
    assert_eq!(jit.ram.read(0x100, 4), 15);
    assert_eq!(jit.ctx.ran_instrs, interp.ctx.ran_instrs);
}

#[test]
fn test_armv3_pc_reads() {
    // mov r0, pc
    let mut guest = guest_with(0x20, &[0xe1a0_000f]);
    step(&mut guest);
    assert_eq!(guest.ctx.r[0], 0x28);
    assert_eq!(guest.ctx.r[15], 0x24);

    // add r0, pc, r1, lsl r2
    let mut guest = guest_with(0x20, &[0xe08f_0211]);
    guest.ctx.r[1] = 1;
    guest.ctx.r[2] = 0;
    step(&mut guest);
    assert_eq!(guest.ctx.r[0], 0x2d);
}

#[test]
fn test_armv3_condition_fails() {
    // beq +0x40 with Z clear
    let mut guest = guest_with(0x30, &[0x0a00_0010]);
    guest.ctx.cpsr &= !CPSR_Z;
    step(&mut guest);
    assert_eq!(guest.ctx.r[15], 0x34);

    let mut guest = guest_with(0x30, &[0x0a00_0010]);
    guest.ctx.cpsr |= CPSR_Z;
    step(&mut guest);
    assert_eq!(guest.ctx.r[15], 0x30 + 8 + 0x40);
}

#[test]
fn test_armv3_swi() {
    let mut guest = guest_with(0x40, &[0xef00_0000]);
    guest.ctx.cpsr = MODE_USR;
    step(&mut guest);
    assert_eq!(guest.ctx.r[14], 0x44);
    assert_eq!(guest.ctx.r[15], 0x08);
    assert_eq!(guest.ctx.cpsr & CPSR_MODE, MODE_SVC);
    assert_ne!(guest.ctx.cpsr & CPSR_I, 0);
    assert_eq!(guest.ctx.spsr, MODE_USR);
}

#[test]
fn test_armv3_undefined() {
    let mut guest = guest_with(0x40, &[0xee00_0000]);
    let exit = run_block(&Armv3Frontend::new(), &mut guest, 0x40);
    assert_eq!(exit, BlockExit::Dynamic);
    assert_eq!(guest.ctx.r[15], 0x04);
    assert_eq!(guest.ctx.r[14], 0x44);
    assert_eq!(guest.ctx.cpsr & CPSR_MODE, MODE_UND);
}

#[test]
fn test_armv3_irq() {
    let mut guest = guest_with(0x80, &[0xeaff_fffe]);
    guest.raise_irq();
    // Masked at reset.
    guest.interrupt_check();
    assert_eq!(guest.ctx.r[15], 0x80);

    guest.ctx.cpsr = MODE_USR;
    guest.interrupt_check();
    assert_eq!(guest.ctx.r[15], 0x18);
    assert_eq!(guest.ctx.r[14], 0x84);
    assert_eq!(guest.ctx.cpsr & CPSR_MODE, MODE_IRQ);
    assert_ne!(guest.ctx.cpsr & CPSR_I, 0);
    assert_eq!(guest.ctx.pending_interrupts, 0);
}

#[test]
fn test_armv3_dump_code() {
    let mut guest = guest_with(0, &SUM_LOOP);
    let mut out = Vec::new();
    Armv3Frontend::new()
        .dump_code(&mut guest, 0, 0x14, &mut out)
        .unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), 5);
    assert!(text.starts_with("# 00000000  e3a00005  mov"), "{text}");
}
