use std::fs;

use jit_backend::{Backend, InterpBackend};
use jit_exec::{parse_flag, Jit, JitConfig, JitError, DEFAULT_CODE_BUFFER_SIZE};
use jit_frontend::armv3::{Armv3Frontend, Armv3Guest, ARMV3_OFFSETS};
use jit_frontend::sh4::context::{SR_BL, SR_IMASK};
use jit_frontend::sh4::{Sh4Frontend, Sh4Guest, SH4_OFFSETS};

const BASE: u32 = 0x8c00_0000;

const SUM_LOOP: [u16; 10] = [
    0xe10a, 0xe000, 0xe340, 0x301c, 0x4110, 0x8ffc, 0x7201, 0x2302, 0xaffe, 0x0009,
];

fn sh4_guest(code: &[u16]) -> Sh4Guest {
    let mut guest = Sh4Guest::new(0x1_0000);
    guest.ram.load_u16s(BASE, code);
    guest.ctx.pc = BASE;
    guest
}

fn sh4_jit(config: JitConfig) -> Jit<InterpBackend> {
    crate::init_logging();
    Jit::new(
        config.with_validation(true),
        Box::new(Sh4Frontend::new()),
        InterpBackend::new(SH4_OFFSETS),
    )
    .unwrap()
}

fn run_sum_loop() -> (Jit<InterpBackend>, Sh4Guest) {
    let mut jit = sh4_jit(JitConfig::new("sh4"));
    let mut guest = sh4_guest(&SUM_LOOP);
    let used = jit.run(&mut guest, 2000).unwrap();
    assert!(used >= 2000);
    (jit, guest)
}

#[test]
fn test_run_sum_loop() {
    let (jit, guest) = run_sum_loop();
    assert_eq!(guest.ctx.r[0], 55);
    assert_eq!(guest.ctx.r[1], 0);
    assert_eq!(guest.ctx.r[2], 10);
    assert_eq!(guest.ram.read(0x40, 4), 55);
    assert_eq!(guest.ctx.pc, BASE + 0x10);

    assert_eq!(jit.cache().addrs(), [BASE, BASE + 6, BASE + 0xe, BASE + 0x10]);
    assert_eq!(jit.compiled_blocks(), 4);
    assert_eq!(jit.cache().get(BASE).unwrap().guest_size, 0xe);
    assert!(jit.pass_stats().get(jit_backend::Stat::LoadsRemoved) > 0);
}

#[test]
fn test_static_exits_are_linked() {
    let (jit, _) = run_sum_loop();
    let body = jit.cache().get(BASE + 6).unwrap();
    let slot = body.exits.iter().position(|&a| a == BASE + 6).unwrap();
    assert_eq!(body.links[slot], Some(BASE + 6));
    assert!(body.incoming.contains(&(BASE + 6, slot as u32)));
    assert!(body.incoming.iter().any(|&(src, _)| src == BASE));

    let spin = jit.cache().get(BASE + 0x10).unwrap();
    assert_eq!(spin.links, [Some(BASE + 0x10)]);
}

#[test]
fn test_invalidate_range() {
    let (mut jit, _) = run_sum_loop();
    jit.invalidate_range(BASE + 0xe, 2);

    assert_eq!(jit.cache().addrs(), [BASE, BASE + 6, BASE + 0x10]);
    let body = jit.cache().get(BASE + 6).unwrap();
    assert!(!body.links.contains(&Some(BASE + 0xe)));
    // Blocks past the range keep their code and edges.
    let spin = jit.cache().get(BASE + 0x10).unwrap();
    assert!(!spin.is_stale());
    assert!(spin.incoming.iter().all(|&(src, _)| src != BASE + 0xe));
}

#[test]
fn test_invalidate_blocks_recompiles_on_lookup() {
    let (mut jit, mut guest) = run_sum_loop();
    jit.invalidate_blocks();
    assert_eq!(jit.cache().len(), 4);
    assert!(jit.cache().iter().all(|b| b.is_stale()));
    assert!(jit.cache().iter().all(|b| b.incoming.is_empty()));
    assert_eq!(jit.cache().lookup(BASE), None);

    jit.run(&mut guest, 100).unwrap();
    assert_eq!(jit.compiled_blocks(), 5);
    assert!(!jit.cache().get(BASE + 0x10).unwrap().is_stale());
    assert!(jit.cache().get(BASE).unwrap().is_stale());
}

#[test]
fn test_free_blocks() {
    let (mut jit, mut guest) = run_sum_loop();
    jit.free_blocks();
    assert!(jit.cache().is_empty());

    guest.ctx.pc = BASE;
    guest.ctx.r[2] = 0;
    jit.run(&mut guest, 2000).unwrap();
    assert_eq!(guest.ctx.r[2], 10);
    assert_eq!(jit.cache().len(), 4);
    assert_eq!(jit.compiled_blocks(), 8);
}

#[test]
fn test_compile_block_replaces_entry() {
    let mut jit = sh4_jit(JitConfig::new("sh4"));
    let mut guest = sh4_guest(&SUM_LOOP);
    jit.compile_block(&mut guest, BASE).unwrap();
    let code = jit.compile_block(&mut guest, BASE).unwrap();
    assert_eq!(jit.cache().len(), 1);
    assert_eq!(jit.cache().lookup(BASE), Some(code));
    assert_eq!(jit.compiled_blocks(), 2);
    assert!(jit.backend().code_size(code) > 0);
}

#[test]
fn test_dump_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut jit = sh4_jit(JitConfig::new("sh4").with_dump_dir(dir.path()));
    let mut guest = sh4_guest(&SUM_LOOP);
    jit.compile_block(&mut guest, BASE).unwrap();

    let text = fs::read_to_string(dir.path().join("ir").join("0x8c000000.ir")).unwrap();
    assert!(text.starts_with("# 8c000000  mov #0x0a,r1"), "{text}");
    assert!(text.contains("source_info i32 0x8c000000"), "{text}");
    // Disassembly lines are comments to the parser.
    let mut ir = jit_core::Ir::new();
    jit_core::parse_ir(&text, &mut ir).unwrap();
    assert!(ir.num_instrs() > 0);
}

#[test]
fn test_dump_dir_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    fs::write(&file, b"").unwrap();

    let mut jit = sh4_jit(JitConfig::new("sh4").with_dump_dir(&file));
    let mut guest = sh4_guest(&SUM_LOOP);
    let err = jit.compile_block(&mut guest, BASE).unwrap_err();
    assert!(matches!(err, JitError::Io { .. }), "{err}");
}

#[test]
fn test_fastmem_fault_recompiles_with_callbacks() {
    let dir = tempfile::tempdir().unwrap();
    let mut jit = sh4_jit(JitConfig::new("sh4").with_fastmem(true).with_dump_dir(dir.path()));
    let mut guest = sh4_guest(&SUM_LOOP);
    jit.run(&mut guest, 2000).unwrap();
    assert_eq!(guest.ram.read(0x40, 4), 55);

    // The block at +0xe holds the store.
    let dump = dir.path().join("ir").join("0x8c00000e.ir");
    assert!(fs::read_to_string(&dump).unwrap().contains("store_host"));
    let block = jit.cache().get(BASE + 0xe).unwrap();
    assert!(block.fastmem);
    let host_pc = block.host_addr + block.host_size / 2;
    assert_eq!(jit.cache().lookup_host(host_pc), Some(BASE + 0xe));

    assert!(jit.handle_exception(host_pc));
    let block = jit.cache().get(BASE + 0xe).unwrap();
    assert!(block.is_stale());
    assert!(!block.fastmem);
    assert_eq!(jit.cache().lookup_host(host_pc), None);
    assert!(!jit.handle_exception(host_pc));
    // Other blocks keep their code.
    assert!(jit.cache().get(BASE + 6).unwrap().fastmem);
    assert!(!jit.cache().get(BASE + 0x10).unwrap().is_stale());

    guest.ctx.pc = BASE + 0xe;
    guest.ctx.r[0] = 7;
    jit.run(&mut guest, 10).unwrap();
    assert_eq!(guest.ram.read(0x40, 4), 7);
    assert_eq!(jit.compiled_blocks(), 5);
    let block = jit.cache().get(BASE + 0xe).unwrap();
    assert!(!block.is_stale());
    assert!(!block.fastmem);
    let text = fs::read_to_string(&dump).unwrap();
    assert!(text.contains("store_guest") && !text.contains("store_host"), "{text}");
}

#[test]
fn test_handle_exception_outside_fastmem_code() {
    let (mut jit, _) = run_sum_loop();
    assert!(!jit.handle_exception(0));

    // Without fastmem a fault inside a block is not a fastmem fault.
    let block = jit.cache().get(BASE).unwrap();
    assert!(!block.fastmem);
    let host_pc = block.host_addr;
    assert_eq!(jit.cache().lookup_host(host_pc), Some(BASE));
    assert!(!jit.handle_exception(host_pc));
    assert!(!jit.cache().get(BASE).unwrap().is_stale());
}

#[test]
fn test_interrupt_delivery() {
    let mut guest = sh4_guest(&[0xaffe, 0x0009]);
    guest.ram.load_u16s(0x8c00_1600, &[0xaffe, 0x0009]);
    guest.ctx.sr &= !(SR_BL | SR_IMASK);
    guest.ctx.vbr = 0x8c00_1000;
    guest.raise_interrupt(2);

    let mut jit = sh4_jit(JitConfig::new("sh4"));
    jit.run(&mut guest, 200).unwrap();

    assert_eq!(guest.interrupts_taken, 1);
    assert_eq!(guest.ctx.intevt, 0x240);
    assert_eq!(guest.ctx.spc, BASE);
    assert_eq!(guest.ctx.pc, 0x8c00_1600);
    assert_eq!(jit.cache().addrs(), [BASE, 0x8c00_1600]);
}

#[test]
fn test_armv3_run() {
    let code = [
        0xe3a0_0005,
        0xe3a0_1000,
        0xe081_1000,
        0xe250_0001,
        0x1aff_fffc,
        0xe582_1000,
        0xeaff_fffe,
    ];
    let mut guest = Armv3Guest::new(0x1000);
    guest.ram.load_u32s(0, &code);
    guest.ctx.r[2] = 0x100;

    crate::init_logging();
    let mut jit = Jit::new(
        JitConfig::new("arm7").with_validation(true),
        Box::new(Armv3Frontend::new()),
        InterpBackend::new(ARMV3_OFFSETS),
    )
    .unwrap();
    jit.run(&mut guest, 2000).unwrap();

    assert_eq!(guest.ctx.r[1], 15);
    assert_eq!(guest.ctx.r[15], 0x18);
    assert_eq!(guest.ram.read(0x100, 4), 15);
    assert_eq!(jit.cache().addrs(), [0, 0x8, 0x14, 0x18]);
}

#[cfg(target_arch = "x86_64")]
#[test]
fn test_run_sum_loop_native() {
    use jit_backend::X64Backend;

    crate::init_logging();
    let mut jit = Jit::new(
        JitConfig::new("sh4").with_validation(true),
        Box::new(Sh4Frontend::new()),
        X64Backend::new(SH4_OFFSETS).unwrap(),
    )
    .unwrap();
    let mut guest = sh4_guest(&SUM_LOOP);
    jit.run(&mut guest, 2000).unwrap();

    assert_eq!(guest.ctx.r[0], 55);
    assert_eq!(guest.ctx.r[2], 10);
    assert_eq!(guest.ram.read(0x40, 4), 55);
    assert_eq!(guest.ctx.pc, BASE + 0x10);
}

#[cfg(target_arch = "x86_64")]
#[test]
fn test_run_sum_loop_native_fastmem() {
    use jit_backend::X64Backend;

    crate::init_logging();
    let mut jit = Jit::new(
        JitConfig::new("sh4").with_fastmem(true),
        Box::new(Sh4Frontend::new()),
        X64Backend::new(SH4_OFFSETS).unwrap(),
    )
    .unwrap();
    let mut guest = sh4_guest(&SUM_LOOP);
    jit.run(&mut guest, 2000).unwrap();

    assert_eq!(guest.ram.read(0x40, 4), 55);
    let block = jit.cache().get(BASE + 0xe).unwrap();
    assert!(block.fastmem);
    assert_eq!(jit.cache().lookup_host(block.host_addr), Some(BASE + 0xe));
}

#[test]
fn test_config() {
    let config = JitConfig::default();
    assert_eq!(config.tag, "jit");
    assert_eq!(config.code_buffer_size, DEFAULT_CODE_BUFFER_SIZE);
    assert_eq!(config.dump_dir, None);
    assert!(!config.perf_map);
    assert!(!config.validate);
    assert!(!config.fastmem);

    let config = JitConfig::new("arm7")
        .with_code_buffer_size(1 << 20)
        .with_perf_map(true)
        .with_validation(true)
        .with_fastmem(true);
    assert_eq!(config.tag, "arm7");
    assert!(config.fastmem);
    assert_eq!(config.code_buffer_size, 1 << 20);
    assert!(config.perf_map && config.validate);

    let config = JitConfig::from_env("sh4");
    assert_eq!(config.tag, "sh4");
    assert_eq!(config.code_buffer_size, DEFAULT_CODE_BUFFER_SIZE);
}

#[test]
fn test_parse_flag() {
    for on in ["1", "true", "YES", " on "] {
        assert!(parse_flag(on), "{on}");
    }
    for off in ["0", "false", "", "maybe"] {
        assert!(!parse_flag(off), "{off}");
    }
}
