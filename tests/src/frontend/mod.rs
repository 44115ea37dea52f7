mod armv3;

use jit_backend::interp::INTERP_REGISTERS;
use jit_backend::{Backend, BlockExit, InterpBackend, Pipeline};
use jit_core::{Guest, Ir};
use jit_frontend::{Frontend, InstrFlags, Ram};

/// Translate the block at `addr`, run it once on the interpreter and
/// return how it exited.
pub fn run_block(frontend: &dyn Frontend, guest: &mut dyn Guest, addr: u32) -> BlockExit {
    run_block_with(frontend, guest, addr, false)
}

pub fn run_block_with(
    frontend: &dyn Frontend,
    guest: &mut dyn Guest,
    addr: u32,
    fastmem: bool,
) -> BlockExit {
    crate::init_logging();
    let size = frontend.analyze_code(guest, addr);
    let mut ir = Ir::new();
    frontend.translate_code(guest, addr, size, fastmem, &mut ir);
    Pipeline::new()
        .with_validation(true)
        .optimize(&mut ir, &INTERP_REGISTERS);

    let mut backend = InterpBackend::new(guest.offsets());
    let code = backend.assemble(addr, &ir).unwrap();
    backend.execute(code, guest)
}

#[test]
fn test_instr_flags() {
    let flags = InstrFlags::LOAD | InstrFlags::CMP;
    assert!(flags.contains(InstrFlags::LOAD));
    assert!(!flags.contains(InstrFlags::LOAD | InstrFlags::STORE));
    assert!(flags.intersects(InstrFlags::LOAD | InstrFlags::STORE));
    assert_eq!(flags.intersection(InstrFlags::CMP), InstrFlags::CMP);
    assert_eq!(InstrFlags::NONE.bits(), 0);
}

#[test]
fn test_ram_wraps_at_size() {
    let mut ram = Ram::new(0x100);
    assert_eq!(ram.size(), 0x100);
    ram.write(0x8c00_00fe, 4, 0x1122_3344);
    assert_eq!(ram.read(0xfe, 2), 0x3344);
    assert_eq!(ram.read(0x0, 2), 0x1122);

    ram.load_u16s(0x10, &[0xe10a, 0x0009]);
    assert_eq!(ram.read(0x10, 4), 0x0009_e10a);
    ram.load_u32s(0x20, &[0xe3a0_0005]);
    assert_eq!(ram.read(0x20, 1), 0x05);
}

#[test]
#[should_panic(expected = "power of two")]
fn test_ram_rejects_odd_size() {
    Ram::new(0x180);
}
