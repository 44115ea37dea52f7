pub mod code_buffer;
pub mod dce;
pub mod interp;
pub mod lse;
pub mod optimize;
pub mod regalloc;
pub mod simplify;
pub mod stats;
pub mod translate;
pub mod x86_64;

use std::io::Write;

use thiserror::Error;

use jit_core::{Guest, Ir, Opcode, Type};

pub use code_buffer::CodeBuffer;
pub use interp::InterpBackend;
pub use optimize::FoldTable;
pub use regalloc::{register_allocation, validate_allocation, Register};
pub use stats::{PassStats, Stat};
pub use translate::{Pass, Pipeline};
pub use x86_64::X64Backend;

#[derive(Debug, Error)]
pub enum BackendError {
    /// No room left for the block; flush the cache and retry.
    #[error("code buffer overflow")]
    Overflow,
    #[error("{op} on {ty} is not supported by this backend")]
    Unsupported { op: &'static str, ty: Type },
    #[error("code buffer: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to an assembled block inside its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeHandle(pub usize);

/// How control left a block. The guest pc has been written to the
/// context in both cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockExit {
    /// Branch to the constant target at this index of
    /// [`static_exits`].
    Static(u32),
    /// Branch to a computed target.
    Dynamic,
}

/// Exit code a native block returns for a computed target.
pub const DYNAMIC_EXIT: u32 = u32::MAX;

/// Trait for host code generators.
///
/// A backend turns register-allocated IR into something it can run
/// against a guest and owns the storage for the result.
pub trait Backend {
    fn name(&self) -> &'static str;

    /// Registers the allocator may assign, indexed by `Value::reg`.
    fn registers(&self) -> &[Register];

    fn assemble(
        &mut self,
        guest_addr: u32,
        ir: &Ir,
    ) -> Result<CodeHandle, BackendError>;

    /// Run one block to its exit.
    fn execute(&mut self, code: CodeHandle, guest: &mut dyn Guest) -> BlockExit;

    /// Release one block. Space may only be reclaimed by `reset`.
    fn free(&mut self, code: CodeHandle);

    /// Drop every block.
    fn reset(&mut self);

    /// Host address of the block's code, for profilers.
    fn code_addr(&self, code: CodeHandle) -> usize;

    fn code_size(&self, code: CodeHandle) -> usize;

    fn dump_code(&self, code: CodeHandle, w: &mut dyn Write) -> std::io::Result<()>;
}

/// Distinct constant guest addresses the unit branches to, in program
/// order. A block's static exits are numbered by this list.
pub fn static_exits(ir: &Ir) -> Vec<u32> {
    let mut exits = Vec::new();
    for instr in ir.all_instrs() {
        let i = ir.instr(instr);
        let target = match i.op {
            Opcode::Branch => i.arg(0),
            Opcode::BranchTrue | Opcode::BranchFalse => i.arg(1),
            _ => None,
        };
        let Some(target) = target else {
            continue;
        };
        let v = ir.value(target);
        if v.is_constant() && v.ty == Type::I32 {
            let addr = v.i32() as u32;
            if !exits.contains(&addr) {
                exits.push(addr);
            }
        }
    }
    exits
}

/// Index of `addr` in [`static_exits`].
pub fn exit_slot(exits: &[u32], addr: u32) -> u32 {
    match exits.iter().position(|&a| a == addr) {
        Some(slot) => slot as u32,
        None => panic!("0x{addr:08x} is not a static exit"),
    }
}

/// Hex dump used by backends without a disassembler.
pub(crate) fn dump_hex(bytes: &[u8], base: usize, w: &mut dyn Write) -> std::io::Result<()> {
    for (n, chunk) in bytes.chunks(16).enumerate() {
        write!(w, "{:#014x}:", base + n * 16)?;
        for b in chunk {
            write!(w, " {b:02x}")?;
        }
        writeln!(w)?;
    }
    Ok(())
}
