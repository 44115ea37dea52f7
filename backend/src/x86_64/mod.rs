pub mod codegen;
pub mod emitter;
pub mod regs;

pub use codegen::X64Backend;
pub use regs::X64_REGISTERS;
