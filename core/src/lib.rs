pub mod block;
pub mod dump;
pub mod guest;
pub mod instr;
pub mod ir;
pub mod ir_builder;
pub mod opcode;
pub mod parse;
pub mod types;
pub mod value;

pub use block::{Block, BlockId, Local, LocalId};
pub use dump::{assign_default_labels, to_text, write_ir};
pub use guest::{CallFn, FallbackFn, FastMem, Guest, GuestOffsets};
pub use instr::{Instr, InstrId, MAX_INSTR_ARGS};
pub use ir::{InsertPoint, Ir};
pub use opcode::{OpDef, OpFlags, Opcode, OPCODE_DEFS};
pub use parse::{parse_ir, read_ir, ParseError};
pub use types::{Type, FLOAT_TYPES, INT_TYPES, TYPE_COUNT, VECTOR_TYPES};
pub use value::{Constant, Use, Value, ValueId, ValueKind};
