use crate::block::BlockId;
use crate::opcode::Opcode;
use crate::value::ValueId;

/// Maximum number of argument slots per instruction.
pub const MAX_INSTR_ARGS: usize = 3;

/// Index of an instruction in its owning `Ir` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

/// A single IR instruction.
///
/// Instructions are linked into their block's ordered list through
/// `prev`/`next` indices; removal unlinks without freeing the arena slot.
#[derive(Debug, Clone)]
pub struct Instr {
    pub op: Opcode,
    pub args: [Option<ValueId>; MAX_INSTR_ARGS],
    pub result: Option<ValueId>,
    /// Symbolic name used by the textual format.
    pub label: Option<String>,
    pub block: BlockId,
    pub(crate) prev: Option<InstrId>,
    pub(crate) next: Option<InstrId>,
    pub(crate) removed: bool,
}

impl Instr {
    pub(crate) fn new(op: Opcode, block: BlockId) -> Self {
        Self {
            op,
            args: [None; MAX_INSTR_ARGS],
            result: None,
            label: None,
            block,
            prev: None,
            next: None,
            removed: false,
        }
    }

    pub fn arg(&self, n: usize) -> Option<ValueId> {
        self.args[n]
    }

    /// Iterate the populated argument slots as `(slot, value)`.
    pub fn args(&self) -> impl Iterator<Item = (usize, ValueId)> + '_ {
        self.args
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.map(|v| (i, v)))
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }
}
