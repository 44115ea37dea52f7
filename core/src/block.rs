use crate::instr::InstrId;
use crate::types::Type;

/// Index of a block in its owning `Ir` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// An ordered run of instructions with outgoing CFG edges.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub label: Option<String>,
    pub(crate) head: Option<InstrId>,
    pub(crate) tail: Option<InstrId>,
    /// Successor blocks, in the order the edges were added.
    pub edges: Vec<BlockId>,
}

impl Block {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// Index of a spill slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

/// A typed spill slot at a fixed offset of the unit's local area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Local {
    pub ty: Type,
    pub offset: i32,
}
