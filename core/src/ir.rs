use crate::block::{Block, BlockId, Local, LocalId};
use crate::instr::{Instr, InstrId, MAX_INSTR_ARGS};
use crate::opcode::Opcode;
use crate::types::Type;
use crate::value::{Constant, Use, Value, ValueId};

/// Position where the next emitted instruction is inserted: directly
/// after `instr`, or at the head of `block` when `instr` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InsertPoint {
    pub block: Option<BlockId>,
    pub instr: Option<InstrId>,
}

/// IR container for one translation unit.
///
/// Owns every value, instruction, block and spill slot of the unit in
/// index-addressed arenas. Removed instructions keep their arena slot
/// but are unlinked from their block, so ids stay stable for the whole
/// lifetime of the unit.
pub struct Ir {
    values: Vec<Value>,
    instrs: Vec<Instr>,
    blocks: Vec<Block>,
    /// Blocks in program order.
    order: Vec<BlockId>,
    locals: Vec<Local>,
    locals_size: i32,
    point: InsertPoint,
}

impl Ir {
    pub fn new() -> Self {
        Self {
            values: Vec::with_capacity(256),
            instrs: Vec::with_capacity(256),
            blocks: Vec::with_capacity(8),
            order: Vec::with_capacity(8),
            locals: Vec::new(),
            locals_size: 0,
            point: InsertPoint::default(),
        }
    }

    // -- Values --

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id.0 as usize]
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// Type of a value.
    pub fn ty(&self, id: ValueId) -> Type {
        self.value(id).ty
    }

    pub fn is_constant(&self, id: ValueId) -> bool {
        self.value(id).is_constant()
    }

    pub fn alloc_const(&mut self, c: Constant) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value::new_const(c));
        id
    }

    pub fn alloc_i8(&mut self, v: i8) -> ValueId {
        self.alloc_const(Constant::I8(v))
    }

    pub fn alloc_i16(&mut self, v: i16) -> ValueId {
        self.alloc_const(Constant::I16(v))
    }

    pub fn alloc_i32(&mut self, v: i32) -> ValueId {
        self.alloc_const(Constant::I32(v))
    }

    pub fn alloc_i64(&mut self, v: i64) -> ValueId {
        self.alloc_const(Constant::I64(v))
    }

    pub fn alloc_f32(&mut self, v: f32) -> ValueId {
        self.alloc_const(Constant::F32(v))
    }

    pub fn alloc_f64(&mut self, v: f64) -> ValueId {
        self.alloc_const(Constant::F64(v))
    }

    pub fn alloc_str(&mut self, s: impl Into<String>) -> ValueId {
        self.alloc_const(Constant::Str(s.into()))
    }

    pub fn alloc_blk(&mut self, block: BlockId) -> ValueId {
        self.alloc_const(Constant::Blk(block))
    }

    /// Integer or float constant of `ty` built from raw bits.
    pub fn alloc_int(&mut self, ty: Type, bits: u64) -> ValueId {
        self.alloc_const(Constant::from_bits(ty, bits))
    }

    // -- Blocks --

    /// Append an empty block at the end of the unit.
    pub fn append_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        self.order.push(id);
        id
    }

    /// Insert an empty block directly after `after` in program order.
    pub fn insert_block_after(&mut self, after: BlockId) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        let pos = self
            .order
            .iter()
            .position(|&b| b == after)
            .map_or(self.order.len(), |p| p + 1);
        self.order.insert(pos, id);
        id
    }

    /// Blocks in program order.
    pub fn blocks(&self) -> &[BlockId] {
        &self.order
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn set_block_label(&mut self, id: BlockId, label: impl Into<String>) {
        self.block_mut(id).label = Some(label.into());
    }

    pub fn find_block(&self, label: &str) -> Option<BlockId> {
        self.order
            .iter()
            .copied()
            .find(|&b| self.block(b).label.as_deref() == Some(label))
    }

    /// Record a CFG edge; duplicate edges are ignored.
    pub fn add_edge(&mut self, src: BlockId, dst: BlockId) {
        let edges = &mut self.block_mut(src).edges;
        if !edges.contains(&dst) {
            edges.push(dst);
        }
    }

    // -- Instructions --

    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id.0 as usize]
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instr {
        &mut self.instrs[id.0 as usize]
    }

    pub fn first_instr(&self, block: BlockId) -> Option<InstrId> {
        self.block(block).head
    }

    pub fn last_instr(&self, block: BlockId) -> Option<InstrId> {
        self.block(block).tail
    }

    pub fn next_instr(&self, id: InstrId) -> Option<InstrId> {
        self.instr(id).next
    }

    pub fn prev_instr(&self, id: InstrId) -> Option<InstrId> {
        self.instr(id).prev
    }

    /// Snapshot of a block's instructions in order. Safe to hold while
    /// the block is mutated; callers skip entries removed meanwhile.
    pub fn block_instrs(&self, block: BlockId) -> Vec<InstrId> {
        let mut out = Vec::new();
        let mut cur = self.first_instr(block);
        while let Some(id) = cur {
            out.push(id);
            cur = self.next_instr(id);
        }
        out
    }

    /// Snapshot of every live instruction in program order.
    pub fn all_instrs(&self) -> Vec<InstrId> {
        self.order
            .iter()
            .flat_map(|&b| self.block_instrs(b))
            .collect()
    }

    /// Result value of an instruction that is known to produce one.
    pub fn result_of(&self, id: InstrId) -> ValueId {
        match self.instr(id).result {
            Some(v) => v,
            None => panic!("{} has no result", self.instr(id).op.name()),
        }
    }

    pub fn num_instrs(&self) -> usize {
        self.instrs.iter().filter(|i| !i.removed).count()
    }

    pub fn set_instr_label(&mut self, id: InstrId, label: impl Into<String>) {
        self.instr_mut(id).label = Some(label.into());
    }

    pub fn find_instr(&self, label: &str) -> Option<InstrId> {
        self.all_instrs()
            .into_iter()
            .find(|&i| self.instr(i).label.as_deref() == Some(label))
    }

    // -- Insert point --

    pub fn insert_point(&self) -> InsertPoint {
        self.point
    }

    pub fn set_insert_point(&mut self, point: InsertPoint) {
        self.point = point;
    }

    /// Continue emission at the end of `block`.
    pub fn set_current_block(&mut self, block: BlockId) {
        self.point = InsertPoint {
            block: Some(block),
            instr: self.block(block).tail,
        };
    }

    /// Continue emission directly after `instr`.
    pub fn set_current_instr(&mut self, instr: InstrId) {
        self.point = InsertPoint {
            block: Some(self.instr(instr).block),
            instr: Some(instr),
        };
    }

    /// Continue emission directly before `instr`.
    pub fn set_insert_point_before(&mut self, instr: InstrId) {
        self.point = InsertPoint {
            block: Some(self.instr(instr).block),
            instr: self.instr(instr).prev,
        };
    }

    /// Create an instruction at the insert point and advance the point
    /// past it. A block is appended first if none is current.
    pub fn append_instr(
        &mut self,
        op: Opcode,
        result_ty: Option<Type>,
    ) -> InstrId {
        let block = match self.point.block {
            Some(b) => b,
            None => {
                let b = self.append_block();
                self.point = InsertPoint {
                    block: Some(b),
                    instr: None,
                };
                b
            }
        };

        let id = InstrId(self.instrs.len() as u32);
        let mut instr = Instr::new(op, block);
        if let Some(ty) = result_ty {
            let v = ValueId(self.values.len() as u32);
            self.values.push(Value::new_def(ty, id));
            instr.result = Some(v);
        }
        self.instrs.push(instr);
        self.link_after(block, self.point.instr, id);
        self.point.instr = Some(id);
        id
    }

    fn link_after(
        &mut self,
        block: BlockId,
        after: Option<InstrId>,
        id: InstrId,
    ) {
        let next = match after {
            Some(a) => self.instr(a).next,
            None => self.block(block).head,
        };
        {
            let instr = self.instr_mut(id);
            instr.prev = after;
            instr.next = next;
        }
        match after {
            Some(a) => self.instr_mut(a).next = Some(id),
            None => self.block_mut(block).head = Some(id),
        }
        match next {
            Some(n) => self.instr_mut(n).prev = Some(id),
            None => self.block_mut(block).tail = Some(id),
        }
    }

    /// Detach an instruction from its block and drop its argument uses.
    ///
    /// The result must have no remaining uses; rewire them with
    /// `replace_uses` first.
    pub fn remove_instr(&mut self, id: InstrId) {
        assert!(!self.instr(id).removed, "instruction removed twice");
        if let Some(result) = self.instr(id).result {
            assert!(
                self.value(result).uses.is_empty(),
                "removing {} whose result is still used",
                self.instr(id).op.name()
            );
        }
        for n in 0..MAX_INSTR_ARGS {
            self.clear_arg(id, n);
        }

        let (block, prev, next) = {
            let instr = self.instr(id);
            (instr.block, instr.prev, instr.next)
        };
        match prev {
            Some(p) => self.instr_mut(p).next = next,
            None => self.block_mut(block).head = next,
        }
        match next {
            Some(n) => self.instr_mut(n).prev = prev,
            None => self.block_mut(block).tail = prev,
        }
        if self.point.instr == Some(id) {
            self.point.instr = prev;
        }

        let instr = self.instr_mut(id);
        instr.prev = None;
        instr.next = None;
        instr.removed = true;
    }

    pub fn set_arg(&mut self, instr: InstrId, n: usize, value: ValueId) {
        self.clear_arg(instr, n);
        self.instr_mut(instr).args[n] = Some(value);
        self.value_mut(value).uses.push(Use { instr, arg: n });
    }

    pub fn clear_arg(&mut self, instr: InstrId, n: usize) {
        if let Some(old) = self.instr_mut(instr).args[n].take() {
            self.value_mut(old)
                .uses
                .retain(|u| !(u.instr == instr && u.arg == n));
        }
    }

    /// Point every use of `from` at `to`.
    pub fn replace_uses(&mut self, from: ValueId, to: ValueId) {
        assert_ne!(from, to, "value replaced with itself");
        assert_eq!(
            self.ty(from),
            self.ty(to),
            "replacement value changes type"
        );
        let uses = std::mem::take(&mut self.value_mut(from).uses);
        for u in uses {
            self.instr_mut(u.instr).args[u.arg] = Some(to);
            self.value_mut(to).uses.push(u);
        }
    }

    // -- Locals --

    /// Allocate a naturally aligned spill slot of `ty`.
    pub fn alloc_local(&mut self, ty: Type) -> LocalId {
        let size = ty.size_bytes() as i32;
        assert!(size > 0, "no local storage for {ty}");
        let offset = (self.locals_size + size - 1) & !(size - 1);
        self.locals_size = offset + size;
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(Local { ty, offset });
        id
    }

    /// Register a slot at a known offset, e.g. one referenced by parsed
    /// `load_local`/`store_local` text.
    pub fn reserve_local(&mut self, ty: Type, offset: i32) -> LocalId {
        if let Some(pos) = self
            .locals
            .iter()
            .position(|l| l.offset == offset && l.ty == ty)
        {
            return LocalId(pos as u32);
        }
        self.locals_size = self.locals_size.max(offset + ty.size_bytes() as i32);
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(Local { ty, offset });
        id
    }

    pub fn local(&self, id: LocalId) -> Local {
        self.locals[id.0 as usize]
    }

    pub fn locals(&self) -> &[Local] {
        &self.locals
    }

    /// Bytes of local storage a backend must reserve for this unit.
    pub fn locals_size(&self) -> i32 {
        self.locals_size
    }
}

impl Default for Ir {
    fn default() -> Self {
        Self::new()
    }
}
