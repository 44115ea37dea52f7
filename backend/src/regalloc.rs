// Second-chance binpacking register allocator.
//
// Every instruction result becomes a temporary. Each host register is
// a bin that holds at most one temporary at a time. Blocks are walked
// as a tree rooted at the unit's entry: a child starts from a copy of
// its parent's exit state and the state is popped again afterwards, so
// decisions on one path never leak into a sibling. Paths that meet
// again are not reconciled.

use std::collections::HashMap;

use thiserror::Error;

use jit_core::{BlockId, InstrId, Ir, LocalId, Type, ValueId, MAX_INSTR_ARGS};

use crate::stats::{PassStats, Stat};

/// A host register as seen by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub name: &'static str,
    /// Mask of the value types the register can hold.
    pub value_types: u32,
}

impl Register {
    pub const fn new(name: &'static str, value_types: u32) -> Self {
        Self { name, value_types }
    }

    pub fn can_store(&self, ty: Type) -> bool {
        self.value_types & ty.mask() == ty.mask()
    }
}

/// A value's remaining occurrence at an instruction position.
#[derive(Debug, Clone, Copy)]
struct RaUse {
    ordinal: i32,
    next: Option<usize>,
}

/// Allocation candidate. `value` is the value currently holding the
/// temporary in a register; `None` once it has been spilled.
#[derive(Debug, Clone, Copy, Default)]
struct Tmp {
    next_use: Option<usize>,
    last_use: Option<usize>,
    value: Option<ValueId>,
    slot: Option<LocalId>,
}

#[derive(Debug, Clone)]
struct RaState {
    /// Temporary packed in each bin.
    bins: Vec<Option<usize>>,
    tmps: Vec<Tmp>,
}

/// Blocks in allocation order: a depth-first tree over CFG edges,
/// with any block not reached from an earlier root starting a tree of
/// its own.
struct BlockTree {
    roots: Vec<BlockId>,
    children: HashMap<BlockId, Vec<BlockId>>,
}

impl BlockTree {
    fn build(ir: &Ir) -> Self {
        let mut tree = BlockTree {
            roots: Vec::new(),
            children: HashMap::new(),
        };
        let mut seen = std::collections::HashSet::new();
        for &block in ir.blocks() {
            if !seen.insert(block) {
                continue;
            }
            tree.roots.push(block);
            let mut stack = vec![block];
            while let Some(b) = stack.pop() {
                let mut kids = Vec::new();
                for &dst in &ir.block(b).edges {
                    if seen.insert(dst) {
                        kids.push(dst);
                    }
                }
                // preserve edge order when popping
                stack.extend(kids.iter().rev().copied());
                tree.children.insert(b, kids);
            }
        }
        tree
    }

    fn children(&self, block: BlockId) -> &[BlockId] {
        self.children.get(&block).map_or(&[], |c| c.as_slice())
    }

    /// Pre-order listing of every block.
    fn preorder(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        for &root in &self.roots {
            let mut stack = vec![root];
            while let Some(b) = stack.pop() {
                out.push(b);
                stack.extend(self.children(b).iter().rev().copied());
            }
        }
        out
    }
}

struct Allocator<'a> {
    regs: &'a [Register],
    uses: Vec<RaUse>,
    ordinals: HashMap<InstrId, i32>,
    /// Temporary owning each value, fills included.
    tmp_of: HashMap<ValueId, usize>,
    states: Vec<RaState>,
}

impl<'a> Allocator<'a> {
    fn new(regs: &'a [Register]) -> Self {
        Self {
            regs,
            uses: Vec::new(),
            ordinals: HashMap::new(),
            tmp_of: HashMap::new(),
            states: vec![RaState {
                bins: vec![None; regs.len()],
                tmps: Vec::new(),
            }],
        }
    }

    fn state(&mut self) -> &mut RaState {
        match self.states.last_mut() {
            Some(s) => s,
            None => unreachable!("allocator state stack is empty"),
        }
    }

    fn push_state(&mut self) {
        let top = self.state().clone();
        self.states.push(top);
    }

    fn pop_state(&mut self) {
        self.states.pop();
    }

    fn ordinal(&self, instr: InstrId) -> i32 {
        self.ordinals[&instr]
    }

    // -- Setup --

    fn assign_ordinals(&mut self, ir: &Ir, order: &[BlockId]) {
        // Leave room for a fill in front of every argument slot.
        let mut ordinal = 0;
        for &block in order {
            for instr in ir.block_instrs(block) {
                self.ordinals.insert(instr, ordinal);
                ordinal += 1 + MAX_INSTR_ARGS as i32;
            }
        }
    }

    fn add_use(&mut self, tmp: usize, ordinal: i32) {
        let idx = self.uses.len();
        self.uses.push(RaUse {
            ordinal,
            next: None,
        });
        let prev = self.state().tmps[tmp].last_use;
        match prev {
            Some(last) => self.uses[last].next = Some(idx),
            None => self.state().tmps[tmp].next_use = Some(idx),
        }
        self.state().tmps[tmp].last_use = Some(idx);
    }

    fn create_temporaries(&mut self, ir: &Ir, order: &[BlockId]) {
        for &block in order {
            for instr in ir.block_instrs(block) {
                let ordinal = self.ordinal(instr);
                let i = ir.instr(instr);

                // The definition counts as the first use.
                if let Some(result) = i.result {
                    let state = self.state();
                    let tmp = state.tmps.len();
                    state.tmps.push(Tmp::default());
                    self.tmp_of.insert(result, tmp);
                    self.add_use(tmp, ordinal);
                }

                for (_, arg) in i.args() {
                    if ir.is_constant(arg) {
                        continue;
                    }
                    let tmp = *self.tmp_of.get(&arg).unwrap_or_else(|| {
                        panic!("argument of {} used before definition", i.op.name())
                    });
                    self.add_use(tmp, ordinal);
                }
            }
        }
    }

    // -- Bins --

    fn pack_bin(&mut self, ir: &mut Ir, bin: usize, new_tmp: Option<usize>) {
        let state = self.state();
        if let Some(old) = state.bins[bin] {
            state.tmps[old].value = None;
        }
        if let Some(new) = new_tmp {
            if let Some(v) = state.tmps[new].value {
                ir.value_mut(v).reg = Some(bin as u8);
            }
        }
        state.bins[bin] = new_tmp;
    }

    fn expire(&mut self, ir: &mut Ir, current: InstrId) {
        let current = self.ordinal(current);
        for bin in 0..self.regs.len() {
            let Some(tmp) = self.state().bins[bin] else {
                continue;
            };
            loop {
                let Some(next) = self.state().tmps[tmp].next_use else {
                    self.pack_bin(ir, bin, None);
                    break;
                };
                let u = self.uses[next];
                if u.ordinal >= current {
                    break;
                }
                match u.next {
                    Some(n) => self.state().tmps[tmp].next_use = Some(n),
                    None => {
                        self.pack_bin(ir, bin, None);
                        break;
                    }
                }
            }
        }
    }

    // -- Allocation --

    /// Take over the first argument's register when this instruction is
    /// that argument's last use.
    fn reuse_arg_reg(
        &mut self,
        ir: &mut Ir,
        tmp: usize,
        ty: Type,
        def: InstrId,
    ) -> bool {
        let Some(arg) = ir.instr(def).arg(0) else {
            return false;
        };
        if ir.is_constant(arg) {
            return false;
        }
        let Some(&arg_tmp) = self.tmp_of.get(&arg) else {
            return false;
        };
        let t = self.state().tmps[arg_tmp];
        let (Some(current), Some(next)) = (t.value, t.next_use) else {
            return false;
        };
        if self.uses[next].next.is_some() {
            return false;
        }
        let Some(reg) = ir.value(current).reg else {
            return false;
        };
        if !self.regs[reg as usize].can_store(ty) {
            return false;
        }
        self.pack_bin(ir, reg as usize, Some(tmp));
        true
    }

    fn alloc_free_reg(&mut self, ir: &mut Ir, tmp: usize, ty: Type) -> bool {
        let bin = (0..self.regs.len()).find(|&b| {
            self.states[self.states.len() - 1].bins[b].is_none()
                && self.regs[b].can_store(ty)
        });
        match bin {
            Some(bin) => {
                self.pack_bin(ir, bin, Some(tmp));
                true
            }
            None => false,
        }
    }

    /// Evict the occupant whose next use is furthest away.
    fn alloc_blocked_reg(
        &mut self,
        ir: &mut Ir,
        tmp: usize,
        value: ValueId,
        stats: &mut PassStats,
    ) -> bool {
        let ty = ir.ty(value);
        let mut victim: Option<(usize, i32)> = None;
        for bin in 0..self.regs.len() {
            let Some(packed) = self.state().bins[bin] else {
                continue;
            };
            if !self.regs[bin].can_store(ty) {
                continue;
            }
            let Some(next) = self.state().tmps[packed].next_use else {
                continue;
            };
            let ordinal = self.uses[next].ordinal;
            if victim.map_or(true, |(_, furthest)| ordinal > furthest) {
                victim = Some((bin, ordinal));
            }
        }
        let Some((bin, _)) = victim else {
            return false;
        };

        let Some(spill_tmp) = self.state().bins[bin] else {
            return false;
        };
        let spilled = self.state().tmps[spill_tmp];
        if spilled.slot.is_none() {
            let Some(spill_value) = spilled.value else {
                return false;
            };
            let Some(def) = ir.value(value).def() else {
                return false;
            };
            let spill_ty = ir.ty(spill_value);

            // Store the victim right before the instruction that takes
            // over its register.
            let saved = ir.insert_point();
            ir.set_insert_point_before(def);
            let slot = ir.alloc_local(spill_ty);
            ir.store_local(slot, spill_value);
            ir.set_insert_point(saved);

            self.state().tmps[spill_tmp].slot = Some(slot);
            stats.inc(if spill_ty.is_int() {
                Stat::GprsSpilled
            } else {
                Stat::FprsSpilled
            });
        }

        self.pack_bin(ir, bin, Some(tmp));
        true
    }

    fn alloc(&mut self, ir: &mut Ir, value: ValueId, stats: &mut PassStats) {
        let tmp = self.tmp_of[&value];
        self.state().tmps[tmp].value = Some(value);
        let ty = ir.ty(value);
        let Some(def) = ir.value(value).def() else {
            return;
        };

        if self.reuse_arg_reg(ir, tmp, ty, def)
            || self.alloc_free_reg(ir, tmp, ty)
            || self.alloc_blocked_reg(ir, tmp, value, stats)
        {
            return;
        }
        panic!("Failed to allocate register for {ty}");
    }

    /// Point argument `n` at its temporary's current value, filling it
    /// from the spill slot first when needed.
    fn rewrite_arg(
        &mut self,
        ir: &mut Ir,
        instr: InstrId,
        n: usize,
        stats: &mut PassStats,
    ) {
        let Some(value) = ir.instr(instr).arg(n) else {
            return;
        };
        if ir.is_constant(value) {
            return;
        }
        let tmp = self.tmp_of[&value];

        if self.state().tmps[tmp].value.is_none() {
            let slot = self.state().tmps[tmp].slot.unwrap_or_else(|| {
                panic!(
                    "argument {n} of {} is neither in a register nor spilled",
                    ir.instr(instr).op.name()
                )
            });

            let saved = ir.insert_point();
            ir.set_insert_point_before(instr);
            let fill = ir.load_local(slot);
            ir.set_insert_point(saved);

            let Some(fill_instr) = ir.value(fill).def() else {
                unreachable!("fill without a defining instruction");
            };
            let ordinal = self.ordinal(instr) - MAX_INSTR_ARGS as i32 + n as i32;
            self.ordinals.insert(fill_instr, ordinal);
            self.tmp_of.insert(fill, tmp);
            self.alloc(ir, fill, stats);
        }

        let current = match self.state().tmps[tmp].value {
            Some(v) => v,
            None => unreachable!("filled temporary lost its value"),
        };
        if current != value {
            ir.set_arg(instr, n, current);
        }
    }

    fn visit(&mut self, ir: &mut Ir, tree: &BlockTree, block: BlockId, stats: &mut PassStats) {
        // Fills and spills inserted below are not part of the snapshot.
        for instr in ir.block_instrs(block) {
            self.expire(ir, instr);
            for n in 0..MAX_INSTR_ARGS {
                self.rewrite_arg(ir, instr, n, stats);
            }
            if let Some(result) = ir.instr(instr).result {
                self.alloc(ir, result, stats);
            }
        }

        for &child in tree.children(block) {
            self.push_state();
            self.visit(ir, tree, child, stats);
            self.pop_state();
        }
    }
}

/// Assign a host register from `regs` to every instruction result of
/// `ir`, inserting spills and fills as needed.
///
/// Panics when some result type fits no register at all.
pub fn register_allocation(ir: &mut Ir, regs: &[Register], stats: &mut PassStats) {
    let tree = BlockTree::build(ir);
    let order = tree.preorder();

    let mut ra = Allocator::new(regs);
    ra.assign_ordinals(ir, &order);
    ra.create_temporaries(ir, &order);
    for &root in &tree.roots {
        ra.push_state();
        ra.visit(ir, &tree, root, stats);
        ra.pop_state();
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("argument {slot} of {op} has no register")]
    Unallocated { op: &'static str, slot: usize },
    #[error("argument {slot} of {op} expected in {reg}, which holds another value")]
    Clobbered {
        op: &'static str,
        slot: usize,
        reg: &'static str,
    },
}

fn validate_block(
    ir: &Ir,
    regs: &[Register],
    tree: &BlockTree,
    block: BlockId,
    mut active: Vec<Option<ValueId>>,
) -> Result<(), ValidationError> {
    for instr in ir.block_instrs(block) {
        let i = ir.instr(instr);
        for (slot, arg) in i.args() {
            if ir.is_constant(arg) {
                continue;
            }
            let op = i.op.name();
            let reg = ir
                .value(arg)
                .reg
                .ok_or(ValidationError::Unallocated { op, slot })?;
            if active[reg as usize] != Some(arg) {
                return Err(ValidationError::Clobbered {
                    op,
                    slot,
                    reg: regs[reg as usize].name,
                });
            }
        }
        if let Some(result) = i.result {
            if let Some(reg) = ir.value(result).reg {
                active[reg as usize] = Some(result);
            }
        }
    }
    for &child in tree.children(block) {
        validate_block(ir, regs, tree, child, active.clone())?;
    }
    Ok(())
}

/// Check that at every instruction each register-resident argument is
/// the value its register actually holds at that point.
pub fn validate_allocation(ir: &Ir, regs: &[Register]) -> Result<(), ValidationError> {
    let tree = BlockTree::build(ir);
    for &root in &tree.roots {
        validate_block(ir, regs, &tree, root, vec![None; regs.len()])?;
    }
    Ok(())
}
