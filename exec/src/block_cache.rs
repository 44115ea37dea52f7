use std::collections::BTreeMap;

use jit_backend::CodeHandle;

/// One compiled guest block.
///
/// `links[slot]` is the guest address of the block static exit `slot`
/// was last seen to reach; `incoming` lists the `(source, slot)` pairs
/// linked to this block, so both ends can be cut on invalidation.
#[derive(Debug, Clone)]
pub struct JitBlock {
    pub guest_addr: u32,
    pub guest_size: u32,
    /// `None` once the code has been dropped; the entry is recompiled on
    /// its next lookup.
    pub code: Option<CodeHandle>,
    pub host_addr: usize,
    pub host_size: usize,
    /// Constant branch targets, numbered as the backend numbers exits.
    pub exits: Vec<u32>,
    pub links: Vec<Option<u32>>,
    pub incoming: Vec<(u32, u32)>,
    /// Guest memory is accessed directly through the guest's host
    /// mapping. Cleared for good once such an access faults.
    pub fastmem: bool,
}

impl JitBlock {
    pub fn new(
        guest_addr: u32,
        guest_size: u32,
        code: CodeHandle,
        host_addr: usize,
        host_size: usize,
        exits: Vec<u32>,
        fastmem: bool,
    ) -> Self {
        let links = vec![None; exits.len()];
        Self {
            guest_addr,
            guest_size,
            code: Some(code),
            host_addr,
            host_size,
            exits,
            links,
            incoming: Vec::new(),
            fastmem,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.code.is_none()
    }

    /// Whether the block's guest bytes overlap `[addr, addr + len)`.
    pub fn overlaps(&self, addr: u32, len: u32) -> bool {
        let begin = self.guest_addr as u64;
        let end = begin + self.guest_size as u64;
        let lo = addr as u64;
        let hi = lo + len as u64;
        begin < hi && lo < end
    }

    fn contains_host(&self, host_addr: usize) -> bool {
        !self.is_stale() && (self.host_addr..self.host_addr + self.host_size).contains(&host_addr)
    }
}

/// Compiled blocks keyed by guest start address, with a second index
/// from the host address of each runnable block's code.
#[derive(Debug, Default)]
pub struct BlockCache {
    blocks: BTreeMap<u32, JitBlock>,
    by_host: BTreeMap<usize, u32>,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: u32) -> Option<&JitBlock> {
        self.blocks.get(&addr)
    }

    pub fn get_mut(&mut self, addr: u32) -> Option<&mut JitBlock> {
        self.blocks.get_mut(&addr)
    }

    /// Runnable code for the block at `addr`, if any.
    pub fn lookup(&self, addr: u32) -> Option<CodeHandle> {
        self.blocks.get(&addr).and_then(|b| b.code)
    }

    /// Insert a freshly compiled block. Any previous entry must have
    /// been removed first.
    pub fn insert(&mut self, block: JitBlock) {
        assert!(
            block.incoming.is_empty() && block.links.iter().all(|l| l.is_none()),
            "block 0x{:08x} inserted with live edges",
            block.guest_addr
        );
        let addr = block.guest_addr;
        if !block.is_stale() {
            self.by_host.insert(block.host_addr, addr);
        }
        let prev = self.blocks.insert(addr, block);
        assert!(prev.is_none(), "block 0x{addr:08x} is already cached");
    }

    /// Record that static exit `slot` of `src` reaches `dst`.
    pub fn link(&mut self, src: u32, slot: u32, dst: u32) {
        let dst_ok = self.blocks.get(&dst).map_or(false, |b| !b.is_stale());
        if !dst_ok {
            return;
        }
        let Some(src_block) = self.blocks.get_mut(&src) else {
            return;
        };
        if src_block.is_stale() {
            return;
        }
        let Some(link) = src_block.links.get_mut(slot as usize) else {
            return;
        };
        if *link == Some(dst) {
            return;
        }
        let old = link.replace(dst);
        if let Some(old) = old {
            self.drop_incoming(old, src, slot);
        }
        if let Some(dst_block) = self.blocks.get_mut(&dst) {
            dst_block.incoming.push((src, slot));
        }
    }

    /// Successor recorded for exit `slot` of `src`, if still runnable.
    pub fn linked(&self, src: u32, slot: u32) -> Option<(u32, CodeHandle)> {
        let dst = self.blocks.get(&src)?.links.get(slot as usize).copied()??;
        Some((dst, self.lookup(dst)?))
    }

    /// Cut every edge into and out of the block at `addr` and take its
    /// code. The entry stays in the cache, stale.
    pub fn invalidate(&mut self, addr: u32) -> Option<CodeHandle> {
        let block = self.blocks.get_mut(&addr)?;
        if block.code.is_some() && self.by_host.get(&block.host_addr) == Some(&addr) {
            self.by_host.remove(&block.host_addr);
        }
        let code = block.code.take();
        let incoming = std::mem::take(&mut block.incoming);
        let outgoing: Vec<(u32, u32)> = block
            .links
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, link)| link.take().map(|dst| (slot as u32, dst)))
            .collect();

        // 1. Incoming edges fall back to the cache lookup.
        for (src, slot) in incoming {
            if let Some(src_block) = self.blocks.get_mut(&src) {
                if let Some(link) = src_block.links.get_mut(slot as usize) {
                    if *link == Some(addr) {
                        *link = None;
                    }
                }
            }
        }

        // 2. Outgoing edges.
        for (slot, dst) in outgoing {
            self.drop_incoming(dst, addr, slot);
        }

        code
    }

    /// Invalidate the block at `addr` and drop its entry.
    pub fn remove(&mut self, addr: u32) -> Option<CodeHandle> {
        let code = self.invalidate(addr);
        self.blocks.remove(&addr);
        code
    }

    /// Start addresses of blocks whose guest bytes overlap
    /// `[addr, addr + len)`.
    pub fn overlapping(&self, addr: u32, len: u32) -> Vec<u32> {
        // A block starting below `addr` may still reach into the range,
        // so the scan can't start at `addr`.
        let end = addr as u64 + len as u64;
        self.blocks
            .values()
            .take_while(|b| (b.guest_addr as u64) < end)
            .filter(|b| b.overlaps(addr, len))
            .map(|b| b.guest_addr)
            .collect()
    }

    /// Guest address of the runnable block whose code contains
    /// `host_addr`.
    pub fn lookup_host(&self, host_addr: usize) -> Option<u32> {
        let (_, &addr) = self.by_host.range(..=host_addr).next_back()?;
        let block = self.blocks.get(&addr)?;
        block.contains_host(host_addr).then_some(addr)
    }

    pub fn addrs(&self) -> Vec<u32> {
        self.blocks.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JitBlock> {
        self.blocks.values()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.by_host.clear();
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn drop_incoming(&mut self, dst: u32, src: u32, slot: u32) {
        if let Some(dst_block) = self.blocks.get_mut(&dst) {
            dst_block.incoming.retain(|&edge| edge != (src, slot));
        }
    }
}
