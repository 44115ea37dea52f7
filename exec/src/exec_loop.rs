//! Dispatch loop: find or compile the block at the guest pc, run it,
//! and follow its exits until the cycle budget is spent.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use jit_backend::{static_exits, Backend, BackendError, BlockExit, CodeHandle, PassStats, Pipeline};
use jit_core::guest::{ctx_read, ctx_write};
use jit_core::{write_ir, Guest, GuestOffsets, Ir};
use jit_frontend::Frontend;

use crate::block_cache::{BlockCache, JitBlock};
use crate::{JitConfig, JitError};

/// Longest run of guest cycles between interrupt checks.
pub const RUN_SLICE: i32 = 64;

/// A JIT for one guest CPU.
pub struct Jit<B: Backend> {
    config: JitConfig,
    frontend: Box<dyn Frontend>,
    backend: B,
    pipeline: Pipeline,
    cache: BlockCache,
    perf_map: Option<File>,
    compiled: u64,
}

impl<B: Backend> Jit<B> {
    pub fn new(config: JitConfig, frontend: Box<dyn Frontend>, backend: B) -> Result<Self, JitError> {
        let perf_map = if config.perf_map {
            let path = PathBuf::from(format!("/tmp/perf-{}.map", std::process::id()));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| JitError::Io { path, source })?;
            Some(file)
        } else {
            None
        };

        log::debug!(
            "{}: {} frontend, {} backend",
            config.tag,
            frontend.name(),
            backend.name()
        );

        let pipeline = Pipeline::new().with_validation(config.validate);
        Ok(Self {
            config,
            frontend,
            backend,
            pipeline,
            cache: BlockCache::new(),
            perf_map,
            compiled: 0,
        })
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn pass_stats(&self) -> &PassStats {
        &self.pipeline.stats
    }

    /// Number of blocks compiled since creation.
    pub fn compiled_blocks(&self) -> u64 {
        self.compiled
    }

    /// Send the pass statistics to the log.
    pub fn log_pass_stats(&self) {
        self.pipeline.stats.log();
    }

    // -- Compilation --

    /// Translate, optimize and assemble the block at `addr`, replacing
    /// any cached block there. A replaced block passes on its fastmem
    /// setting.
    pub fn compile_block(&mut self, guest: &mut dyn Guest, addr: u32) -> Result<CodeHandle, JitError> {
        let fastmem = match self.cache.get(addr) {
            Some(block) => {
                let fastmem = block.fastmem;
                self.free_block(addr);
                fastmem
            }
            None => self.config.fastmem,
        };

        let size = self.frontend.analyze_code(guest, addr);
        assert!(size > 0, "{}: empty block at 0x{addr:08x}", self.config.tag);

        let mut ir = Ir::new();
        self.frontend.translate_code(guest, addr, size, fastmem, &mut ir);

        if let Some(dir) = self.config.dump_dir.clone() {
            self.dump_block(&dir, guest, addr, size, &mut ir)?;
        }

        self.pipeline.optimize(&mut ir, self.backend.registers());

        let code = match self.backend.assemble(addr, &ir) {
            Ok(code) => code,
            Err(BackendError::Overflow) => {
                log::info!("backend overflow, resetting code cache");
                self.free_blocks();
                self.backend.assemble(addr, &ir)?
            }
            Err(e) => return Err(e.into()),
        };

        let host_addr = self.backend.code_addr(code);
        let host_size = self.backend.code_size(code);
        log::trace!(
            "{}: compiled 0x{addr:08x} ({size} guest bytes) -> {host_addr:#x} ({host_size} host bytes)",
            self.config.tag
        );

        if let Some(map) = self.perf_map.as_mut() {
            let line = format!("{host_addr:x} {host_size:x} {}_0x{addr:08x}\n", self.config.tag);
            if let Err(e) = map.write_all(line.as_bytes()) {
                log::warn!("{}: perf map write failed: {e}", self.config.tag);
            }
        }

        self.cache.insert(JitBlock::new(
            addr,
            size,
            code,
            host_addr,
            host_size,
            static_exits(&ir),
            fastmem,
        ));
        self.compiled += 1;
        Ok(code)
    }

    /// Write the block's disassembly and unoptimized IR to
    /// `<dir>/ir/0x<addr>.ir`.
    fn dump_block(
        &self,
        dir: &Path,
        guest: &mut dyn Guest,
        addr: u32,
        size: u32,
        ir: &mut Ir,
    ) -> Result<(), JitError> {
        let irdir = dir.join("ir");
        fs::create_dir_all(&irdir).map_err(|source| JitError::Io {
            path: irdir.clone(),
            source,
        })?;

        let path = irdir.join(format!("0x{addr:08x}.ir"));
        let result = File::create(&path).and_then(|file| {
            let mut w = BufWriter::new(file);
            self.frontend.dump_code(guest, addr, size, &mut w)?;
            write_ir(ir, &mut w)?;
            w.flush()
        });
        result.map_err(|source| JitError::Io { path, source })
    }

    // -- Invalidation --

    fn free_block(&mut self, addr: u32) {
        if let Some(code) = self.cache.remove(addr) {
            self.backend.free(code);
        }
    }

    /// Handle a fault raised by a direct memory access at host address
    /// `host_pc`. The block holding it loses fastmem and is recompiled
    /// with callback memory ops on its next lookup. Returns false when
    /// no fastmem block contains `host_pc`; the fault is not ours.
    pub fn handle_exception(&mut self, host_pc: usize) -> bool {
        let Some(addr) = self.cache.lookup_host(host_pc) else {
            return false;
        };
        let Some(block) = self.cache.get_mut(addr) else {
            return false;
        };
        if !block.fastmem {
            return false;
        }
        block.fastmem = false;

        log::debug!(
            "{}: fastmem fault at {host_pc:#x} in block 0x{addr:08x}, recompiling",
            self.config.tag
        );
        if let Some(code) = self.cache.invalidate(addr) {
            self.backend.free(code);
        }
        true
    }

    /// Evict every block overlapping `[addr, addr + len)`, e.g. after
    /// the guest wrote to its own code.
    pub fn invalidate_range(&mut self, addr: u32, len: u32) {
        for block in self.cache.overlapping(addr, len) {
            log::debug!("{}: invalidating block 0x{block:08x}", self.config.tag);
            self.free_block(block);
        }
    }

    /// Drop all compiled code but keep the cache entries; each is
    /// recompiled on its next lookup.
    pub fn invalidate_blocks(&mut self) {
        log::debug!("{}: invalidating {} blocks", self.config.tag, self.cache.len());
        for addr in self.cache.addrs() {
            if let Some(code) = self.cache.invalidate(addr) {
                self.backend.free(code);
            }
        }
    }

    /// Drop every block and reset the backend's code storage.
    pub fn free_blocks(&mut self) {
        for addr in self.cache.addrs() {
            self.cache.remove(addr);
        }
        self.cache.clear();
        self.backend.reset();
    }

    // -- Execution --

    fn lookup_or_compile(&mut self, guest: &mut dyn Guest, addr: u32) -> Result<CodeHandle, JitError> {
        match self.cache.lookup(addr) {
            Some(code) => Ok(code),
            None => self.compile_block(guest, addr),
        }
    }

    /// Run the guest for about `cycles` cycles and return the number
    /// actually consumed. Blocks run to completion, so the result may
    /// exceed the budget.
    pub fn run(&mut self, guest: &mut dyn Guest, cycles: i32) -> Result<i32, JitError> {
        let offsets = guest.offsets();
        write_i32(guest, offsets.cycles, cycles);
        write_i32(guest, offsets.instrs, 0);

        while read_i32(guest, offsets.cycles) > 0 {
            let remaining = read_i32(guest, offsets.cycles);
            let slice_end = remaining - remaining.min(RUN_SLICE);
            self.run_slice(guest, offsets, slice_end)?;
            guest.interrupt_check();
        }

        Ok(cycles - read_i32(guest, offsets.cycles))
    }

    /// Execute blocks until the remaining budget drops to `slice_end` or
    /// an interrupt is pending. At least one block runs.
    fn run_slice(&mut self, guest: &mut dyn Guest, offsets: GuestOffsets, slice_end: i32) -> Result<(), JitError> {
        let mut addr = read_i32(guest, offsets.pc) as u32;
        let mut code = self.lookup_or_compile(guest, addr)?;

        loop {
            let exit = self.backend.execute(code, guest);

            if read_i32(guest, offsets.cycles) <= slice_end
                || read_i32(guest, offsets.interrupts) != 0
            {
                return Ok(());
            }

            let pc = read_i32(guest, offsets.pc) as u32;
            let (next, next_code) = match exit {
                BlockExit::Static(slot) => match self.cache.linked(addr, slot) {
                    Some((dst, dst_code)) if dst == pc => (dst, dst_code),
                    _ => {
                        let dst_code = self.lookup_or_compile(guest, pc)?;
                        self.link_exit(addr, slot, pc);
                        (pc, dst_code)
                    }
                },
                BlockExit::Dynamic => (pc, self.lookup_or_compile(guest, pc)?),
            };
            addr = next;
            code = next_code;
        }
    }

    /// Remember that exit `slot` of `src` leads to `dst` when it really
    /// is the exit's constant target.
    fn link_exit(&mut self, src: u32, slot: u32, dst: u32) {
        let is_target = self
            .cache
            .get(src)
            .and_then(|b| b.exits.get(slot as usize))
            .map_or(false, |&target| target == dst);
        if is_target {
            self.cache.link(src, slot, dst);
        }
    }
}

fn read_i32(guest: &mut dyn Guest, offset: i32) -> i32 {
    // SAFETY: the offsets come from the guest's description of its own
    // context.
    unsafe { ctx_read(guest, offset, 4) as u32 as i32 }
}

fn write_i32(guest: &mut dyn Guest, offset: i32, value: i32) {
    // SAFETY: as for read_i32.
    unsafe { ctx_write(guest, offset, 4, value as u32 as u64) }
}
