//! JIT execution engine: block cache and dispatch loop.
//!
//! Drives the lookup → compile → execute cycle for one guest CPU.
//! Compiled blocks are cached by guest address; each static exit of a
//! block remembers the block it last led to, so hot paths skip the
//! cache lookup.

pub mod block_cache;
pub mod exec_loop;

use std::path::PathBuf;

use thiserror::Error;

use jit_backend::BackendError;

pub use block_cache::{BlockCache, JitBlock};
pub use exec_loop::{Jit, RUN_SLICE};

/// Default size of a native code buffer: 8 MiB.
pub const DEFAULT_CODE_BUFFER_SIZE: usize = jit_backend::code_buffer::DEFAULT_CODE_BUF_SIZE;

#[derive(Debug, Error)]
pub enum JitError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-instance JIT settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitConfig {
    /// Short name used in log lines and perf map symbols.
    pub tag: String,
    /// Bytes of executable memory a native backend should map.
    pub code_buffer_size: usize,
    /// When set, every compiled block's unoptimized IR is written to
    /// `<dir>/ir/0x<guest addr>.ir`.
    pub dump_dir: Option<PathBuf>,
    /// Append compiled blocks to `/tmp/perf-<pid>.map`.
    pub perf_map: bool,
    /// Check each register allocation result.
    pub validate: bool,
    /// Compile guest memory accesses as direct host loads and stores
    /// when the guest maps its memory. A block whose access faults is
    /// recompiled without them; see [`Jit::handle_exception`].
    pub fastmem: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            tag: String::from("jit"),
            code_buffer_size: DEFAULT_CODE_BUFFER_SIZE,
            dump_dir: None,
            perf_map: false,
            validate: false,
            fastmem: false,
        }
    }
}

impl JitConfig {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `JIT_DUMP_DIR`, `JIT_PERF_MAP`,
    /// `JIT_VALIDATE` and `JIT_FASTMEM`.
    pub fn from_env(tag: impl Into<String>) -> Self {
        let mut config = Self::new(tag);
        if let Some(dir) = std::env::var_os("JIT_DUMP_DIR") {
            if !dir.is_empty() {
                config.dump_dir = Some(PathBuf::from(dir));
            }
        }
        config.perf_map = env_flag("JIT_PERF_MAP");
        config.validate = env_flag("JIT_VALIDATE");
        config.fastmem = env_flag("JIT_FASTMEM");
        config
    }

    pub fn with_code_buffer_size(mut self, size: usize) -> Self {
        self.code_buffer_size = size;
        self
    }

    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    pub fn with_perf_map(mut self, enabled: bool) -> Self {
        self.perf_map = enabled;
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate = enabled;
        self
    }

    pub fn with_fastmem(mut self, enabled: bool) -> Self {
        self.fastmem = enabled;
        self
    }
}

fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => parse_flag(&v),
        Err(_) => false,
    }
}

/// `1`, `true`, `yes` and `on` enable a flag; anything else disables it.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
