//! jit-irdump: run optimization passes over textual IR.
//!
//! Reads a unit in the textual IR format, applies the requested passes
//! in order, and prints the result in the same format.

use jit_backend::x86_64::X64_REGISTERS;
use jit_backend::{Pass, Pipeline};
use jit_core::{parse_ir, to_text, Ir, ParseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IrdumpError {
    #[error("unknown pass '{0}' (expected one of lse, cprop, esimp, dce, ra)")]
    UnknownPass(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Value parser for `--pass`.
pub fn parse_pass(name: &str) -> Result<Pass, IrdumpError> {
    Pass::from_name(name).ok_or_else(|| IrdumpError::UnknownPass(name.to_string()))
}

/// Parse `src`, run `passes` in order, and render the result. Register
/// allocation targets the x86-64 backend's register file.
pub fn process(src: &str, passes: &[Pass], pipeline: &mut Pipeline) -> Result<String, IrdumpError> {
    let mut ir = Ir::new();
    parse_ir(src, &mut ir)?;
    for &pass in passes {
        log::debug!("running {}", pass.name());
        pipeline.run_pass(pass, &mut ir, &X64_REGISTERS);
    }
    Ok(to_text(&mut ir))
}
