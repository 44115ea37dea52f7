use jit_core::Ir;

use crate::dce::dead_code_elimination;
use crate::lse::load_store_elimination;
use crate::optimize::{constant_propagation, FoldTable};
use crate::regalloc::{register_allocation, validate_allocation, Register};
use crate::simplify::expression_simplification;
use crate::stats::PassStats;

/// One IR pass, as named on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    Lse,
    Cprop,
    Esimp,
    Dce,
    Ra,
}

impl Pass {
    /// Default pipeline order.
    pub const ALL: [Pass; 5] = [Pass::Lse, Pass::Cprop, Pass::Esimp, Pass::Dce, Pass::Ra];

    pub fn name(self) -> &'static str {
        match self {
            Pass::Lse => "lse",
            Pass::Cprop => "cprop",
            Pass::Esimp => "esimp",
            Pass::Dce => "dce",
            Pass::Ra => "ra",
        }
    }

    pub fn from_name(name: &str) -> Option<Pass> {
        Pass::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }
}

/// Optimization pipeline: the fold table built once, the statistics
/// shared by every pass, and whether allocation is checked afterwards.
pub struct Pipeline {
    folds: FoldTable,
    pub stats: PassStats,
    validate: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            folds: FoldTable::new(),
            stats: PassStats::new(),
            validate: false,
        }
    }

    /// Check every allocation result; a bad allocation panics.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn run_pass(&mut self, pass: Pass, ir: &mut Ir, regs: &[Register]) {
        match pass {
            Pass::Lse => load_store_elimination(ir, &mut self.stats),
            Pass::Cprop => constant_propagation(ir, &self.folds, &mut self.stats),
            Pass::Esimp => expression_simplification(ir, &mut self.stats),
            Pass::Dce => dead_code_elimination(ir, &mut self.stats),
            Pass::Ra => {
                register_allocation(ir, regs, &mut self.stats);
                if self.validate {
                    if let Err(e) = validate_allocation(ir, regs) {
                        panic!("register allocation failed validation: {e}");
                    }
                }
            }
        }
    }

    /// Run every pass in pipeline order, leaving `ir` ready for a
    /// backend with registers `regs`.
    pub fn optimize(&mut self, ir: &mut Ir, regs: &[Register]) {
        for pass in Pass::ALL {
            self.run_pass(pass, ir, regs);
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
