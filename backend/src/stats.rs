// Pass statistics: named counters bumped by the optimizer and the
// register allocator, dumped as an aligned table for diagnostics.

use std::fmt::Write as _;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Stat {
    LoadsRemoved = 0,
    StoresRemoved,
    CpropRemoved,
    ExpressionsSimplified,
    DeadRemoved,
    GprsSpilled,
    FprsSpilled,
}

pub const STAT_COUNT: usize = 7;

impl Stat {
    pub const ALL: [Stat; STAT_COUNT] = [
        Stat::LoadsRemoved,
        Stat::StoresRemoved,
        Stat::CpropRemoved,
        Stat::ExpressionsSimplified,
        Stat::DeadRemoved,
        Stat::GprsSpilled,
        Stat::FprsSpilled,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stat::LoadsRemoved => "context loads removed",
            Stat::StoresRemoved => "context stores removed",
            Stat::CpropRemoved => "constant propagations removed",
            Stat::ExpressionsSimplified => "expressions simplified",
            Stat::DeadRemoved => "dead instructions eliminated",
            Stat::GprsSpilled => "gprs spilled",
            Stat::FprsSpilled => "fprs spilled",
        }
    }
}

/// Counters shared by every pass of one JIT instance.
///
/// Created once when the JIT starts and handed to each pass by
/// mutable reference.
#[derive(Debug, Clone, Default)]
pub struct PassStats {
    counts: [u64; STAT_COUNT],
}

impl PassStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&mut self, stat: Stat) {
        self.add(stat, 1);
    }

    pub fn add(&mut self, stat: Stat, n: u64) {
        self.counts[stat as usize] += n;
    }

    pub fn get(&self, stat: Stat) -> u64 {
        self.counts[stat as usize]
    }

    pub fn reset(&mut self) {
        self.counts = [0; STAT_COUNT];
    }

    fn table(&self) -> String {
        let width = Stat::ALL.iter().map(|s| s.name().len()).max().unwrap_or(0);
        let mut out = String::new();
        let _ = writeln!(out, "===== Pass stats =====");
        for stat in Stat::ALL {
            let _ = writeln!(
                out,
                "{:<width$}  {:>8}",
                stat.name(),
                self.get(stat),
                width = width
            );
        }
        out
    }

    /// Write the table under a "Pass stats" banner.
    pub fn dump(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_all(self.table().as_bytes())
    }

    /// Send the table to the log at info level.
    pub fn log(&self) {
        for line in self.table().lines() {
            log::info!("{line}");
        }
    }
}
