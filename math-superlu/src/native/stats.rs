//! Solver statistics
//!
//! [`SolverStats`] is the solver's own record: its operation and timing
//! tables are solver allocations, initialised and freed explicitly like any
//! other solver resource. [`Statistics`] is the plain snapshot handed back to
//! callers.

use super::alloc::NativeBuf;
use std::time::{Duration, Instant};

/// Stage of a solver call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Equil,
    ColPerm,
    RowPerm,
    Fact,
    Rcond,
    Solve,
    Refine,
}

const NPHASES: usize = 7;

impl Phase {
    fn is_factor(self) -> bool {
        matches!(
            self,
            Phase::Equil | Phase::ColPerm | Phase::RowPerm | Phase::Fact | Phase::Rcond
        )
    }
}

/// Statistics gathered by one solver call
#[derive(Debug, Default)]
pub(crate) struct SolverStats {
    ops: Option<NativeBuf<f64>>,
    utime: Option<NativeBuf<f64>>,
    pub tiny_pivots: usize,
    pub refine_steps: usize,
    pub panels: usize,
    pub nsuper: usize,
    pub rpg: Option<f64>,
    pub rcond: Option<f64>,
}

impl SolverStats {
    /// Allocate the per-phase tables
    pub fn init(&mut self) {
        self.ops = Some(NativeBuf::zeroed(NPHASES));
        self.utime = Some(NativeBuf::zeroed(NPHASES));
        self.tiny_pivots = 0;
        self.refine_steps = 0;
        self.panels = 0;
        self.nsuper = 0;
        self.rpg = None;
        self.rcond = None;
    }

    /// Free the tables; harmless when they were never allocated
    pub fn free(&mut self) {
        self.ops = None;
        self.utime = None;
    }

    pub fn add_ops(&mut self, phase: Phase, flops: f64) {
        if let Some(ops) = self.ops.as_mut() {
            ops[phase as usize] += flops;
        }
    }

    /// Run `f`, charging its wall time to `phase`
    pub fn timed<R>(&mut self, phase: Phase, f: impl FnOnce(&mut Self) -> R) -> R {
        let start = Instant::now();
        let result = f(self);
        if let Some(utime) = self.utime.as_mut() {
            utime[phase as usize] += start.elapsed().as_secs_f64();
        }
        result
    }

    fn sum(table: &Option<NativeBuf<f64>>, factor: bool) -> f64 {
        const PHASES: [Phase; NPHASES] = [
            Phase::Equil,
            Phase::ColPerm,
            Phase::RowPerm,
            Phase::Fact,
            Phase::Rcond,
            Phase::Solve,
            Phase::Refine,
        ];
        table.as_ref().map_or(0.0, |t| {
            PHASES
                .iter()
                .filter(|p| p.is_factor() == factor)
                .map(|&p| t[p as usize])
                .sum()
        })
    }

    pub fn snapshot(&self) -> Statistics {
        Statistics {
            factor_flops: Self::sum(&self.ops, true),
            solve_flops: Self::sum(&self.ops, false),
            factor_time: Duration::from_secs_f64(Self::sum(&self.utime, true)),
            solve_time: Duration::from_secs_f64(Self::sum(&self.utime, false)),
            refine_steps: self.refine_steps,
            tiny_pivots: self.tiny_pivots,
            panels: self.panels,
            supernodes: self.nsuper,
            rcond: self.rcond,
            pivot_growth: self.rpg,
        }
    }
}

/// Statistics of a solve or factorization, as reported to callers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    /// Floating-point operations spent ordering, scaling and factoring
    pub factor_flops: f64,
    /// Floating-point operations spent in triangular solves and refinement
    pub solve_flops: f64,
    pub factor_time: Duration,
    pub solve_time: Duration,
    /// Iterative refinement steps taken
    pub refine_steps: usize,
    /// Pivots replaced because they were (nearly) zero
    pub tiny_pivots: usize,
    /// Column panels swept by the factorization
    pub panels: usize,
    /// Supernodes in the lower factor
    pub supernodes: usize,
    /// Reciprocal condition number estimate (1-norm), when requested
    pub rcond: Option<f64>,
    /// Reciprocal pivot growth, when requested
    pub pivot_growth: Option<f64>,
}

impl Statistics {
    /// Fold the solve-side counters of a later call into this record
    pub fn accumulate_solve(&mut self, other: &Statistics) {
        self.solve_flops += other.solve_flops;
        self.solve_time += other.solve_time;
        self.refine_steps += other.refine_steps;
    }

    pub(crate) fn log(&self, routine: &str) {
        log::info!(
            "{routine}: factor {:.3e} flops in {:?}, solve {:.3e} flops in {:?}",
            self.factor_flops,
            self.factor_time,
            self.solve_flops,
            self.solve_time
        );
        log::info!(
            "{routine}: {} panels, {} supernodes, {} tiny pivots, {} refinement steps",
            self.panels,
            self.supernodes,
            self.tiny_pivots,
            self.refine_steps
        );
        if let Some(rpg) = self.pivot_growth {
            log::info!("{routine}: reciprocal pivot growth {rpg:.3e}");
        }
        if let Some(rcond) = self.rcond {
            log::info!("{routine}: reciprocal condition number {rcond:.3e}");
        }
    }
}
