//! Arena-based compilation session for one pipeline run.
//!
//! A session owns the scratch arena the optimization passes allocate into and
//! the statistics they record. All scratch data structures share the session
//! lifetime, which keeps the pass implementations free of per-call allocation
//! churn.

use bumpalo::Bump;
use std::fmt;

/// Arena plus statistics for one pipeline run.
pub struct CompilationSession<'arena> {
    /// Arena allocator for pass scratch data.
    arena: &'arena Bump,

    /// Statistics recorded by the pass executor.
    stats: SessionStats,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new session backed by the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: SessionStats::default(),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Record one execution of a function-scope pass.
    pub fn record_function_pass(&mut self, pass: &'static str, changed: bool) {
        self.stats.function_pass_runs += 1;
        if changed {
            self.stats.passes_that_changed += 1;
        }
        self.stats.executed_function_passes.push(pass);
    }

    /// Record one execution of a module-scope pass.
    pub fn record_module_pass(&mut self, pass: &'static str, changed: bool) {
        self.stats.module_pass_runs += 1;
        if changed {
            self.stats.passes_that_changed += 1;
        }
        self.stats.executed_module_passes.push(pass);
    }

    /// Record that a function body reached its optimization fixpoint.
    pub fn record_function_optimized(&mut self, iterations: usize) {
        self.stats.functions_optimized += 1;
        if iterations > self.stats.max_fixpoint_iterations {
            self.stats.max_fixpoint_iterations = iterations;
        }
    }

    /// Record instructions deleted by a pass.
    pub fn record_instructions_removed(&mut self, count: usize) {
        self.stats.instructions_removed += count;
    }

    /// Get the statistics recorded so far.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

/// Statistics for one optimization run.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Function bodies driven to a fixpoint.
    pub functions_optimized: usize,

    /// Total function-pass executions (across fixpoint iterations).
    pub function_pass_runs: usize,

    /// Total module-pass executions.
    pub module_pass_runs: usize,

    /// Executions that reported a change.
    pub passes_that_changed: usize,

    /// Instructions deleted across all passes.
    pub instructions_removed: usize,

    /// Largest per-function fixpoint iteration count.
    pub max_fixpoint_iterations: usize,

    /// Function-pass names in execution order.
    pub executed_function_passes: Vec<&'static str>,

    /// Module-pass names in execution order.
    pub executed_module_passes: Vec<&'static str>,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization statistics:")?;
        writeln!(f, "  Functions optimized: {}", self.functions_optimized)?;
        writeln!(
            f,
            "  Pass runs: {} function, {} module ({} changed something)",
            self.function_pass_runs, self.module_pass_runs, self.passes_that_changed
        )?;
        writeln!(f, "  Instructions removed: {}", self.instructions_removed)?;
        if self.max_fixpoint_iterations > 0 {
            writeln!(
                f,
                "  Deepest fixpoint: {} iterations",
                self.max_fixpoint_iterations
            )?;
        }
        Ok(())
    }
}
