//! Per-method fixpoint driver.
//!
//! One call to [`FixpointDriver::optimize`] takes a checked-out method to a
//! fixpoint: value numbering patches the graph, copy propagation canonicalizes
//! the moves it left behind, dead-code elimination collects the garbage, and
//! the loop repeats until a patch pass changes nothing. Each collaborator sees
//! the body in the form it expects; the graph is built and released around
//! them, and released again unconditionally on every exit path so the method
//! always goes back to the scope in linear form.

use crate::{
    analysis::SharedState,
    ir::Method,
    opt::{
        CopyPropagation, CopyPropagationConfig, CseConfig, LocalDce, Stats, ValueNumbering,
    },
    Result,
};

/// Drives one method to its optimization fixpoint.
pub struct FixpointDriver<'a> {
    shared: &'a SharedState,
    config: &'a CseConfig,
}

impl<'a> FixpointDriver<'a> {
    /// Creates a driver over a frozen purity snapshot and run configuration.
    #[must_use]
    pub fn new(shared: &'a SharedState, config: &'a CseConfig) -> Self {
        Self { shared, config }
    }

    /// Optimizes `method` in place and returns the stats for it.
    ///
    /// Methods flagged `NO_OPTIMIZE` are left untouched. The method's graph
    /// is always released before returning, including on error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Graph`] if the body is malformed (an invalid
    /// branch target, an empty body).
    pub fn optimize(&self, method: &mut Method) -> Result<Stats> {
        if method.is_no_optimize() {
            method.clear_cfg();
            return Ok(Stats::default());
        }

        let mut engine = ValueNumbering::new(
            self.shared,
            self.config.max_estimated_registers,
            self.config.runtime_assertions,
        );
        let mut iterations = 0u64;

        let outcome = self.run_to_fixpoint(method, &mut engine, &mut iterations);
        method.clear_cfg();

        outcome?;
        let mut stats = engine.into_stats();
        stats.max_iterations = iterations;
        Ok(stats)
    }

    fn run_to_fixpoint(
        &self,
        method: &mut Method,
        engine: &mut ValueNumbering<'_>,
        iterations: &mut u64,
    ) -> Result<()> {
        let copyprop = CopyPropagation::new(CopyPropagationConfig {
            max_estimated_registers: self.config.max_estimated_registers,
            ..CopyPropagationConfig::default()
        });
        let dce = LocalDce::new(self.shared);

        method.build_cfg()?;
        if self.config.runtime_assertions {
            // Verification mode keeps every recomputation, so a second
            // iteration would flag the same values again; patch once.
            *iterations += 1;
            engine.patch(method)?;
            return Ok(());
        }
        loop {
            *iterations += 1;
            if !engine.patch(method)? {
                return Ok(());
            }
            // Copy propagation works on the linear form; the others need
            // the graph.
            method.clear_cfg();
            copyprop.run(method);
            method.build_cfg()?;
            dce.run(method)?;
        }
    }
}
