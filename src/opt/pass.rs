//! Program-wide orchestration.
//!
//! [`CsePass`] ties the pieces together: the purity classification runs
//! single-threaded over the whole scope, then every method is checked out,
//! driven to its fixpoint, and checked back in, with rayon spreading the
//! per-method work across the thread pool. Workers share nothing mutable —
//! each owns its checked-out method and its own [`Stats`] — so the final
//! report is a pure fold, identical regardless of scheduling.

use rayon::prelude::*;

use crate::{
    analysis::{SharedState, SharedStats},
    ir::{MethodRef, Scope},
    opt::{FixpointDriver, Stats},
    Result,
};

/// Configuration for a [`CsePass`] run.
#[derive(Debug, Clone)]
pub struct CseConfig {
    /// Process methods sequentially in sorted order, for reproducible
    /// debugging of a single misbehaving method.
    pub debug: bool,
    /// Verify every capture at run time instead of eliminating the
    /// recomputation. See the engine docs.
    pub runtime_assertions: bool,
    /// Upper bound on a method's register file after temp allocation.
    pub max_estimated_registers: u16,
    /// Methods to treat as pure in addition to the built-in table.
    pub pure_methods: std::collections::HashSet<MethodRef>,
}

impl Default for CseConfig {
    fn default() -> Self {
        Self {
            debug: false,
            runtime_assertions: false,
            max_estimated_registers: 240,
            pure_methods: std::collections::HashSet::new(),
        }
    }
}

impl CseConfig {
    /// Enables sequential deterministic processing.
    #[must_use]
    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self
    }

    /// Enables run-time capture verification.
    #[must_use]
    pub fn with_runtime_assertions(mut self) -> Self {
        self.runtime_assertions = true;
        self
    }

    /// Sets the register budget.
    #[must_use]
    pub fn with_max_estimated_registers(mut self, max: u16) -> Self {
        self.max_estimated_registers = max;
        self
    }

    /// Adds a method to the pure allow-list.
    #[must_use]
    pub fn with_pure_method(mut self, method: MethodRef) -> Self {
        self.pure_methods.insert(method);
        self
    }
}

/// Final counters of one pass run.
#[derive(Debug, Clone)]
pub struct CseReport {
    /// Merged per-method optimization counters.
    pub stats: Stats,
    /// Counters from the single-threaded purity classification.
    pub shared: SharedStats,
}

impl CseReport {
    /// The counters under their stable reporting names, sorted by name.
    ///
    /// Eliminated-opcode counts appear as `instr_<opcode>` entries.
    #[must_use]
    pub fn metrics(&self) -> Vec<(String, u64)> {
        let mut metrics = vec![
            (
                "num_results_captured".to_string(),
                self.stats.results_captured,
            ),
            (
                "num_stores_captured".to_string(),
                self.stats.stores_captured,
            ),
            (
                "num_array_lengths_captured".to_string(),
                self.stats.array_lengths_captured,
            ),
            (
                "num_eliminated_instructions".to_string(),
                self.stats.instructions_eliminated,
            ),
            ("max_value_ids".to_string(), self.stats.max_value_ids),
            (
                "methods_using_other_tracked_location_bit".to_string(),
                self.stats.methods_using_other_tracked_location_bit,
            ),
            (
                "num_skipped_due_to_too_many_registers".to_string(),
                self.stats.skipped_due_to_too_many_registers,
            ),
            ("num_max_iterations".to_string(), self.stats.max_iterations),
            (
                "num_method_barriers".to_string(),
                self.shared.method_barriers,
            ),
            (
                "num_method_barriers_iterations".to_string(),
                self.shared.method_barriers_iterations,
            ),
            (
                "num_conditionally_pure_methods".to_string(),
                self.shared.conditionally_pure_methods,
            ),
            (
                "num_conditionally_pure_methods_iterations".to_string(),
                self.shared.conditionally_pure_methods_iterations,
            ),
        ];
        for (opcode, count) in &self.stats.eliminated_opcodes {
            metrics.push((format!("instr_{opcode}"), *count));
        }
        metrics.sort();
        metrics
    }
}

/// The common-subexpression-elimination pass.
#[derive(Debug, Default)]
pub struct CsePass {
    config: CseConfig,
}

impl CsePass {
    /// Creates the pass with the given configuration.
    #[must_use]
    pub fn new(config: CseConfig) -> Self {
        Self { config }
    }

    /// Optimizes every method in `scope` and reports the merged counters.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Graph`] if any method body is malformed. The
    /// scope is left consistent: every method is checked back in, in linear
    /// form, even the one that failed.
    pub fn run(&self, scope: &Scope) -> Result<CseReport> {
        let mut shared = SharedState::new(self.config.pure_methods.clone());
        shared.init_scope(scope);

        let ids = scope.method_ids();
        let stats = if self.config.debug {
            let mut total = Stats::default();
            for id in &ids {
                total = total.merge(self.optimize_one(scope, &shared, id)?);
            }
            total
        } else {
            ids.par_iter()
                .map(|id| self.optimize_one(scope, &shared, id))
                .try_reduce(Stats::default, |a, b| Ok(a.merge(b)))?
        };

        let report = CseReport {
            stats,
            shared: *shared.stats(),
        };
        shared.cleanup();
        Ok(report)
    }

    fn optimize_one(&self, scope: &Scope, shared: &SharedState, id: &MethodRef) -> Result<Stats> {
        // Another worker never holds this method: ids come from the scope
        // snapshot and each id is dispatched once.
        let Some(mut method) = scope.check_out(id) else {
            return Ok(Stats::default());
        };
        let outcome = FixpointDriver::new(shared, &self.config).optimize(&mut method);
        scope.check_in(method);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FieldRef, MethodBuilder, Opcode, Reg};

    fn scope_with_redundancy() -> Scope {
        let scope = Scope::new();
        scope.add_method(
            MethodBuilder::new("app.A", "adds")
                .param("int")
                .param("int")
                .binop(Opcode::Add, Reg(2), Reg(0), Reg(1))
                .binop(Opcode::Add, Reg(3), Reg(0), Reg(1))
                .ret_val(Reg(3))
                .build(),
        );
        let f = FieldRef::new("app.B", "f");
        scope.add_method(
            MethodBuilder::new("app.B", "loads")
                .instance()
                .get_field(Reg(1), Reg(0), f.clone())
                .get_field(Reg(2), Reg(0), f)
                .ret_val(Reg(2))
                .build(),
        );
        scope
    }

    #[test]
    fn test_parallel_and_debug_agree() {
        let parallel = CsePass::new(CseConfig::default())
            .run(&scope_with_redundancy())
            .unwrap();
        let debug = CsePass::new(CseConfig::default().with_debug())
            .run(&scope_with_redundancy())
            .unwrap();

        assert_eq!(parallel.stats, debug.stats);
        assert_eq!(parallel.stats.results_captured, 2);
        assert_eq!(parallel.stats.instructions_eliminated, 2);
    }

    #[test]
    fn test_scope_consistent_after_run() {
        let scope = scope_with_redundancy();
        CsePass::new(CseConfig::default()).run(&scope).unwrap();
        assert_eq!(scope.len(), 2);
        for id in scope.method_ids() {
            scope
                .with_method(&id, |m| assert!(!m.cfg_built()))
                .unwrap();
        }
    }

    #[test]
    fn test_metrics_names() {
        let report = CsePass::new(CseConfig::default())
            .run(&scope_with_redundancy())
            .unwrap();
        let metrics = report.metrics();

        let get = |name: &str| {
            metrics
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| *v)
                .unwrap()
        };
        assert_eq!(get("num_results_captured"), 2);
        assert_eq!(get("num_eliminated_instructions"), 2);
        assert_eq!(get("instr_add"), 1);
        assert_eq!(get("instr_get_field"), 1);
        assert!(metrics.iter().any(|(n, _)| n == "num_method_barriers"));
    }

    #[test]
    fn test_allow_list_enables_call_capture() {
        let helper = MethodRef::new("ext.Helper", "compute", 1);
        let scope = Scope::new();
        scope.add_method(
            MethodBuilder::new("app.A", "calls")
                .param("int")
                .invoke(
                    Opcode::InvokeStatic,
                    Some(Reg(1)),
                    vec![Reg(0)],
                    helper.clone(),
                )
                .invoke(
                    Opcode::InvokeStatic,
                    Some(Reg(2)),
                    vec![Reg(0)],
                    helper.clone(),
                )
                .ret_val(Reg(2))
                .build(),
        );

        let without = CsePass::new(CseConfig::default()).run(&scope).unwrap();
        assert_eq!(without.stats.results_captured, 0);

        let with = CsePass::new(CseConfig::default().with_pure_method(helper))
            .run(&scope)
            .unwrap();
        assert_eq!(with.stats.results_captured, 1);
    }

    #[test]
    fn test_empty_scope() {
        let report = CsePass::new(CseConfig::default()).run(&Scope::new()).unwrap();
        assert_eq!(report.stats, Stats::default());
    }
}
