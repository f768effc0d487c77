//! Purity and side-effect classification of call targets.
//!
//! The value-numbering engine can only let a call participate in value
//! numbering if the callee provably has no observable effects. This module
//! computes that classification once per program scope, before the parallel
//! phase, and freezes it in a [`SharedState`] that every worker reads.
//!
//! Three classes fall out of the analysis:
//!
//! - **pure** — the call's result depends only on its arguments; it can be
//!   value-numbered and captured like an arithmetic instruction
//! - **barrier** — the call may write memory the caller can observe; it
//!   invalidates every tracked location when crossed
//! - neither — the call has effects (e.g. it allocates) but clobbers
//!   nothing, so tracked locations survive it
//!
//! # Conditional purity
//!
//! A method with no writes of its own is pure exactly when everything it
//! calls is pure, which is circular for mutually recursive methods. The
//! classifier resolves this as a greatest fixpoint on the
//! `{unknown, pure, impure}` lattice: every candidate starts optimistically
//! pure and is demoted when a dependency resolves impure, sweeping until
//! stable. A cycle of mutually calling methods with no impure operation
//! therefore converges to pure in at most cycle-length sweeps; one impure
//! leaf poisons the whole cycle. Barrier classification runs the same way in
//! a second fixpoint, propagating from callee to caller.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::CallGraph,
    ir::{MethodRef, Scope},
};

/// Counters from the classification fixpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SharedStats {
    /// In-scope methods whose call acts as an unconditional memory barrier.
    pub method_barriers: u64,
    /// Sweeps the barrier fixpoint needed to stabilize.
    pub method_barriers_iterations: u64,
    /// Methods resolved pure through the conditional-purity fixpoint.
    pub conditionally_pure_methods: u64,
    /// Sweeps the conditional-purity fixpoint needed to stabilize.
    pub conditionally_pure_methods_iterations: u64,
}

/// Frozen purity snapshot shared by all workers.
///
/// Constructed single-threaded from the built-in pure-method table plus a
/// user-supplied allow-list, then populated by [`SharedState::init_scope`].
/// After that it is read-only; workers hold `&SharedState` for the whole
/// parallel phase. [`SharedState::cleanup`] drops the scope-scanning caches
/// once the orchestrator is done; the frozen query tables stay valid.
#[derive(Debug)]
pub struct SharedState {
    /// Built-in table unioned with the configured allow-list; survives
    /// re-initialization against a new scope.
    base_pure: HashSet<MethodRef>,
    pure_methods: HashSet<MethodRef>,
    /// In-scope impure methods that still clobber nothing (e.g. they only
    /// allocate). Everything else impure is a barrier.
    scope_safe: HashSet<MethodRef>,
    scope_barriers: HashSet<MethodRef>,
    call_graph: Option<CallGraph>,
    stats: SharedStats,
}

/// Side-effect-free methods of the virtual machine's runtime library.
///
/// This is the seed set a scope-independent caller always gets; user
/// configuration extends it through [`SharedState::new`].
#[must_use]
pub fn builtin_pure_methods() -> HashSet<MethodRef> {
    let mut set = HashSet::new();
    for (owner, name, params) in [
        ("rt.Math", "abs", 1),
        ("rt.Math", "min", 2),
        ("rt.Math", "max", 2),
        ("rt.Math", "sqrt", 1),
        ("rt.Math", "floor", 1),
        ("rt.Math", "ceil", 1),
        ("rt.Integer", "bitCount", 1),
        ("rt.Integer", "signum", 1),
        ("rt.Long", "bitCount", 1),
        ("rt.String", "length", 0),
        ("rt.String", "isEmpty", 0),
        ("rt.String", "charAt", 1),
        ("rt.String", "hashCode", 0),
        ("rt.Object", "getClass", 0),
    ] {
        set.insert(MethodRef::new(owner, name, params));
    }
    set
}

/// Per-method facts gathered by the direct body scan.
struct BodyFacts {
    writes: bool,
    allocates: bool,
    /// Unresolvable or overridable call seen.
    opaque_call: bool,
    /// In-scope, statically bound callees this method's purity depends on.
    deps: Vec<MethodRef>,
}

impl SharedState {
    /// Creates a snapshot seeded with the built-in pure-method table unioned
    /// with `allow_list`.
    #[must_use]
    pub fn new(allow_list: HashSet<MethodRef>) -> Self {
        let mut base_pure = builtin_pure_methods();
        base_pure.extend(allow_list);
        Self {
            pure_methods: base_pure.clone(),
            base_pure,
            scope_safe: HashSet::new(),
            scope_barriers: HashSet::new(),
            call_graph: None,
            stats: SharedStats::default(),
        }
    }

    /// Classifies every method in `scope` and freezes the result.
    ///
    /// Must run before the parallel phase, while every body is in linear
    /// form. Calling it again against a changed scope recomputes everything,
    /// including the call graph, so dispatch facts stay consistent.
    pub fn init_scope(&mut self, scope: &Scope) {
        self.pure_methods = self.base_pure.clone();
        self.scope_safe.clear();
        self.scope_barriers.clear();
        self.stats = SharedStats::default();

        let call_graph = CallGraph::build(scope);
        let facts = self.scan_bodies(scope, &call_graph);

        self.resolve_conditional_purity(&facts);
        self.resolve_barriers(&facts);

        self.call_graph = Some(call_graph);
    }

    /// Direct classification of each body, independent of other methods.
    fn scan_bodies(
        &mut self,
        scope: &Scope,
        call_graph: &CallGraph,
    ) -> HashMap<MethodRef, BodyFacts> {
        let mut facts = HashMap::new();

        for id in scope.method_ids() {
            let (writes, allocates) = scope
                .with_method(&id, |method| {
                    let writes = method
                        .code()
                        .iter()
                        .any(|instr| instr.opcode.writes_memory());
                    let allocates = method.code().iter().any(|instr| {
                        matches!(
                            instr.opcode,
                            crate::ir::Opcode::NewInstance | crate::ir::Opcode::NewArray
                        )
                    });
                    (writes, allocates)
                })
                .unwrap_or((false, false));

            let mut opaque_call = false;
            let mut deps = Vec::new();
            for site in call_graph.callees(&id) {
                if self.pure_methods.contains(&site.callee) {
                    continue;
                }
                // A virtual site may bind to an override we cannot see, and
                // an out-of-scope target has no body to analyze.
                if site.is_virtual() || !call_graph.contains(&site.callee) {
                    opaque_call = true;
                } else {
                    deps.push(site.callee.clone());
                }
            }

            facts.insert(
                id,
                BodyFacts {
                    writes,
                    allocates,
                    opaque_call,
                    deps,
                },
            );
        }

        facts
    }

    /// Greatest-fixpoint resolution of methods whose purity depends only on
    /// their callees.
    fn resolve_conditional_purity(&mut self, facts: &HashMap<MethodRef, BodyFacts>) {
        let mut tentative: HashSet<MethodRef> = HashSet::new();
        for (id, f) in facts {
            if f.writes || f.opaque_call || f.allocates {
                continue;
            }
            if f.deps.is_empty() {
                // Trivially pure: no calls, no visible writes.
                self.pure_methods.insert(id.clone());
            } else {
                // Optimistic seed; demoted below if a dependency fails.
                tentative.insert(id.clone());
            }
        }

        loop {
            self.stats.conditionally_pure_methods_iterations += 1;
            let mut changed = false;
            let current: Vec<MethodRef> = tentative.iter().cloned().collect();
            for id in current {
                let deps = &facts[&id].deps;
                let all_pure = deps
                    .iter()
                    .all(|d| self.pure_methods.contains(d) || tentative.contains(d));
                if !all_pure {
                    tentative.remove(&id);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        self.stats.conditionally_pure_methods = tentative.len() as u64;
        self.pure_methods.extend(tentative);
    }

    /// Fixpoint classification of which in-scope methods clobber tracked
    /// locations when called.
    fn resolve_barriers(&mut self, facts: &HashMap<MethodRef, BodyFacts>) {
        let mut barriers: HashSet<MethodRef> = HashSet::new();
        for (id, f) in facts {
            if self.pure_methods.contains(id) {
                continue;
            }
            if f.writes || f.opaque_call {
                barriers.insert(id.clone());
            }
        }

        loop {
            self.stats.method_barriers_iterations += 1;
            let mut changed = false;
            for (id, f) in facts {
                if barriers.contains(id) || self.pure_methods.contains(id) {
                    continue;
                }
                if f.deps.iter().any(|d| barriers.contains(d)) {
                    barriers.insert(id.clone());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        self.stats.method_barriers = barriers.len() as u64;
        for id in facts.keys() {
            if !self.pure_methods.contains(id) && !barriers.contains(id) {
                self.scope_safe.insert(id.clone());
            }
        }
        self.scope_barriers = barriers;
    }

    /// Whether a call to `method` is provably side-effect free.
    #[must_use]
    pub fn is_pure(&self, method: &MethodRef) -> bool {
        self.pure_methods.contains(method)
    }

    /// Whether a call to `method` must invalidate all tracked locations.
    ///
    /// Unclassifiable targets answer `true`; that is the safe
    /// over-approximation, never a failure.
    #[must_use]
    pub fn is_barrier(&self, method: &MethodRef) -> bool {
        !self.pure_methods.contains(method) && !self.scope_safe.contains(method)
    }

    /// In-scope methods classified as unconditional barriers.
    #[must_use]
    pub fn barrier_methods(&self) -> &HashSet<MethodRef> {
        &self.scope_barriers
    }

    /// The full pure-method set (consumed by dead-code elimination).
    #[must_use]
    pub fn pure_methods(&self) -> &HashSet<MethodRef> {
        &self.pure_methods
    }

    /// Counters from the classification fixpoints.
    #[must_use]
    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Drops the scope-scanning caches. Queries on the frozen tables remain
    /// valid.
    pub fn cleanup(&mut self) {
        self.call_graph = None;
    }
}
