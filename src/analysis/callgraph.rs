//! Call graph construction.
//!
//! The call graph captures method-to-method call relationships within a
//! [`Scope`], built by scanning every method body for invoke instructions.
//! It is rebuilt whenever the scope changes so that dispatch facts stay
//! consistent with the methods actually present; the purity classifier
//! depends on that for its fixpoint over mutually recursive methods.

use std::collections::{HashMap, HashSet};

use crate::ir::{MethodRef, Opcode, Scope};

/// One call site observed in a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// The invoked method.
    pub callee: MethodRef,
    /// The invoke opcode used at the site.
    pub opcode: Opcode,
}

impl CallSite {
    /// Whether the site dispatches virtually and may bind to an override.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.opcode == Opcode::InvokeVirtual
    }
}

/// Inter-procedural call graph for a program scope.
#[derive(Debug, Default)]
pub struct CallGraph {
    callees: HashMap<MethodRef, Vec<CallSite>>,
    callers: HashMap<MethodRef, Vec<MethodRef>>,
    in_scope: HashSet<MethodRef>,
}

impl CallGraph {
    /// Builds the graph by scanning every method body in `scope`.
    ///
    /// Methods whose graph is currently built are skipped (their linear body
    /// is empty); the optimizer only builds the call graph while all bodies
    /// are in linear form.
    #[must_use]
    pub fn build(scope: &Scope) -> Self {
        let mut graph = Self::default();

        for id in scope.method_ids() {
            graph.in_scope.insert(id.clone());
            let sites = scope
                .with_method(&id, |method| {
                    method
                        .code()
                        .iter()
                        .filter(|instr| instr.opcode.is_invoke())
                        .filter_map(|instr| {
                            instr.method.clone().map(|callee| CallSite {
                                callee,
                                opcode: instr.opcode,
                            })
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            for site in &sites {
                graph
                    .callers
                    .entry(site.callee.clone())
                    .or_default()
                    .push(id.clone());
            }
            graph.callees.insert(id, sites);
        }

        graph
    }

    /// Call sites in `method`'s body. Empty for methods outside the scope.
    #[must_use]
    pub fn callees(&self, method: &MethodRef) -> &[CallSite] {
        self.callees.get(method).map_or(&[], Vec::as_slice)
    }

    /// Methods whose bodies contain a call to `method`.
    #[must_use]
    pub fn callers(&self, method: &MethodRef) -> &[MethodRef] {
        self.callers.get(method).map_or(&[], Vec::as_slice)
    }

    /// Whether `method` is defined inside the scope.
    #[must_use]
    pub fn contains(&self, method: &MethodRef) -> bool {
        self.in_scope.contains(method)
    }

    /// All in-scope methods.
    pub fn methods(&self) -> impl Iterator<Item = &MethodRef> {
        self.in_scope.iter()
    }
}
