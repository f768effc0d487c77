//! Methods and the program scope.
//!
//! A [`Method`] owns its body in exactly one of two forms at a time: the
//! linear instruction stream, or a built [`ControlFlowGraph`]. Transformations
//! that need block structure call [`Method::build_cfg`] and must release the
//! graph with [`Method::clear_cfg`] when done; `clear_cfg` commits the block
//! contents back to linear form. Holding a graph past a processing step is a
//! contract violation, not a supported state.
//!
//! The [`Scope`] is the unit the optimizer runs over: a map of methods that
//! parallel workers check bodies out of and back into, one method per worker
//! at a time.

use bitflags::bitflags;
use dashmap::DashMap;

use crate::{
    ir::{ControlFlowGraph, Instruction, MethodRef, TypeId},
    Error::Graph,
    Result,
};

bitflags! {
    /// Per-method state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u8 {
        /// The method has no `this` receiver.
        const STATIC = 1;
        /// The method is excluded from optimization entirely.
        const NO_OPTIMIZE = 1 << 1;
    }
}

/// A method: identity, qualifiers, and a body in linear or graph form.
#[derive(Debug, Clone)]
pub struct Method {
    id: MethodRef,
    flags: MethodFlags,
    param_types: Vec<TypeId>,
    registers: u16,
    code: Vec<Instruction>,
    cfg: Option<ControlFlowGraph>,
}

impl Method {
    /// Creates a method from its linear body.
    ///
    /// `registers` is the number of virtual registers the body uses;
    /// parameter registers occupy the low indices (`v0` is `this` unless the
    /// method is static).
    #[must_use]
    pub fn new(
        id: MethodRef,
        flags: MethodFlags,
        param_types: Vec<TypeId>,
        registers: u16,
        code: Vec<Instruction>,
    ) -> Self {
        Self {
            id,
            flags,
            param_types,
            registers,
            code,
            cfg: None,
        }
    }

    /// The method's identity.
    #[must_use]
    pub fn id(&self) -> &MethodRef {
        &self.id
    }

    /// The method's flags.
    #[must_use]
    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    /// Whether the method has no `this` receiver.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Whether the method is excluded from optimization.
    #[must_use]
    pub fn is_no_optimize(&self) -> bool {
        self.flags.contains(MethodFlags::NO_OPTIMIZE)
    }

    /// Declared parameter types, excluding `this`.
    #[must_use]
    pub fn param_types(&self) -> &[TypeId] {
        &self.param_types
    }

    /// Number of virtual registers the body uses.
    #[must_use]
    pub fn registers(&self) -> u16 {
        self.registers
    }

    /// Grows the register file (used when a transformation allocates temps).
    pub fn set_registers(&mut self, registers: u16) {
        debug_assert!(registers >= self.registers);
        self.registers = registers;
    }

    /// The linear body.
    ///
    /// Empty while the graph is built; callers that need instructions during
    /// a transformation go through [`Method::cfg`].
    #[must_use]
    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    /// Mutable access to the linear body. Must not be called while the graph
    /// is built.
    pub fn code_mut(&mut self) -> &mut Vec<Instruction> {
        debug_assert!(self.cfg.is_none(), "linear body edited while graph built");
        &mut self.code
    }

    /// Whether the control-flow graph is currently built.
    #[must_use]
    pub fn cfg_built(&self) -> bool {
        self.cfg.is_some()
    }

    /// The built graph, if any.
    #[must_use]
    pub fn cfg(&self) -> Option<&ControlFlowGraph> {
        self.cfg.as_ref()
    }

    /// Mutable access to the built graph, if any.
    pub fn cfg_mut(&mut self) -> Option<&mut ControlFlowGraph> {
        self.cfg.as_mut()
    }

    /// Materializes the control-flow graph from the linear body.
    ///
    /// # Errors
    ///
    /// Returns [`Graph`] if the graph is already built or the body is
    /// malformed.
    pub fn build_cfg(&mut self) -> Result<()> {
        if self.cfg.is_some() {
            return Err(Graph(format!("graph already built for {}", self.id)));
        }
        let cfg = ControlFlowGraph::from_linear(&self.code)?;
        self.code.clear();
        self.cfg = Some(cfg);
        Ok(())
    }

    /// Releases the graph, committing its blocks back to linear form.
    ///
    /// Idempotent: a no-op when the graph is not built, so release paths can
    /// call it unconditionally.
    pub fn clear_cfg(&mut self) {
        if let Some(cfg) = self.cfg.take() {
            self.code = cfg.into_linear();
        }
    }
}

/// A program scope: the collection of methods one optimizer run covers.
///
/// Methods are stored in a concurrent map so parallel workers can check a
/// body out, transform it without any lock held, and check it back in.
/// [`Scope::method_ids`] returns a sorted list so sequential (debug) runs are
/// deterministic.
#[derive(Debug, Default)]
pub struct Scope {
    methods: DashMap<MethodRef, Method>,
}

impl Scope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method, replacing any previous method with the same identity.
    pub fn add_method(&self, method: Method) {
        self.methods.insert(method.id().clone(), method);
    }

    /// Number of methods in the scope.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the scope contains no methods.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Whether the scope contains `id`.
    #[must_use]
    pub fn contains(&self, id: &MethodRef) -> bool {
        self.methods.contains_key(id)
    }

    /// All method identities, sorted for deterministic iteration.
    #[must_use]
    pub fn method_ids(&self) -> Vec<MethodRef> {
        let mut ids: Vec<MethodRef> = self.methods.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Checks a method body out of the scope. The caller owns it until
    /// [`Scope::check_in`].
    #[must_use]
    pub fn check_out(&self, id: &MethodRef) -> Option<Method> {
        self.methods.remove(id).map(|(_, m)| m)
    }

    /// Returns a transformed method body to the scope.
    pub fn check_in(&self, method: Method) {
        self.methods.insert(method.id().clone(), method);
    }

    /// Runs `f` with shared access to a method, if present.
    pub fn with_method<R>(&self, id: &MethodRef, f: impl FnOnce(&Method) -> R) -> Option<R> {
        self.methods.get(id).map(|m| f(m.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Reg;

    fn trivial_method(name: &str) -> Method {
        Method::new(
            MethodRef::new("app.Main", name, 0),
            MethodFlags::STATIC,
            Vec::new(),
            1,
            vec![Instruction::const_(Reg(0), 0), Instruction::ret_val(Reg(0))],
        )
    }

    #[test]
    fn test_cfg_lifecycle() {
        let mut method = trivial_method("run");
        assert!(!method.cfg_built());

        method.build_cfg().unwrap();
        assert!(method.cfg_built());
        assert!(method.code().is_empty());

        // Building twice is a contract violation.
        assert!(method.build_cfg().is_err());

        method.clear_cfg();
        assert!(!method.cfg_built());
        assert_eq!(method.code().len(), 2);

        // Releasing an unbuilt graph is a no-op.
        method.clear_cfg();
        assert_eq!(method.code().len(), 2);
    }

    #[test]
    fn test_scope_check_out_in() {
        let scope = Scope::new();
        scope.add_method(trivial_method("a"));
        scope.add_method(trivial_method("b"));
        assert_eq!(scope.len(), 2);

        let ids = scope.method_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] < ids[1]);

        let method = scope.check_out(&ids[0]).unwrap();
        assert_eq!(scope.len(), 1);
        scope.check_in(method);
        assert_eq!(scope.len(), 2);
    }
}
