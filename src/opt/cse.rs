//! The value-numbering engine.
//!
//! This is the per-method transformer at the core of common subexpression
//! elimination. It assigns value numbers to instruction results and to
//! abstract memory locations in a single forward pass over the dominator
//! tree, detects computations and loads whose value number already exists in
//! a dominating context, and rewrites the graph so later occurrences reuse
//! the earlier result.
//!
//! # Capture mechanics
//!
//! The instruction set is register-based, so an earlier result is not
//! automatically available at a later redundant site: its destination
//! register may have been overwritten. The engine therefore *captures* each
//! reused value into a fresh temp register — a `move temp <- dest` inserted
//! right after the defining instruction — and rewrites every later
//! occurrence into `move dest <- temp`. Temps are never reassigned, which is
//! what makes reuse across blocks sound: the capture site dominates every
//! reuse site by construction.
//!
//! # Memory
//!
//! Loads are value-numbered by (location, base value numbers, version).
//! A location's version increments on every write to it; a method barrier
//! resets the whole memory state (a new epoch), invalidating every tracked
//! location at once. Array lengths are tracked separately, keyed only by the
//! array's identity: an array's length cannot change after creation, so
//! those captures survive barriers.
//!
//! Location state flows into a block only when that block's unique
//! predecessor is its immediate dominator; at any other join it resets.
//! Pure value numbers flow along the whole dominator tree. This is the
//! documented precision boundary: conservative at merges, exact on
//! straight-line paths.
//!
//! # Bail-outs
//!
//! If live value numbers plus the original register file would exceed the
//! configured budget, the engine stops allocating new captures for the
//! method and records the skip. This preserves correctness; the method is
//! simply left partially optimized.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::SharedState,
    ir::{FieldRef, Instruction, Method, MethodRef, Opcode, Reg, TypeId},
    opt::Stats,
    Error::Graph,
    Result,
};

/// A tracked memory region, used as the key for load/store redundancy.
///
/// Writes to a location invalidate exactly the captures keyed on it;
/// [`AbstractLocation::Other`] is the catch-all for writes that cannot be
/// classified, and invalidating it invalidates everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbstractLocation {
    /// An instance field of a known declared type.
    Field(FieldRef),
    /// A static field of a known declared type.
    StaticField(FieldRef),
    /// Array contents, keyed by element type.
    ArrayElement(TypeId),
    /// Anything that could not be classified more precisely.
    Other,
}

/// Abstract identity of a computed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ValueId(u32);

/// Hashable identity of an expression: equal keys mean provably equal
/// runtime values at the program point where the key is looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ValueKey {
    /// The `this` receiver.
    This,
    /// Parameter by declaration index.
    Param(u16),
    /// A pure computation over operand value numbers.
    Op {
        opcode: Opcode,
        operands: Vec<ValueId>,
        literal: Option<i64>,
        type_ref: Option<TypeId>,
    },
    /// A call to a provably pure method.
    PureCall {
        method: MethodRef,
        operands: Vec<ValueId>,
    },
    /// A load from a tracked location at a specific version.
    Load {
        location: AbstractLocation,
        deps: Vec<ValueId>,
        epoch: u32,
        version: u32,
    },
    /// An array-length read, keyed by array identity only.
    ArrayLength { array: ValueId },
}

/// Versioned view of tracked memory along one path.
#[derive(Debug, Clone, Default)]
struct MemoryState {
    /// Bumped on every coarse invalidation; part of every load key.
    epoch: u32,
    versions: HashMap<AbstractLocation, u32>,
    /// Value currently known to be stored at (location, bases), from a
    /// preceding load or store on this path.
    known: HashMap<(AbstractLocation, Vec<ValueId>), ValueId>,
}

/// Numbering state carried down the dominator tree.
#[derive(Debug, Clone)]
struct BlockState {
    values: HashMap<ValueKey, ValueId>,
    regs: HashMap<Reg, ValueId>,
    memory: MemoryState,
}

#[derive(Debug, Clone, Copy)]
struct DefSite {
    block: usize,
    index: usize,
    reg: Reg,
    array_length: bool,
}

#[derive(Debug, Clone, Copy)]
struct Reuse {
    block: usize,
    index: usize,
    dest: Reg,
    value: ValueId,
}

/// Everything the analysis pass decided; consumed by the rewrite pass.
#[derive(Debug, Default)]
struct Analysis {
    defs: HashMap<ValueId, DefSite>,
    /// Captured values in first-capture order; order fixes temp assignment.
    captured: Vec<ValueId>,
    captured_set: HashSet<ValueId>,
    reuses: Vec<Reuse>,
    elided_stores: Vec<(usize, usize)>,
    used_other: bool,
    budget_hit: bool,
}

/// The per-method common-subexpression-elimination transformer.
///
/// One instance processes one method per [`ValueNumbering::patch`] call;
/// value numbers reset between calls. The purity snapshot is shared and
/// read-only.
pub struct ValueNumbering<'a> {
    shared: &'a SharedState,
    max_estimated_registers: u16,
    runtime_assertions: bool,
    stats: Stats,
    next_value: u32,
    next_epoch: u32,
    counted_other: bool,
    counted_budget: bool,
}

impl<'a> ValueNumbering<'a> {
    /// Creates an engine against a frozen purity snapshot.
    ///
    /// `max_estimated_registers` is the register budget shared with copy
    /// propagation; `runtime_assertions` inserts verification checks instead
    /// of eliminating reuse sites.
    #[must_use]
    pub fn new(
        shared: &'a SharedState,
        max_estimated_registers: u16,
        runtime_assertions: bool,
    ) -> Self {
        Self {
            shared,
            max_estimated_registers,
            runtime_assertions,
            stats: Stats::default(),
            next_value: 0,
            next_epoch: 0,
            counted_other: false,
            counted_budget: false,
        }
    }

    /// Runs value numbering over `method`'s built graph and rewrites
    /// redundant instructions in place.
    ///
    /// Returns whether any change was made.
    ///
    /// # Errors
    ///
    /// Returns [`Graph`] if the method's graph is not built; entering the
    /// transformer in that state is a programming error.
    pub fn patch(&mut self, method: &mut Method) -> Result<bool> {
        if !method.cfg_built() {
            return Err(Graph(format!(
                "value numbering requires a built graph for {}",
                method.id()
            )));
        }

        self.next_value = 0;
        let analysis = self.analyze(method);

        self.stats.max_value_ids = self.stats.max_value_ids.max(u64::from(self.next_value));
        // One engine spans every driver iteration of one method; these two
        // counters are per-method, so count them at most once.
        if analysis.used_other && !self.counted_other {
            self.counted_other = true;
            self.stats.methods_using_other_tracked_location_bit += 1;
        }
        if analysis.budget_hit && !self.counted_budget {
            self.counted_budget = true;
            self.stats.skipped_due_to_too_many_registers += 1;
        }

        let changed = !analysis.reuses.is_empty() || !analysis.elided_stores.is_empty();
        if changed {
            self.rewrite(method, &analysis);
        }
        Ok(changed)
    }

    /// Consumes the engine, yielding accumulated stats.
    #[must_use]
    pub fn into_stats(self) -> Stats {
        self.stats
    }

    fn fresh(&mut self) -> ValueId {
        let v = ValueId(self.next_value);
        self.next_value += 1;
        v
    }

    fn bump_epoch(&mut self) -> u32 {
        self.next_epoch += 1;
        self.next_epoch
    }

    fn vn(&mut self, st: &mut BlockState, reg: Reg) -> ValueId {
        if let Some(&v) = st.regs.get(&reg) {
            v
        } else {
            // Unknown register contents: a fresh number matches nothing.
            let v = self.fresh();
            st.regs.insert(reg, v);
            v
        }
    }

    /// Numbering state at method entry: `this` and the parameters get stable
    /// keys so their loads agree across the whole method.
    fn entry_state(&mut self, method: &Method) -> BlockState {
        let mut st = BlockState {
            values: HashMap::new(),
            regs: HashMap::new(),
            memory: MemoryState {
                epoch: self.bump_epoch(),
                ..MemoryState::default()
            },
        };

        let base = if method.is_static() {
            0u16
        } else {
            let v = self.fresh();
            st.values.insert(ValueKey::This, v);
            st.regs.insert(Reg(0), v);
            1
        };
        for i in 0..method.param_types().len() as u16 {
            let v = self.fresh();
            st.values.insert(ValueKey::Param(i), v);
            st.regs.insert(Reg(base + i), v);
        }
        st
    }

    /// Forward pass over the dominator tree.
    fn analyze(&mut self, method: &Method) -> Analysis {
        let Some(cfg) = method.cfg() else {
            return Analysis::default();
        };
        let registers = method.registers();
        let mut analysis = Analysis::default();

        let rpo = cfg.reverse_postorder_blocks();
        let mut children: HashMap<usize, Vec<crate::ir::BlockId>> = HashMap::new();
        for &b in rpo.iter().skip(1) {
            if let Some(idom) = cfg.immediate_dominator(b) {
                children.entry(idom.0).or_default().push(b);
            }
        }

        let entry_state = self.entry_state(method);
        let mut stack = vec![(cfg.entry(), entry_state)];
        while let Some((bid, mut st)) = stack.pop() {
            let block = cfg.block(bid);
            for (index, instr) in block.instructions.iter().enumerate() {
                self.visit(&mut st, &mut analysis, bid.0, index, instr, registers);
            }

            if let Some(kids) = children.get(&bid.0) {
                for &kid in kids.iter().rev() {
                    let preds = &cfg.block(kid).preds;
                    let straight = preds.len() == 1 && preds[0] == bid;
                    let child = if straight {
                        st.clone()
                    } else {
                        // A merge: pure values still hold (their captures
                        // dominate), memory and register contents do not.
                        BlockState {
                            values: st.values.clone(),
                            regs: HashMap::new(),
                            memory: MemoryState {
                                epoch: self.bump_epoch(),
                                ..MemoryState::default()
                            },
                        }
                    };
                    stack.push((kid, child));
                }
            }
        }

        analysis
    }

    #[allow(clippy::too_many_lines)]
    fn visit(
        &mut self,
        st: &mut BlockState,
        analysis: &mut Analysis,
        block: usize,
        index: usize,
        instr: &Instruction,
        registers: u16,
    ) {
        match instr.opcode {
            Opcode::Nop
            | Opcode::Goto
            | Opcode::IfZero
            | Opcode::IfCmp
            | Opcode::Return
            | Opcode::ReturnValue
            | Opcode::CheckEq => {}

            Opcode::Const => {
                // Numbered so operands match, but never captured: a move is
                // no cheaper than the const itself.
                if let Some(dest) = instr.dest {
                    let key = ValueKey::Op {
                        opcode: Opcode::Const,
                        operands: Vec::new(),
                        literal: instr.literal,
                        type_ref: None,
                    };
                    let v = self.number(st, analysis, key, None, block, index, registers);
                    st.regs.insert(dest, v);
                }
            }

            Opcode::Move => {
                if let (Some(dest), Some(&src)) = (instr.dest, instr.srcs.first()) {
                    let v = self.vn(st, src);
                    st.regs.insert(dest, v);
                }
            }

            Opcode::Div | Opcode::Rem => {
                // May throw; not value-numbered.
                if let Some(dest) = instr.dest {
                    let v = self.fresh();
                    st.regs.insert(dest, v);
                }
            }

            op if op.is_pure_computation() => {
                if let Some(dest) = instr.dest {
                    let mut operands: Vec<ValueId> =
                        instr.srcs.iter().map(|&r| self.vn(st, r)).collect();
                    if op.is_commutative() {
                        operands.sort_by_key(|v| v.0);
                    }
                    let key = ValueKey::Op {
                        opcode: op,
                        operands,
                        literal: instr.literal,
                        type_ref: instr.type_ref.clone(),
                    };
                    let v = self.number(
                        st,
                        analysis,
                        key,
                        Some((dest, instr.opcode, false)),
                        block,
                        index,
                        registers,
                    );
                    st.regs.insert(dest, v);
                }
            }

            Opcode::GetField => {
                if let (Some(field), Some(&obj)) = (instr.field.clone(), instr.srcs.first()) {
                    let base = self.vn(st, obj);
                    self.load(
                        st,
                        analysis,
                        AbstractLocation::Field(field),
                        vec![base],
                        instr,
                        block,
                        index,
                        registers,
                    );
                }
            }

            Opcode::GetStatic => {
                if let Some(field) = instr.field.clone() {
                    self.load(
                        st,
                        analysis,
                        AbstractLocation::StaticField(field),
                        Vec::new(),
                        instr,
                        block,
                        index,
                        registers,
                    );
                }
            }

            Opcode::ArrayGet => {
                let location = match instr.type_ref.clone() {
                    Some(ty) => AbstractLocation::ArrayElement(ty),
                    None => AbstractLocation::Other,
                };
                if instr.srcs.len() == 2 {
                    let arr = self.vn(st, instr.srcs[0]);
                    let idx = self.vn(st, instr.srcs[1]);
                    self.load(
                        st,
                        analysis,
                        location,
                        vec![arr, idx],
                        instr,
                        block,
                        index,
                        registers,
                    );
                }
            }

            Opcode::PutField => {
                if let (Some(field), true) = (instr.field.clone(), instr.srcs.len() == 2) {
                    let value = self.vn(st, instr.srcs[0]);
                    let base = self.vn(st, instr.srcs[1]);
                    self.store(
                        st,
                        analysis,
                        AbstractLocation::Field(field),
                        vec![base],
                        value,
                        instr.opcode,
                        block,
                        index,
                    );
                }
            }

            Opcode::PutStatic => {
                if let (Some(field), Some(&src)) = (instr.field.clone(), instr.srcs.first()) {
                    let value = self.vn(st, src);
                    self.store(
                        st,
                        analysis,
                        AbstractLocation::StaticField(field),
                        Vec::new(),
                        value,
                        instr.opcode,
                        block,
                        index,
                    );
                }
            }

            Opcode::ArrayPut => {
                if instr.srcs.len() == 3 {
                    let value = self.vn(st, instr.srcs[0]);
                    let arr = self.vn(st, instr.srcs[1]);
                    let idx = self.vn(st, instr.srcs[2]);
                    let location = match instr.type_ref.clone() {
                        Some(ty) => AbstractLocation::ArrayElement(ty),
                        None => AbstractLocation::Other,
                    };
                    self.store(
                        st,
                        analysis,
                        location,
                        vec![arr, idx],
                        value,
                        instr.opcode,
                        block,
                        index,
                    );
                }
            }

            Opcode::ArrayLength => {
                if let (Some(dest), Some(&arr)) = (instr.dest, instr.srcs.first()) {
                    let array = self.vn(st, arr);
                    let key = ValueKey::ArrayLength { array };
                    let v = self.number(
                        st,
                        analysis,
                        key,
                        Some((dest, instr.opcode, true)),
                        block,
                        index,
                        registers,
                    );
                    st.regs.insert(dest, v);
                }
            }

            Opcode::NewInstance => {
                // Fresh heap identity every time; never redundant.
                if let Some(dest) = instr.dest {
                    let v = self.fresh();
                    st.regs.insert(dest, v);
                }
            }

            Opcode::NewArray => {
                if let (Some(dest), Some(&len)) = (instr.dest, instr.srcs.first()) {
                    let length = self.vn(st, len);
                    let v = self.fresh();
                    st.regs.insert(dest, v);
                    // The new array's length is this length value, forever.
                    st.values.insert(ValueKey::ArrayLength { array: v }, length);
                }
            }

            Opcode::InvokeStatic | Opcode::InvokeVirtual | Opcode::InvokeDirect => {
                self.visit_invoke(st, analysis, block, index, instr, registers);
            }

            _ => {
                // Anything unhandled: conservative barrier.
                self.clobber(st, analysis);
                if let Some(dest) = instr.dest {
                    let v = self.fresh();
                    st.regs.insert(dest, v);
                }
            }
        }
    }

    fn visit_invoke(
        &mut self,
        st: &mut BlockState,
        analysis: &mut Analysis,
        block: usize,
        index: usize,
        instr: &Instruction,
        registers: u16,
    ) {
        let Some(method) = instr.method.clone() else {
            self.clobber(st, analysis);
            return;
        };

        if self.shared.is_pure(&method) {
            if let Some(dest) = instr.dest {
                let operands: Vec<ValueId> = instr.srcs.iter().map(|&r| self.vn(st, r)).collect();
                let key = ValueKey::PureCall { method, operands };
                let v = self.number(
                    st,
                    analysis,
                    key,
                    Some((dest, instr.opcode, false)),
                    block,
                    index,
                    registers,
                );
                st.regs.insert(dest, v);
            }
            return;
        }

        if self.shared.is_barrier(&method) {
            self.clobber(st, analysis);
        }
        if let Some(dest) = instr.dest {
            let v = self.fresh();
            st.regs.insert(dest, v);
        }
    }

    /// Coarse invalidation: every tracked location is considered written.
    fn clobber(&mut self, st: &mut BlockState, analysis: &mut Analysis) {
        st.memory = MemoryState {
            epoch: self.bump_epoch(),
            ..MemoryState::default()
        };
        analysis.used_other = true;
    }

    /// Looks up or defines the value for `key`.
    ///
    /// `capture` carries `(dest, opcode, is_array_length)` for instructions
    /// whose later occurrences may be rewritten; `None` marks keys that are
    /// numbered but never eliminated (constants).
    fn number(
        &mut self,
        st: &mut BlockState,
        analysis: &mut Analysis,
        key: ValueKey,
        capture: Option<(Reg, Opcode, bool)>,
        block: usize,
        index: usize,
        registers: u16,
    ) -> ValueId {
        if let Some(&v) = st.values.get(&key) {
            if let Some((dest, opcode, _)) = capture {
                self.try_reuse(analysis, v, block, index, dest, opcode, registers);
            }
            return v;
        }
        let v = self.fresh();
        st.values.insert(key, v);
        if let Some((dest, _, array_length)) = capture {
            analysis.defs.insert(
                v,
                DefSite {
                    block,
                    index,
                    reg: dest,
                    array_length,
                },
            );
        }
        v
    }

    /// Records a reuse of `value` at (`block`, `index`), capturing the
    /// defining instruction's result first if it is not captured yet.
    fn try_reuse(
        &mut self,
        analysis: &mut Analysis,
        value: ValueId,
        block: usize,
        index: usize,
        dest: Reg,
        opcode: Opcode,
        registers: u16,
    ) {
        let Some(def) = analysis.defs.get(&value).copied() else {
            // The value has no defining instruction we can capture from
            // (a parameter, or an unknown register's contents).
            return;
        };

        if !analysis.captured_set.contains(&value) {
            let estimated = usize::from(registers) + analysis.captured.len() + 1;
            if estimated > usize::from(self.max_estimated_registers) {
                analysis.budget_hit = true;
                return;
            }
            analysis.captured.push(value);
            analysis.captured_set.insert(value);
            if def.array_length {
                self.stats.array_lengths_captured += 1;
            } else {
                self.stats.results_captured += 1;
            }
        }

        analysis.reuses.push(Reuse {
            block,
            index,
            dest,
            value,
        });
        self.stats.instructions_eliminated += 1;
        *self.stats.eliminated_opcodes.entry(opcode).or_default() += 1;
    }

    #[allow(clippy::too_many_arguments)]
    fn load(
        &mut self,
        st: &mut BlockState,
        analysis: &mut Analysis,
        location: AbstractLocation,
        deps: Vec<ValueId>,
        instr: &Instruction,
        block: usize,
        index: usize,
        registers: u16,
    ) {
        let Some(dest) = instr.dest else { return };
        if location == AbstractLocation::Other {
            analysis.used_other = true;
        }

        if let Some(&known) = st.memory.known.get(&(location.clone(), deps.clone())) {
            // A preceding load or store on this path already pinned the
            // value at this location.
            self.try_reuse(analysis, known, block, index, dest, instr.opcode, registers);
            st.regs.insert(dest, known);
            return;
        }

        let key = ValueKey::Load {
            location: location.clone(),
            deps: deps.clone(),
            epoch: st.memory.epoch,
            version: st.memory.versions.get(&location).copied().unwrap_or(0),
        };
        let v = self.number(
            st,
            analysis,
            key,
            Some((dest, instr.opcode, false)),
            block,
            index,
            registers,
        );
        st.memory.known.insert((location, deps), v);
        st.regs.insert(dest, v);
    }

    #[allow(clippy::too_many_arguments)]
    fn store(
        &mut self,
        st: &mut BlockState,
        analysis: &mut Analysis,
        location: AbstractLocation,
        deps: Vec<ValueId>,
        value: ValueId,
        opcode: Opcode,
        block: usize,
        index: usize,
    ) {
        if location == AbstractLocation::Other {
            // Imprecise target: clobber everything rather than guess.
            self.clobber(st, analysis);
            return;
        }

        if st.memory.known.get(&(location.clone(), deps.clone())) == Some(&value) {
            // The location provably already holds this value.
            analysis.elided_stores.push((block, index));
            self.stats.stores_captured += 1;
            self.stats.instructions_eliminated += 1;
            *self.stats.eliminated_opcodes.entry(opcode).or_default() += 1;
            return;
        }

        *st.memory.versions.entry(location.clone()).or_insert(0) += 1;
        // A write through one base may alias any other base of the same
        // location; only the written pair stays known.
        st.memory.known.retain(|(l, _), _| *l != location);
        st.memory.known.insert((location, deps), value);
    }

    /// Applies the analysis: inserts capture moves, rewrites reuse sites,
    /// removes elided stores, and grows the register file for the temps.
    fn rewrite(&mut self, method: &mut Method, analysis: &Analysis) {
        let mut next_temp = method.registers();
        let mut temp_of: HashMap<ValueId, Reg> = HashMap::new();
        for &v in &analysis.captured {
            temp_of.insert(v, Reg(next_temp));
            next_temp += 1;
        }

        enum Edit {
            CaptureAfter { temp: Reg, src: Reg },
            ReplaceWithMove { dest: Reg, temp: Reg },
            AssertedReplace { temp: Reg, fresh: Reg, dest: Reg },
            RemoveStore,
        }

        let mut edits: HashMap<usize, Vec<(usize, Edit)>> = HashMap::new();
        for &v in &analysis.captured {
            let def = analysis.defs[&v];
            edits.entry(def.block).or_default().push((
                def.index,
                Edit::CaptureAfter {
                    temp: temp_of[&v],
                    src: def.reg,
                },
            ));
        }
        for reuse in &analysis.reuses {
            let Some(&temp) = temp_of.get(&reuse.value) else {
                continue;
            };
            let edit = if self.runtime_assertions {
                let fresh = Reg(next_temp);
                next_temp += 1;
                Edit::AssertedReplace {
                    temp,
                    fresh,
                    dest: reuse.dest,
                }
            } else {
                Edit::ReplaceWithMove {
                    dest: reuse.dest,
                    temp,
                }
            };
            edits.entry(reuse.block).or_default().push((reuse.index, edit));
        }
        for &(block, index) in &analysis.elided_stores {
            edits.entry(block).or_default().push((index, Edit::RemoveStore));
        }

        if let Some(cfg) = method.cfg_mut() {
            for (block, mut block_edits) in edits {
                // Descending index order keeps earlier indices stable while
                // later ones are spliced.
                block_edits.sort_by(|a, b| b.0.cmp(&a.0));
                let instructions = &mut cfg.blocks_mut()[block].instructions;
                for (index, edit) in block_edits {
                    match edit {
                        Edit::CaptureAfter { temp, src } => {
                            instructions.insert(index + 1, Instruction::move_(temp, src));
                        }
                        Edit::ReplaceWithMove { dest, temp } => {
                            instructions[index] = Instruction::move_(dest, temp);
                        }
                        Edit::AssertedReplace { temp, fresh, dest } => {
                            let recomputed = instructions[index].with_dest(fresh);
                            instructions[index] = recomputed;
                            instructions.insert(index + 1, Instruction::move_(dest, temp));
                            instructions.insert(index + 2, Instruction::check_eq(temp, fresh));
                        }
                        Edit::RemoveStore => {
                            instructions.remove(index);
                        }
                    }
                }
            }
        }

        method.set_registers(next_temp);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::ir::{MethodBuilder, Scope};

    fn frozen_shared() -> SharedState {
        let mut shared = SharedState::new(HashSet::new());
        shared.init_scope(&Scope::new());
        shared
    }

    fn run(method: &mut Method, shared: &SharedState) -> (bool, Stats) {
        method.build_cfg().unwrap();
        let mut engine = ValueNumbering::new(shared, 256, false);
        let changed = engine.patch(method).unwrap();
        method.clear_cfg();
        (changed, engine.into_stats())
    }

    #[test]
    fn test_redundant_add_captured() {
        let shared = frozen_shared();
        // x = a + b; y = a + b  with a, b parameters
        let mut method = MethodBuilder::new("app.T", "f")
            .param("int")
            .param("int")
            .binop(Opcode::Add, Reg(2), Reg(0), Reg(1))
            .binop(Opcode::Add, Reg(3), Reg(0), Reg(1))
            .ret_val(Reg(3))
            .build();

        let (changed, stats) = run(&mut method, &shared);
        assert!(changed);
        assert_eq!(stats.results_captured, 1);
        assert_eq!(stats.instructions_eliminated, 1);
        assert_eq!(stats.eliminated_opcodes[&Opcode::Add], 1);

        // add v2; move temp <- v2; move v3 <- temp; return v3
        let code = method.code();
        assert_eq!(code.len(), 4);
        assert_eq!(code[0].opcode, Opcode::Add);
        assert_eq!(code[1].opcode, Opcode::Move);
        assert_eq!(code[2].opcode, Opcode::Move);
        assert_eq!(code[1].srcs, vec![Reg(2)]);
        assert_eq!(code[2].dest, Some(Reg(3)));
        assert_eq!(code[2].srcs, code[1].dest.map(|d| vec![d]).unwrap());
        assert_eq!(method.registers(), 5);
    }

    #[test]
    fn test_commutative_operands_match() {
        let shared = frozen_shared();
        let mut method = MethodBuilder::new("app.T", "f")
            .param("int")
            .param("int")
            .binop(Opcode::Add, Reg(2), Reg(0), Reg(1))
            .binop(Opcode::Add, Reg(3), Reg(1), Reg(0))
            .ret_val(Reg(3))
            .build();
        let (changed, stats) = run(&mut method, &shared);
        assert!(changed);
        assert_eq!(stats.results_captured, 1);
    }

    #[test]
    fn test_non_commutative_preserved() {
        let shared = frozen_shared();
        let mut method = MethodBuilder::new("app.T", "f")
            .param("int")
            .param("int")
            .binop(Opcode::Sub, Reg(2), Reg(0), Reg(1))
            .binop(Opcode::Sub, Reg(3), Reg(1), Reg(0))
            .ret_val(Reg(3))
            .build();
        let (changed, stats) = run(&mut method, &shared);
        assert!(!changed);
        assert_eq!(stats.results_captured, 0);
    }

    #[test]
    fn test_field_load_captured_without_barrier() {
        let shared = frozen_shared();
        let f = FieldRef::new("app.T", "f");
        let mut method = MethodBuilder::new("app.T", "loads")
            .instance()
            .get_field(Reg(1), Reg(0), f.clone())
            .get_field(Reg(2), Reg(0), f)
            .ret_val(Reg(2))
            .build();
        let (changed, stats) = run(&mut method, &shared);
        assert!(changed);
        assert_eq!(stats.results_captured, 1);
        assert_eq!(stats.eliminated_opcodes[&Opcode::GetField], 1);
    }

    #[test]
    fn test_barrier_call_blocks_field_capture() {
        let shared = frozen_shared();
        let f = FieldRef::new("app.T", "f");
        let unknown = MethodRef::new("ext.Unknown", "run", 0);
        let mut method = MethodBuilder::new("app.T", "loads")
            .instance()
            .get_field(Reg(1), Reg(0), f.clone())
            .invoke(Opcode::InvokeVirtual, None, vec![Reg(0)], unknown)
            .get_field(Reg(2), Reg(0), f)
            .ret_val(Reg(2))
            .build();
        let (changed, stats) = run(&mut method, &shared);
        assert!(!changed);
        assert_eq!(stats.results_captured, 0);
        assert_eq!(stats.methods_using_other_tracked_location_bit, 1);
    }

    #[test]
    fn test_write_invalidates_only_its_location() {
        let shared = frozen_shared();
        let f = FieldRef::new("app.T", "f");
        let g = FieldRef::new("app.T", "g");
        // r1 = this.f; r2 = this.g; this.f = p; r3 = this.f; r4 = this.g
        let mut method = MethodBuilder::new("app.T", "loads")
            .instance()
            .param("int")
            .get_field(Reg(2), Reg(0), f.clone())
            .get_field(Reg(3), Reg(0), g.clone())
            .put_field(Reg(1), Reg(0), f.clone())
            .get_field(Reg(4), Reg(0), f)
            .get_field(Reg(5), Reg(0), g)
            .ret_val(Reg(5))
            .build();
        let (changed, stats) = run(&mut method, &shared);
        assert!(changed);
        // Only the second read of g is redundant; f was invalidated.
        assert_eq!(stats.results_captured, 1);
        assert_eq!(stats.eliminated_opcodes[&Opcode::GetField], 1);
    }

    #[test]
    fn test_store_captured_after_matching_store() {
        let shared = frozen_shared();
        let f = FieldRef::new("app.T", "f");
        // this.f = p; this.f = p  -- the second store is redundant
        let mut method = MethodBuilder::new("app.T", "stores")
            .instance()
            .param("int")
            .put_field(Reg(1), Reg(0), f.clone())
            .put_field(Reg(1), Reg(0), f)
            .ret()
            .build();
        let (changed, stats) = run(&mut method, &shared);
        assert!(changed);
        assert_eq!(stats.stores_captured, 1);
        assert_eq!(method.code().len(), 2);
    }

    #[test]
    fn test_array_length_captured() {
        let shared = frozen_shared();
        let mut method = MethodBuilder::new("app.T", "len")
            .param("int[]")
            .array_length(Reg(1), Reg(0))
            .array_length(Reg(2), Reg(0))
            .binop(Opcode::Add, Reg(3), Reg(1), Reg(2))
            .ret_val(Reg(3))
            .build();
        let (changed, stats) = run(&mut method, &shared);
        assert!(changed);
        assert_eq!(stats.array_lengths_captured, 1);
        assert_eq!(stats.results_captured, 0);
        assert_eq!(stats.eliminated_opcodes[&Opcode::ArrayLength], 1);
    }

    #[test]
    fn test_register_budget_bail_out() {
        let shared = frozen_shared();
        let mut method = MethodBuilder::new("app.T", "f")
            .param("int")
            .param("int")
            .binop(Opcode::Add, Reg(2), Reg(0), Reg(1))
            .binop(Opcode::Add, Reg(3), Reg(0), Reg(1))
            .ret_val(Reg(3))
            .build();
        let before = method.code().to_vec();

        method.build_cfg().unwrap();
        // Budget equal to the current register file: no room for any temp.
        let mut engine = ValueNumbering::new(&shared, 4, false);
        let changed = engine.patch(&mut method).unwrap();
        method.clear_cfg();
        let stats = engine.into_stats();

        assert!(!changed);
        assert_eq!(stats.skipped_due_to_too_many_registers, 1);
        assert_eq!(stats.results_captured, 0);
        assert_eq!(method.code(), before.as_slice());
    }

    #[test]
    fn test_pure_call_value_numbered() {
        let shared = frozen_shared();
        let abs = MethodRef::new("rt.Math", "abs", 1);
        let mut method = MethodBuilder::new("app.T", "f")
            .param("int")
            .invoke(Opcode::InvokeStatic, Some(Reg(1)), vec![Reg(0)], abs.clone())
            .invoke(Opcode::InvokeStatic, Some(Reg(2)), vec![Reg(0)], abs)
            .ret_val(Reg(2))
            .build();
        let (changed, stats) = run(&mut method, &shared);
        assert!(changed);
        assert_eq!(stats.results_captured, 1);
        assert_eq!(stats.eliminated_opcodes[&Opcode::InvokeStatic], 1);
    }

    #[test]
    fn test_capture_reaches_dominated_block() {
        let shared = frozen_shared();
        // add in the entry block, identical add in the fall-through block
        let mut method = MethodBuilder::new("app.T", "f")
            .param("int")
            .param("int")
            .binop(Opcode::Add, Reg(2), Reg(0), Reg(1))
            .push(Instruction::if_zero(Reg(2), 4))
            .binop(Opcode::Add, Reg(3), Reg(0), Reg(1))
            .ret_val(Reg(3))
            .ret_val(Reg(2))
            .build();
        let (changed, stats) = run(&mut method, &shared);
        assert!(changed);
        assert_eq!(stats.results_captured, 1);
    }

    #[test]
    fn test_runtime_assertions_keep_computation() {
        let shared = frozen_shared();
        let mut method = MethodBuilder::new("app.T", "f")
            .param("int")
            .param("int")
            .binop(Opcode::Add, Reg(2), Reg(0), Reg(1))
            .binop(Opcode::Add, Reg(3), Reg(0), Reg(1))
            .ret_val(Reg(3))
            .build();

        method.build_cfg().unwrap();
        let mut engine = ValueNumbering::new(&shared, 256, true);
        let changed = engine.patch(&mut method).unwrap();
        method.clear_cfg();

        assert!(changed);
        let code = method.code();
        // add; capture move; recomputed add; move dest <- temp; check_eq; ret
        assert_eq!(code.len(), 6);
        assert_eq!(code[2].opcode, Opcode::Add);
        assert_eq!(code[3].opcode, Opcode::Move);
        assert_eq!(code[4].opcode, Opcode::CheckEq);
    }

    #[test]
    fn test_patch_requires_built_graph() {
        let shared = frozen_shared();
        let mut method = MethodBuilder::new("app.T", "f")
            .const_(Reg(0), 1)
            .ret_val(Reg(0))
            .build();
        let mut engine = ValueNumbering::new(&shared, 256, false);
        assert!(engine.patch(&mut method).is_err());
    }

    #[test]
    fn test_merge_block_resets_memory() {
        let shared = frozen_shared();
        let f = FieldRef::new("app.T", "f");
        // load f; branch; join block loads f again -- the join has two
        // predecessors, so the earlier load must not be reused.
        let mut method = MethodBuilder::new("app.T", "loads")
            .instance()
            .param("int")
            .get_field(Reg(2), Reg(0), f.clone())
            .push(Instruction::if_zero(Reg(1), 3))
            .push(Instruction::nop())
            .get_field(Reg(3), Reg(0), f)
            .ret_val(Reg(3))
            .build();
        let (_, stats) = run(&mut method, &shared);
        assert_eq!(stats.results_captured, 0);
    }
}
