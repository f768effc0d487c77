//! Block-local copy propagation.
//!
//! Runs between value-numbering iterations, on the linear body. The capture
//! rewrite leaves chains of moves behind (`move temp <- dest`, then
//! `move dest2 <- temp`); this pass redirects later reads through such
//! chains to their ultimate source so the intermediate moves become dead and
//! the next value-numbering iteration sees canonical operands.
//!
//! The copy map is block-local: it resets at every leader (branch target or
//! fall-through after a branch), so no assumption is made about which path
//! reached an instruction. Self-moves left behind by the redirection are
//! rewritten to `nop` rather than removed, keeping branch targets stable;
//! dead-code elimination collects the nops afterwards.

use std::collections::{HashMap, HashSet};

use crate::ir::{FieldRef, Instruction, Method, Opcode, Reg, TypeId};

/// Tunables for [`CopyPropagation`].
#[derive(Debug, Clone)]
pub struct CopyPropagationConfig {
    /// Fold repeated class-literal loads into copies of the first one.
    ///
    /// Off in the elimination pipeline: the engine captures those loads
    /// itself, and folding them here fights its temp allocation.
    pub eliminate_const_classes: bool,
    /// Fold repeated string-literal loads into copies of the first one.
    pub eliminate_const_strings: bool,
    /// Fold repeated static-field reads into copies of the first one.
    pub static_finals: bool,
    /// Methods whose register file already exceeds this are left alone.
    pub max_estimated_registers: u16,
}

impl Default for CopyPropagationConfig {
    fn default() -> Self {
        Self {
            eliminate_const_classes: false,
            eliminate_const_strings: false,
            static_finals: false,
            max_estimated_registers: u16::MAX,
        }
    }
}

/// The copy-propagation pass.
#[derive(Debug, Default)]
pub struct CopyPropagation {
    config: CopyPropagationConfig,
}

impl CopyPropagation {
    /// Creates the pass with the given tunables.
    #[must_use]
    pub fn new(config: CopyPropagationConfig) -> Self {
        Self { config }
    }

    /// Rewrites `method`'s linear body in place. Returns whether anything
    /// changed.
    ///
    /// Must be called while the body is in linear form.
    pub fn run(&self, method: &mut Method) -> bool {
        if method.registers() > self.config.max_estimated_registers {
            return false;
        }

        let leaders = leaders(method);
        let code = method.code_mut();
        let mut state = BlockCopies::default();
        let mut changed = false;

        for (index, instr) in code.iter_mut().enumerate() {
            if leaders.contains(&index) {
                state.clear();
            }

            for src in &mut instr.srcs {
                if let Some(&root) = state.copies.get(src) {
                    if root != *src {
                        *src = root;
                        changed = true;
                    }
                }
            }

            match instr.opcode {
                Opcode::Move => {
                    let (Some(dest), Some(&src)) = (instr.dest, instr.srcs.first()) else {
                        continue;
                    };
                    if dest == src {
                        *instr = Instruction::nop();
                        changed = true;
                        continue;
                    }
                    state.invalidate(dest);
                    state.copies.insert(dest, src);
                }
                Opcode::ConstClass if self.config.eliminate_const_classes => {
                    let (Some(dest), Some(ty)) = (instr.dest, instr.type_ref.clone()) else {
                        continue;
                    };
                    if let Some(&held) = state.const_classes.get(&ty) {
                        *instr = Instruction::move_(dest, held);
                        state.invalidate(dest);
                        state.copies.insert(dest, held);
                        changed = true;
                    } else {
                        state.invalidate(dest);
                        state.const_classes.insert(ty, dest);
                    }
                }
                Opcode::ConstString if self.config.eliminate_const_strings => {
                    let (Some(dest), Some(literal)) = (instr.dest, instr.literal) else {
                        continue;
                    };
                    if let Some(&held) = state.const_strings.get(&literal) {
                        *instr = Instruction::move_(dest, held);
                        state.invalidate(dest);
                        state.copies.insert(dest, held);
                        changed = true;
                    } else {
                        state.invalidate(dest);
                        state.const_strings.insert(literal, dest);
                    }
                }
                Opcode::GetStatic if self.config.static_finals => {
                    let (Some(dest), Some(field)) = (instr.dest, instr.field.clone()) else {
                        continue;
                    };
                    if let Some(&held) = state.statics.get(&field) {
                        *instr = Instruction::move_(dest, held);
                        state.invalidate(dest);
                        state.copies.insert(dest, held);
                        changed = true;
                    } else {
                        state.invalidate(dest);
                        state.statics.insert(field, dest);
                    }
                }
                op if op.is_invoke() || op.writes_memory() => {
                    // Calls and writes may change static contents.
                    state.statics.clear();
                    if let Some(dest) = instr.dest {
                        state.invalidate(dest);
                    }
                }
                _ => {
                    if let Some(dest) = instr.dest {
                        state.invalidate(dest);
                    }
                }
            }
        }

        changed
    }
}

/// Per-block rewrite state.
#[derive(Debug, Default)]
struct BlockCopies {
    /// reg -> its ultimate source within the current block
    copies: HashMap<Reg, Reg>,
    const_classes: HashMap<TypeId, Reg>,
    const_strings: HashMap<i64, Reg>,
    statics: HashMap<FieldRef, Reg>,
}

impl BlockCopies {
    fn clear(&mut self) {
        self.copies.clear();
        self.const_classes.clear();
        self.const_strings.clear();
        self.statics.clear();
    }

    /// `reg` is being overwritten: no mapping through or to it survives.
    fn invalidate(&mut self, reg: Reg) {
        self.copies.remove(&reg);
        self.copies.retain(|_, root| *root != reg);
        self.const_classes.retain(|_, held| *held != reg);
        self.const_strings.retain(|_, held| *held != reg);
        self.statics.retain(|_, held| *held != reg);
    }
}

/// Indices where a basic block starts in the linear body: entry, every
/// branch target, and the instruction after any branch or terminator.
fn leaders(method: &Method) -> HashSet<usize> {
    let mut set = HashSet::new();
    set.insert(0);
    for (index, instr) in method.code().iter().enumerate() {
        if let Some(target) = instr.target {
            set.insert(target);
        }
        if instr.opcode.is_branch() || instr.opcode.is_terminator() {
            set.insert(index + 1);
        }
    }
    set
}
