//! Local dead-code elimination.
//!
//! Cleans up after copy propagation: once reads have been redirected to a
//! capture temp, the intermediate moves (and any nops copy propagation left
//! in their place) are garbage. The pass walks each block backwards with a
//! liveness set; since no cross-block liveness is computed, every register
//! is assumed live at block exit, so only values provably overwritten before
//! any use within their own block are removed.
//!
//! Removable instructions are those with no observable effect beyond their
//! destination: moves, integer constants, non-trapping arithmetic, and calls
//! to provably pure methods. Loads, casts, and literal-pool loads stay even
//! when dead; they can throw.

use std::collections::HashSet;

use crate::{
    analysis::SharedState,
    ir::{Instruction, Method, Opcode, Reg},
    Error::Graph,
    Result,
};

/// The dead-code elimination pass.
pub struct LocalDce<'a> {
    shared: &'a SharedState,
}

impl<'a> LocalDce<'a> {
    /// Creates the pass against a frozen purity snapshot.
    #[must_use]
    pub fn new(shared: &'a SharedState) -> Self {
        Self { shared }
    }

    /// Removes dead instructions from every block of `method`'s built graph.
    /// Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns [`Graph`] if the method's graph is not built.
    pub fn run(&self, method: &mut Method) -> Result<bool> {
        if !method.cfg_built() {
            return Err(Graph(format!(
                "dead-code elimination requires a built graph for {}",
                method.id()
            )));
        }

        let mut changed = false;
        let Some(cfg) = method.cfg_mut() else {
            return Ok(changed);
        };
        for block in cfg.blocks_mut() {
            let mut dead: Vec<usize> = Vec::new();
            // Registers overwritten below the cursor before any read.
            let mut overwritten: HashSet<Reg> = HashSet::new();

            for (index, instr) in block.instructions.iter().enumerate().rev() {
                if instr.opcode == Opcode::Nop {
                    dead.push(index);
                    continue;
                }
                let removable = instr.dest.is_some_and(|d| overwritten.contains(&d))
                    && self.is_removable(instr);
                if removable {
                    dead.push(index);
                    continue;
                }
                if let Some(dest) = instr.dest {
                    overwritten.insert(dest);
                }
                for src in &instr.srcs {
                    overwritten.remove(src);
                }
            }

            // Indices were collected in descending order.
            for index in dead {
                block.instructions.remove(index);
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Whether `instr` can be dropped when its destination is dead.
    fn is_removable(&self, instr: &Instruction) -> bool {
        match instr.opcode {
            Opcode::Move | Opcode::Const => true,
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Neg
            | Opcode::Not
            | Opcode::Cmp => true,
            op if op.is_invoke() => instr
                .method
                .as_ref()
                .is_some_and(|m| self.shared.is_pure(m)),
            _ => false,
        }
    }
}
