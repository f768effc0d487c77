//! Per-method optimization counters and their program-wide merge.
//!
//! Workers produce one [`Stats`] per method; the orchestrator folds them
//! with [`Stats::merge`], which is associative and commutative (sums add,
//! running maxima take the max, the opcode breakdown merges key-wise), so
//! the final totals are independent of worker scheduling order.

use std::collections::HashMap;

use crate::ir::Opcode;

/// Counters accumulated while optimizing one method (or the whole program,
/// after merging).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Redundant computations rewritten to reuse an earlier result.
    pub results_captured: u64,
    /// Stores elided because the location provably already held the value.
    pub stores_captured: u64,
    /// Redundant array-length reads rewritten to reuse an earlier result.
    pub array_lengths_captured: u64,
    /// Instructions replaced or removed, total.
    pub instructions_eliminated: u64,
    /// Eliminated instructions broken down by opcode.
    pub eliminated_opcodes: HashMap<Opcode, u64>,
    /// Highest count of live value numbers observed in any single run.
    pub max_value_ids: u64,
    /// Methods that had to fall back to the coarse "other location" bit.
    pub methods_using_other_tracked_location_bit: u64,
    /// Methods where captures stopped because the register budget ran out.
    pub skipped_due_to_too_many_registers: u64,
    /// Highest per-method fixpoint iteration count observed.
    pub max_iterations: u64,
}

impl Stats {
    /// Folds `other` into `self`.
    ///
    /// Associative and commutative, so any partition and order of merges
    /// produces the same totals.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.results_captured += other.results_captured;
        self.stores_captured += other.stores_captured;
        self.array_lengths_captured += other.array_lengths_captured;
        self.instructions_eliminated += other.instructions_eliminated;
        self.max_value_ids = self.max_value_ids.max(other.max_value_ids);
        self.methods_using_other_tracked_location_bit +=
            other.methods_using_other_tracked_location_bit;
        for (opcode, count) in other.eliminated_opcodes {
            *self.eliminated_opcodes.entry(opcode).or_default() += count;
        }
        self.skipped_due_to_too_many_registers += other.skipped_due_to_too_many_registers;
        self.max_iterations = self.max_iterations.max(other.max_iterations);
        self
    }
}
