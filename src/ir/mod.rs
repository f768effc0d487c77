//! Register-machine intermediate representation.
//!
//! This module provides the instruction model the optimizer operates on:
//!
//! - [`Instruction`] / [`Opcode`] — register-based instructions with
//!   classification helpers (purity, memory writes, terminators)
//! - [`Method`] / [`Scope`] — units of compilation and the program scope
//! - [`ControlFlowGraph`] — the scoped block-level view of a method body
//! - [`MethodBuilder`] — programmatic construction for tests and benchmarks
//!
//! The graph is a checked-out resource: a method body lives in linear form,
//! passes build the graph, transform blocks, and release it (committing the
//! rewritten blocks back to linear form) before anything else touches the
//! method.

mod builder;
mod cfg;
mod instruction;
mod method;

pub use builder::MethodBuilder;
pub use cfg::{BasicBlock, BlockId, ControlFlowGraph};
pub use instruction::{FieldRef, Instruction, MethodRef, Opcode, Reg, TypeId};
pub use method::{Method, MethodFlags, Scope};
