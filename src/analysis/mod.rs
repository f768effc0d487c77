//! Whole-program analysis feeding the optimizer.
//!
//! Two analyses run single-threaded before the parallel phase and are then
//! consumed read-only by every worker:
//!
//! - [`CallGraph`] — who calls whom, rebuilt whenever the scope changes
//! - [`SharedState`] — the frozen purity/barrier classification of every
//!   call target, including the conditional-purity fixpoint over mutually
//!   recursive methods

mod callgraph;
mod purity;

pub use callgraph::{CallGraph, CallSite};
pub use purity::{builtin_pure_methods, SharedState, SharedStats};
