//! The optimizer: value numbering, collaborator passes, and orchestration.
//!
//! Layering, bottom to top:
//!
//! - [`ValueNumbering`] — per-method redundancy detection and rewrite
//! - [`CopyPropagation`] / [`LocalDce`] — cleanup between iterations
//! - [`FixpointDriver`] — loops the three over one method until nothing
//!   changes
//! - [`CsePass`] — runs the driver over a whole [`crate::ir::Scope`] in
//!   parallel and merges the [`Stats`]

mod copyprop;
mod cse;
mod dce;
mod driver;
mod pass;
mod stats;

pub use copyprop::{CopyPropagation, CopyPropagationConfig};
pub use cse::{AbstractLocation, ValueNumbering};
pub use dce::LocalDce;
pub use driver::FixpointDriver;
pub use pass::{CseConfig, CsePass, CseReport};
pub use stats::Stats;
