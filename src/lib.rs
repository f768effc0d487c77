// Copyright 2026 The vmcse contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # vmcse
//!
//! Common subexpression elimination for register-based virtual machine
//! bytecode, built in pure Rust. `vmcse` classifies method purity across a
//! whole program, value-numbers each method over its dominator tree, and
//! rewrites redundant computations, loads, and stores to reuse earlier
//! results — safely, on a register machine without SSA form.
//!
//! ## Features
//!
//! - **Whole-program purity analysis** — conditional purity resolved by
//!   fixpoint over the call graph, so mutually recursive helpers still
//!   classify as pure
//! - **Memory-aware value numbering** — field, static, and array locations
//!   tracked with versions, invalidated precisely on writes and coarsely on
//!   method barriers
//! - **Register-machine captures** — reused values are pinned in fresh temp
//!   registers, never recomputed into clobbered ones
//! - **Parallel orchestration** — methods optimized concurrently with a
//!   deterministic merged report
//! - **Run-time verification mode** — optional checks that trip if a capture
//!   was ever unsound
//!
//! ## Quick Start
//!
//! ```rust
//! use vmcse::ir::{MethodBuilder, Opcode, Reg, Scope};
//! use vmcse::opt::{CseConfig, CsePass};
//!
//! // int sum = a + b; int again = a + b; return again;
//! let scope = Scope::new();
//! scope.add_method(
//!     MethodBuilder::new("app.Main", "twice")
//!         .param("int")
//!         .param("int")
//!         .binop(Opcode::Add, Reg(2), Reg(0), Reg(1))
//!         .binop(Opcode::Add, Reg(3), Reg(0), Reg(1))
//!         .ret_val(Reg(3))
//!         .build(),
//! );
//!
//! let report = CsePass::new(CseConfig::default()).run(&scope)?;
//! assert_eq!(report.stats.results_captured, 1);
//! # Ok::<(), vmcse::Error>(())
//! ```
//!
//! ## Architecture
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`ir`] | Instructions, control-flow graphs, methods, the program scope |
//! | [`analysis`] | Call graph and the shared purity/barrier classification |
//! | [`opt`] | Value numbering, copy propagation, dead-code elimination, the fixpoint driver, and the parallel pass |

pub mod analysis;
pub mod ir;
pub mod opt;

mod error;

pub use error::{Error, Result};

/// Common imports for typical use of the crate.
///
/// ```rust
/// use vmcse::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        analysis::{CallGraph, SharedState},
        ir::{
            BasicBlock, BlockId, ControlFlowGraph, FieldRef, Instruction, Method, MethodBuilder,
            MethodFlags, MethodRef, Opcode, Reg, Scope, TypeId,
        },
        opt::{CseConfig, CsePass, CseReport, Stats},
        Error, Result,
    };
}
