//! Execution engine.
//!
//! The engine advances a lowered node tree one `(node, signal)` transition at a time over a
//! versioned heap. Control statements travel up the tree as values, and backtracking restores
//! an earlier heap generation instead of unwinding host stack frames.

mod analyze;
mod backtrack;
mod control;
mod engine;
mod fault;
mod parallel;

pub use backtrack::{Collector, Continuation};
pub use control::{ControlKind, ControlValue};
pub use engine::{Engine, run};
pub use fault::{ExecutionFault, ExecutionResult};
