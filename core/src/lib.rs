//! Runtime core of the strand pattern-matching language: a versioned copy-on-write heap, a
//! signal-driven tree interpreter and a backtracking controller.

pub mod config;
pub mod heap;
pub mod rt;
pub mod tree;
pub mod val;
pub mod vm;

pub use config::{GcConfig, RuntimeConfig};
pub use heap::{Heap, HeapError, HeapStats};
pub use tree::{NodeId, NodeKind, Signal, Tree, TreeBuilder};
pub use val::{Detached, Value};
pub use vm::{ControlKind, Engine, ExecutionFault, ExecutionResult, run};
