//! Worker runtime for parallel branch exploration.

mod runtime;

pub use runtime::{BranchRuntime, RuntimeStats};
