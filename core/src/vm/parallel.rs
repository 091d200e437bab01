//! Parallel exploration of alternation branches under `collect`.
//!
//! Each branch runs on its own worker engine over a forked heap. Forks share the frozen
//! ancestor chain read-only, so workers never lock the heap; only the id counter and the GC
//! policy are shared. Solutions are merged in branch order, which makes the result identical
//! to the sequential enumeration.

use anyhow::Result;
use tracing::debug;

use super::Engine;
use crate::tree::NodeId;
use crate::val::Detached;

impl Engine {
    pub(super) fn collect_parallel(&mut self, alternation: NodeId, branches: &[NodeId]) -> Result<Vec<Detached>> {
        let runtime = self.branch_runtime()?;
        let mut jobs = Vec::with_capacity(branches.len());
        for &start in branches {
            let heap = self.heap.fork();
            let mut worker = self.branch_worker(heap, alternation);
            jobs.push(move || worker.run_branch(start));
        }
        debug!(target: "strand::engine", %alternation, branches = jobs.len(), "parallel collect");

        let mut solutions = Vec::new();
        for (i, outcome) in runtime.run_all(jobs)?.into_iter().enumerate() {
            match outcome {
                Ok(found) => solutions.extend(found),
                Err(fault) => {
                    debug!(target: "strand::engine", branch = i, %fault, "parallel branch failed");
                    return Err(anyhow::Error::new(fault));
                }
            }
        }
        Ok(solutions)
    }
}
