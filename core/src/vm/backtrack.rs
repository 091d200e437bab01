//! Backtracking controller.
//!
//! A checkpoint freezes the current heap generation and records where to resume. Backtracking
//! pops the newest checkpoint, rolls the heap back to its generation and hands its saved
//! `(node, signal)` pair back to the dispatch loop. The payload of an explicit backtrack travels
//! outside the heap as a [`Detached`] value, so the rollback cannot erase it.

use anyhow::Result;
use tracing::{debug, trace};

use super::Engine;
use crate::heap::GenerationId;
use crate::tree::{NodeId, Signal};
use crate::val::{Detached, Value};

/// A saved resumption point.
#[derive(Debug, Clone)]
pub struct Continuation {
    pub generation: GenerationId,
    pub node: NodeId,
    pub signal: Signal,
    /// Handed to the node when it resumes, e.g. the index of the next alternative.
    pub state: Value,
}

/// Solutions gathered by one active `collect`.
#[derive(Debug, Clone)]
pub struct Collector {
    pub node: NodeId,
    /// Index of the checkpoint that ends the enumeration.
    pub barrier: usize,
    pub solutions: Vec<Detached>,
}

impl Engine {
    /// Records a resumption point at `(node, signal)` over a freshly frozen generation.
    pub fn checkpoint(&mut self, node: NodeId, signal: Signal, state: Value) {
        let generation = self.heap.new_generation();
        trace!(target: "strand::engine", %node, %signal, %generation, "checkpoint");
        self.continuations.push(Continuation {
            generation,
            node,
            signal,
            state,
        });
    }

    /// Rolls back to the newest checkpoint and returns where to resume, or `None` when no
    /// checkpoint is left.
    pub fn init_backtracking(&mut self) -> Result<Option<(NodeId, Signal)>> {
        let Some(continuation) = self.continuations.pop() else {
            debug!(target: "strand::engine", "no checkpoint left to backtrack to");
            return Ok(None);
        };
        self.heap.restore_generation(continuation.generation)?;
        self.heap.release(continuation.generation);
        debug!(
            target: "strand::engine",
            node = %continuation.node,
            signal = %continuation.signal,
            generation = %continuation.generation,
            pending = self.continuations.len(),
            "backtrack"
        );
        self.resume_state = continuation.state;
        Ok(Some((continuation.node, continuation.signal)))
    }

    /// Sets the payload the next resumption point may consume.
    pub fn set_backtracking_data(&mut self, data: Option<Detached>) {
        self.backtracking_data = data;
    }

    /// Consumes the pending payload.
    pub fn take_backtracking_data(&mut self) -> Option<Detached> {
        self.backtracking_data.take()
    }

    pub fn pending_checkpoints(&self) -> usize {
        self.continuations.len()
    }

    /// Drops every checkpoint above `len`, releasing their generations.
    pub(super) fn drop_checkpoints(&mut self, len: usize) {
        while self.continuations.len() > len {
            if let Some(c) = self.continuations.pop() {
                self.heap.release(c.generation);
            }
        }
    }

    pub(super) fn take_resume_state(&mut self) -> Value {
        std::mem::take(&mut self.resume_state)
    }
}
