use anyhow::{Result, bail};
use tracing::{debug, trace};

use super::unexpected;
use crate::tree::{NodeId, NodeKind, Signal};
use crate::val::{Detached, RefPayload, Referenced, Value};
use crate::vm::backtrack::Collector;
use crate::vm::engine::Step;
use crate::vm::Engine;

impl Engine {
    /// Tries branches in order. Every branch but the last leaves a checkpoint that resumes the
    /// alternation at the next branch.
    pub(super) fn alternation(&mut self, id: NodeId, branches: &[NodeId], signal: Signal) -> Result<Step> {
        let next = match signal {
            Signal::START => 0,
            Signal::NEXT_ALTERNATIVE => match self.take_resume_state() {
                Value::Int(k) if k >= 0 => k as usize,
                other => bail!("alternation resumed with {}", other),
            },
            s if s.child_index().is_some_and(|k| k < branches.len()) => return Ok(Step::Finish),
            s => return unexpected("alternation", s),
        };
        let Some(branch) = branches.get(next) else {
            return Ok(Step::Backtrack);
        };
        if next + 1 < branches.len() {
            self.checkpoint(id, Signal::NEXT_ALTERNATIVE, Value::Int(next as i64 + 1));
        }
        Ok(Step::Enter(*branch))
    }

    /// Greedy quantifier. Keeps `[items.., count]` on the stack and checkpoints before every
    /// iteration, so a failing iteration resumes here with `REPEAT_STOP`.
    pub(super) fn repeat(&mut self, id: NodeId, body: NodeId, min: u32, max: Option<u32>, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => {
                self.push(Value::Int(0));
                self.repeat_next(id, body, max)
            }
            s if s == Signal::end_of_child(0) => {
                let item = self.pop()?;
                let count = repeat_count(&self.pop()?)?;
                self.push(item);
                self.push(Value::Int(count + 1));
                self.repeat_next(id, body, max)
            }
            Signal::REPEAT_STOP => {
                let count = repeat_count(self.heap.stack().peek()?)?;
                if count < i64::from(min) {
                    trace!(target: "strand::engine", node = %id, count, min, "repeat below minimum");
                    return Ok(Step::Backtrack);
                }
                self.repeat_finish()
            }
            s => unexpected("repeat", s),
        }
    }

    fn repeat_next(&mut self, id: NodeId, body: NodeId, max: Option<u32>) -> Result<Step> {
        let count = repeat_count(self.heap.stack().peek()?)?;
        if max.is_some_and(|max| count >= i64::from(max)) {
            return self.repeat_finish();
        }
        self.checkpoint(id, Signal::REPEAT_STOP, Value::Null);
        Ok(Step::Enter(body))
    }

    fn repeat_finish(&mut self) -> Result<Step> {
        let count = self.pop()?;
        let Some(n) = count.as_int().and_then(|n| usize::try_from(n).ok()) else {
            bail!("repeat lost its counter (found {})", count);
        };
        let items = self.pop_n(n)?;
        let arr = self.alloc(Referenced::mutable(RefPayload::Array(items)));
        self.push(arr);
        Ok(Step::Finish)
    }

    pub(super) fn guard(&mut self, cond: NodeId, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => Ok(Step::Enter(cond)),
            s if s == Signal::end_of_child(0) => {
                let c = self.pop()?;
                let truthy = c.is_truthy();
                self.discard(c)?;
                if !truthy {
                    return Ok(Step::Backtrack);
                }
                self.push(Value::Bool(true));
                Ok(Step::Finish)
            }
            s => unexpected("guard", s),
        }
    }

    pub(super) fn backtrack(&mut self, value: Option<NodeId>, signal: Signal) -> Result<Step> {
        match (signal, value) {
            (Signal::START, Some(value)) => Ok(Step::Enter(value)),
            (Signal::START, None) => self.raise_backtrack(Value::Null),
            (s, Some(_)) if s == Signal::end_of_child(0) => {
                let payload = self.pop()?;
                self.raise_backtrack(payload)
            }
            (s, _) => unexpected("backtrack", s),
        }
    }

    /// Detaches `payload` as the pending backtracking data and rolls back.
    pub(super) fn raise_backtrack(&mut self, payload: Value) -> Result<Step> {
        let data = match &payload {
            Value::Null => None,
            v => Some(self.heap.detach(v)?),
        };
        self.discard(payload)?;
        self.set_backtracking_data(data);
        Ok(Step::Backtrack)
    }

    pub(super) fn backtrack_data(&mut self) -> Result<Step> {
        let v = match self.take_backtracking_data() {
            Some(data) => self.heap.attach(&data),
            None => Value::Null,
        };
        self.push(v);
        Ok(Step::Finish)
    }

    /// Gathers every solution of `body` into an array.
    ///
    /// A barrier checkpoint taken on entry ends the enumeration: each solution is recorded and
    /// rejected by backtracking, and once the body has no alternatives left the barrier resumes
    /// the collect with `COLLECT_DONE`.
    pub(super) fn collect(&mut self, id: NodeId, body: NodeId, parallel: bool, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => {
                if let Some(branches) = self.parallel_branches(body, parallel) {
                    let solutions = self.collect_parallel(body, &branches)?;
                    return self.push_solutions(solutions);
                }
                self.checkpoint(id, Signal::COLLECT_DONE, Value::Null);
                self.collectors.push(Collector {
                    node: id,
                    barrier: self.continuations.len() - 1,
                    solutions: Vec::new(),
                });
                Ok(Step::Enter(body))
            }
            s if s == Signal::end_of_child(0) => {
                let v = self.pop()?;
                let solution = self.heap.detach(&v)?;
                self.discard(v)?;
                let collector = self.active_collector(id)?;
                trace!(target: "strand::engine", node = %id, %solution, n = collector.solutions.len() + 1, "solution");
                collector.solutions.push(solution);
                Ok(Step::Backtrack)
            }
            Signal::COLLECT_DONE => {
                self.active_collector(id)?;
                let Some(collector) = self.collectors.pop() else {
                    bail!("collect {} has no collector", id);
                };
                debug!(target: "strand::engine", node = %id, solutions = collector.solutions.len(), "collect finished");
                self.push_solutions(collector.solutions)
            }
            Signal::CONTROL => {
                // A control value leaving the body abandons the enumeration and its checkpoints.
                if self.collectors.last().is_some_and(|c| c.node == id) {
                    if let Some(collector) = self.collectors.pop() {
                        self.drop_checkpoints(collector.barrier);
                    }
                }
                Ok(Step::Escalate)
            }
            s => unexpected("collect", s),
        }
    }

    fn active_collector(&mut self, id: NodeId) -> Result<&mut Collector> {
        match self.collectors.last_mut() {
            Some(c) if c.node == id => Ok(c),
            Some(c) => bail!("collect {} found the collector of {} on top", id, c.node),
            None => bail!("collect {} has no collector", id),
        }
    }

    fn push_solutions(&mut self, solutions: Vec<Detached>) -> Result<Step> {
        let arr = self.heap.attach(&Detached::Array(solutions));
        self.push(arr);
        Ok(Step::Finish)
    }

    /// Branches of `body` when it qualifies for parallel exploration.
    fn parallel_branches(&self, body: NodeId, parallel: bool) -> Option<Vec<NodeId>> {
        if !parallel || !self.config.parallel_branches || self.boundary.is_some() {
            return None;
        }
        match &self.tree.node(body).kind {
            NodeKind::Alternation(branches) if branches.len() > 1 => Some(branches.clone()),
            _ => None,
        }
    }
}

fn repeat_count(v: &Value) -> Result<i64> {
    match v.as_int() {
        Some(n) if n >= 0 => Ok(n),
        _ => bail!("repeat lost its counter (found {})", v),
    }
}
