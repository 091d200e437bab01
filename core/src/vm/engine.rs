use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context as _, Result, anyhow, bail};
use tracing::{debug, trace, warn};

use super::backtrack::{Collector, Continuation};
use super::{ControlKind, ControlValue, ExecutionFault, ExecutionResult};
use crate::config::RuntimeConfig;
use crate::heap::{Heap, HeapStats, Mark};
use crate::rt::BranchRuntime;
use crate::tree::{NodeId, Signal, Tree};
use crate::val::{ContextFrame, Detached, RefId, RefPayload, Referenced, Value};

/// Steps between two deadline checks.
const DEADLINE_CHECK_INTERVAL: u64 = 64;

/// What a node's analyzer asks the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Run `child` from `Signal::START`.
    Enter(NodeId),
    /// Hand `signal` to an arbitrary node.
    Resume(NodeId, Signal),
    /// The node is done; its parent receives the node's parent signal.
    Finish,
    /// A control value is on top of the stack; hand `Signal::CONTROL` to the parent.
    Escalate,
    /// Escalate as if the given node had raised the control value.
    EscalateFrom(NodeId),
    /// Roll back to the latest checkpoint.
    Backtrack,
}

/// Signal-dispatch interpreter over one [`Tree`] and one [`Heap`].
///
/// The engine holds exactly one `(node, signal)` pair between steps. Everything a resumed
/// continuation needs lives in the heap's current generation, so rolling back is restoring a
/// generation and handing a saved pair to `analyze` again.
#[derive(Debug)]
pub struct Engine {
    pub(super) tree: Arc<Tree>,
    pub(super) config: Arc<RuntimeConfig>,
    pub(super) heap: Heap,
    pub(super) continuations: Vec<Continuation>,
    pub(super) collectors: Vec<Collector>,
    pub(super) backtracking_data: Option<Detached>,
    /// Node-private state handed over by the continuation that resumed last.
    pub(super) resume_state: Value,
    pub(super) steps: u64,
    started: Instant,
    deadline: Option<Instant>,
    /// Set on parallel branch workers: reaching this node finishes one solution.
    pub(super) boundary: Option<NodeId>,
    pub(super) branch_solutions: Vec<Detached>,
    pub(super) branches: Option<Arc<BranchRuntime>>,
}

impl Engine {
    pub fn new(tree: Arc<Tree>) -> Self {
        Self::with_config(tree, Arc::new(RuntimeConfig::default()))
    }

    pub fn with_config(tree: Arc<Tree>, config: Arc<RuntimeConfig>) -> Self {
        let heap = Heap::new(Arc::clone(&config));
        Self::with_heap(tree, config, heap)
    }

    pub(super) fn with_heap(tree: Arc<Tree>, config: Arc<RuntimeConfig>, heap: Heap) -> Self {
        Self {
            tree,
            config,
            heap,
            continuations: Vec::new(),
            collectors: Vec::new(),
            backtracking_data: None,
            resume_state: Value::Null,
            steps: 0,
            started: Instant::now(),
            deadline: None,
            boundary: None,
            branch_solutions: Vec::new(),
            branches: None,
        }
    }

    /// Worker engine for one branch of a parallel collect. Shares the caller's deadline and
    /// never fans out again.
    pub(super) fn branch_worker(&self, heap: Heap, boundary: NodeId) -> Self {
        let mut worker = Self::with_heap(Arc::clone(&self.tree), Arc::clone(&self.config), heap);
        worker.started = self.started;
        worker.deadline = self.deadline;
        worker.boundary = Some(boundary);
        worker
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    pub fn config(&self) -> &Arc<RuntimeConfig> {
        &self.config
    }

    pub fn stats(&self) -> HeapStats {
        self.heap.stats()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Drives the tree from its root to completion and returns the detached result.
    pub fn run(&mut self) -> ExecutionResult {
        self.started = Instant::now();
        self.deadline = match self.config.timeout_ms {
            0 => None,
            _ => Some(self.started + self.config.timeout()),
        };
        self.bootstrap()?;
        let root = self.tree.root();
        debug!(target: "strand::engine", %root, nodes = self.tree.len(), "run started");

        self.drive(Some((root, Signal::START)))?;

        let result = self.heap.stack_mut().pop().context("program produced no value")?;
        let detached = self.heap.detach(&result)?;
        self.discard(result)?;
        debug!(
            target: "strand::engine",
            steps = self.steps,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(detached)
    }

    /// Runs one branch of a parallel collect until every solution is enumerated.
    pub(super) fn run_branch(&mut self, start: NodeId) -> Result<Vec<Detached>, ExecutionFault> {
        self.drive(Some((start, Signal::START)))?;
        Ok(std::mem::take(&mut self.branch_solutions))
    }

    fn bootstrap(&mut self) -> Result<()> {
        if self.heap.registers().context.is_none() {
            let root = self.alloc(Referenced::mutable(RefPayload::Context(ContextFrame::default())));
            self.heap.registers_mut().context = root.as_ref_id();
        }
        Ok(())
    }

    fn drive(&mut self, mut cursor: Option<(NodeId, Signal)>) -> Result<(), ExecutionFault> {
        while let Some((node, signal)) = cursor {
            self.tick()?;
            trace!(target: "strand::engine", %node, %signal, kind = self.tree.node(node).kind.name(), "step");
            let step = match self.analyze(node, signal) {
                Ok(step) => step,
                Err(e) => return Err(self.fault(node, e)),
            };
            cursor = self.resolve(node, step)?;
        }
        Ok(())
    }

    /// Faults raised by nested engines pass through unchanged; anything else gets the
    /// failing node attached.
    fn fault(&self, node: NodeId, e: anyhow::Error) -> ExecutionFault {
        match e.downcast::<ExecutionFault>() {
            Ok(fault) => fault,
            Err(e) => ExecutionFault::Runtime(e.context(self.describe(node))),
        }
    }

    fn describe(&self, node: NodeId) -> String {
        let n = self.tree.node(node);
        match n.span {
            Some(span) => format!("at {} ({}) in {}", span, node, self.tree.source_text(node)),
            None => format!("at {} in {}", node, self.tree.source_text(node)),
        }
    }

    fn tick(&mut self) -> Result<(), ExecutionFault> {
        self.steps += 1;
        if self.steps % DEADLINE_CHECK_INTERVAL == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    let elapsed_ms = self.started.elapsed().as_millis() as u64;
                    warn!(target: "strand::engine", elapsed_ms, steps = self.steps, "deadline exceeded");
                    return Err(ExecutionFault::Timeout {
                        elapsed_ms,
                        steps: self.steps,
                    });
                }
            }
        }
        if self.steps % self.config.gc.check_interval.max(1) == 0 {
            let roots = self.gc_roots();
            self.heap.maybe_collect(&roots);
            self.heap.rotate_if_oversized();
        }
        Ok(())
    }

    fn gc_roots(&self) -> Vec<Value> {
        let mut roots = vec![self.resume_state.clone()];
        roots.extend(self.continuations.iter().map(|c| c.state.clone()));
        roots
    }

    fn resolve(&mut self, node: NodeId, step: Step) -> Result<Option<(NodeId, Signal)>, ExecutionFault> {
        match step {
            Step::Enter(child) => Ok(Some((child, Signal::START))),
            Step::Resume(target, signal) => Ok(Some((target, signal))),
            Step::Finish => self.finish_from(node),
            Step::Escalate => self.escalate_from(node),
            Step::EscalateFrom(origin) => self.escalate_from(origin),
            Step::Backtrack => self.backtrack_or_fail(),
        }
    }

    fn finish_from(&mut self, node: NodeId) -> Result<Option<(NodeId, Signal)>, ExecutionFault> {
        let (parent, signal) = {
            let n = self.tree.node(node);
            (n.parent, n.parent_signal)
        };
        match parent {
            Some(parent) if Some(parent) == self.boundary => {
                let value = self.pop()?;
                let solution = self.heap.detach(&value)?;
                self.discard(value)?;
                trace!(target: "strand::engine", %solution, "branch solution");
                self.branch_solutions.push(solution);
                self.backtrack_or_fail()
            }
            Some(parent) => Ok(Some((parent, signal))),
            None => Ok(None),
        }
    }

    fn escalate_from(&mut self, origin: NodeId) -> Result<Option<(NodeId, Signal)>, ExecutionFault> {
        match self.tree.node(origin).parent {
            Some(parent) if Some(parent) != self.boundary => Ok(Some((parent, Signal::CONTROL))),
            _ => {
                let Value::Control(control) = self.pop()? else {
                    return Err(anyhow!("escalation without a control value on the stack").into());
                };
                Err(self.unhandled(&control))
            }
        }
    }

    fn unhandled(&self, control: &ControlValue) -> ExecutionFault {
        ExecutionFault::UnhandledControl {
            kind: control.kind,
            tag: control.tag.clone(),
            span: control.span,
            source: self.tree.source_text(control.origin).to_string(),
        }
    }

    fn backtrack_or_fail(&mut self) -> Result<Option<(NodeId, Signal)>, ExecutionFault> {
        match self.init_backtracking()? {
            Some(resume) => Ok(Some(resume)),
            // A branch worker is done once its own checkpoints are exhausted.
            None if self.boundary.is_some() => Ok(None),
            None => Err(ExecutionFault::UnhandledControl {
                kind: ControlKind::Backtrack,
                tag: None,
                span: None,
                source: String::new(),
            }),
        }
    }

    // Stack and reference helpers shared by the analyzers. Every `Value::Ref` sitting on the
    // operand stack owns one reference count.

    #[inline]
    pub(super) fn push(&mut self, v: Value) {
        self.heap.stack_mut().push(v);
    }

    #[inline]
    pub(super) fn pop(&mut self) -> Result<Value> {
        self.heap.stack_mut().pop()
    }

    pub(super) fn pop_n(&mut self, n: usize) -> Result<Vec<Value>> {
        let len = self.heap.stack().len();
        let depth = len
            .checked_sub(n)
            .ok_or_else(|| anyhow!("operand stack underflow: wanted {} values, have {}", n, len))?;
        self.heap.stack_mut().split_off(depth)
    }

    pub(super) fn stack_len(&self) -> usize {
        self.heap.stack().len()
    }

    /// Takes one more count on whatever `v` refers to.
    pub(super) fn retain(&mut self, v: &Value) -> Result<()> {
        match v {
            Value::Ref(id) => {
                self.heap.increase_ref_count(*id)?;
            }
            Value::Control(c) => self.retain(&c.payload)?,
            _ => {}
        }
        Ok(())
    }

    /// Drops the count `v` owned.
    pub(super) fn discard(&mut self, v: Value) -> Result<()> {
        match v {
            Value::Ref(id) => {
                self.heap.decrease_ref_count(id)?;
            }
            Value::Control(c) => self.discard(c.into_payload())?,
            _ => {}
        }
        Ok(())
    }

    /// Pops and discards everything above `depth`.
    pub(super) fn truncate(&mut self, depth: usize) -> Result<()> {
        let dropped = self.heap.stack_mut().split_off(depth)?;
        for v in dropped.into_iter().rev() {
            self.discard(v)?;
        }
        Ok(())
    }

    pub(super) fn alloc(&mut self, value: Referenced) -> Value {
        Value::Ref(self.heap.allocate_referenced(value))
    }

    pub(super) fn arm(&mut self, node: NodeId) {
        let depth = self.stack_len();
        let registers = self.heap.registers_mut();
        let frames = registers.frames.len();
        registers.marks.push(Mark { node, depth, frames });
    }

    /// The mark `node` pushed in the current call, if it is the innermost one.
    pub(super) fn armed(&self, node: NodeId) -> Option<Mark> {
        let registers = self.heap.registers();
        registers
            .marks
            .last()
            .filter(|m| m.node == node && m.frames == registers.frames.len())
            .copied()
    }

    pub(super) fn disarm(&mut self, node: NodeId) -> Result<Mark> {
        let marks = &mut self.heap.registers_mut().marks;
        match marks.last().copied() {
            Some(m) if m.node == node => {
                marks.pop();
                Ok(m)
            }
            Some(m) => bail!("mark of {} is not innermost ({} is)", node, m.node),
            None => bail!("no mark armed for {}", node),
        }
    }

    pub(super) fn current_context(&self) -> Result<RefId> {
        self.heap
            .registers()
            .context
            .ok_or_else(|| anyhow!("no active context"))
    }

    fn frame(&self, id: RefId) -> Result<&ContextFrame> {
        match &self.heap.read_referenced(id)?.payload {
            RefPayload::Context(frame) => Ok(frame),
            other => bail!("expected a context at {}, found {}", id, other.type_name()),
        }
    }

    /// Looks `name` up through the context chain.
    pub(super) fn lookup(&self, name: &str) -> Result<Value> {
        let mut cursor = self.heap.registers().context;
        while let Some(id) = cursor {
            let frame = self.frame(id)?;
            if let Some(v) = frame.vars.get(name) {
                return Ok(v.clone());
            }
            cursor = frame.parent;
        }
        bail!("undefined variable '{}'", name)
    }

    /// Innermost frame that already binds `name`.
    pub(super) fn defining_frame(&self, name: &str) -> Result<RefId> {
        let mut cursor = self.heap.registers().context;
        while let Some(id) = cursor {
            let frame = self.frame(id)?;
            if frame.vars.contains_key(name) {
                return Ok(id);
            }
            cursor = frame.parent;
        }
        bail!("assignment to undefined variable '{}'", name)
    }

    /// Binds `name` in `frame`, taking over the count `value` owns.
    pub(super) fn bind(&mut self, frame: RefId, name: &Arc<str>, value: Value) -> Result<()> {
        let displaced = self.heap.modify(frame, |payload| match payload {
            RefPayload::Context(f) => Ok(f.vars.insert(Arc::clone(name), value)),
            other => Err(anyhow!("expected a context at {}, found {}", frame, other.type_name())),
        })??;
        if let Some(old) = displaced {
            self.discard(old)?;
        }
        Ok(())
    }

    pub(super) fn branch_runtime(&mut self) -> Result<Arc<BranchRuntime>> {
        if let Some(rt) = &self.branches {
            return Ok(Arc::clone(rt));
        }
        let rt = Arc::new(BranchRuntime::new(self.config.branch_workers)?);
        self.branches = Some(Arc::clone(&rt));
        Ok(rt)
    }
}

/// Runs `tree` to completion under `config`.
pub fn run(tree: Arc<Tree>, config: Arc<RuntimeConfig>) -> ExecutionResult {
    Engine::with_config(tree, config).run()
}
