use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use tracing::trace;

use super::unexpected;
use crate::heap::CallFrame;
use crate::tree::{NodeId, NodeKind, Signal, Tag};
use crate::val::{ClosureValue, ContextFrame, IteratorCursor, RefId, RefPayload, Referenced, Value};
use crate::vm::engine::Step;
use crate::vm::{ControlKind, ControlValue, Engine};

/// The loop construct a control value arrived at.
#[derive(Clone, Copy)]
enum LoopShape {
    While { cond: NodeId, body: NodeId },
    Loop { body: NodeId },
    ForEach { body: NodeId },
}

impl Engine {
    pub(super) fn sequence(&mut self, children: &[NodeId], signal: Signal) -> Result<Step> {
        if signal == Signal::START {
            return match children.first() {
                Some(first) => Ok(Step::Enter(*first)),
                None => {
                    self.push(Value::Null);
                    Ok(Step::Finish)
                }
            };
        }
        let Some(k) = signal.child_index().filter(|k| *k < children.len()) else {
            return unexpected("sequence", signal);
        };
        match children.get(k + 1) {
            Some(next) => {
                let dropped = self.pop()?;
                self.discard(dropped)?;
                Ok(Step::Enter(*next))
            }
            None => Ok(Step::Finish),
        }
    }

    pub(super) fn if_(&mut self, cond: NodeId, then: NodeId, otherwise: Option<NodeId>, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => Ok(Step::Enter(cond)),
            s if s == Signal::end_of_child(0) => {
                let c = self.pop()?;
                let truthy = c.is_truthy();
                self.discard(c)?;
                match (truthy, otherwise) {
                    (true, _) => Ok(Step::Enter(then)),
                    (false, Some(otherwise)) => Ok(Step::Enter(otherwise)),
                    (false, None) => {
                        self.push(Value::Null);
                        Ok(Step::Finish)
                    }
                }
            }
            s if s == Signal::end_of_child(1) || s == Signal::end_of_child(2) => Ok(Step::Finish),
            s => unexpected("if", s),
        }
    }

    pub(super) fn while_(&mut self, id: NodeId, tag: &Tag, cond: NodeId, body: NodeId, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => {
                self.arm(id);
                Ok(Step::Enter(cond))
            }
            s if s == Signal::end_of_child(0) => {
                let c = self.pop()?;
                let truthy = c.is_truthy();
                self.discard(c)?;
                if truthy {
                    return Ok(Step::Enter(body));
                }
                self.disarm(id)?;
                self.push(Value::Null);
                Ok(Step::Finish)
            }
            s if s == Signal::end_of_child(1) => {
                let dropped = self.pop()?;
                self.discard(dropped)?;
                Ok(Step::Enter(cond))
            }
            Signal::CONTROL => self.loop_control(id, tag, LoopShape::While { cond, body }),
            s => unexpected("while", s),
        }
    }

    pub(super) fn loop_(&mut self, id: NodeId, tag: &Tag, body: NodeId, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => {
                self.arm(id);
                Ok(Step::Enter(body))
            }
            s if s == Signal::end_of_child(0) => {
                let dropped = self.pop()?;
                self.discard(dropped)?;
                Ok(Step::Enter(body))
            }
            Signal::CONTROL => self.loop_control(id, tag, LoopShape::Loop { body }),
            s => unexpected("loop", s),
        }
    }

    /// Iterates a snapshot of an array (elements) or an object (keys). The iterator value sits
    /// on the stack under the loop's mark for the whole traversal.
    pub(super) fn for_each(
        &mut self,
        id: NodeId,
        tag: &Tag,
        var: &Arc<str>,
        iterable: NodeId,
        body: NodeId,
        signal: Signal,
    ) -> Result<Step> {
        match signal {
            Signal::START => Ok(Step::Enter(iterable)),
            s if s == Signal::end_of_child(0) => {
                let source = self.pop()?;
                let items = self.snapshot(&source)?;
                for item in &items {
                    self.retain(item)?;
                }
                self.discard(source)?;
                let iter = self.alloc(Referenced::mutable(RefPayload::Iterator(IteratorCursor::new(items))));
                self.push(iter);
                self.arm(id);
                self.iterate(id, var, body)
            }
            s if s == Signal::end_of_child(1) => {
                let dropped = self.pop()?;
                self.discard(dropped)?;
                self.iterate(id, var, body)
            }
            Signal::CONTROL => self.loop_control(id, tag, LoopShape::ForEach { body }),
            s => unexpected("for_each", s),
        }
    }

    fn snapshot(&self, source: &Value) -> Result<Vec<Value>> {
        let id = source
            .as_ref_id()
            .ok_or_else(|| anyhow!("cannot iterate over {}", source.type_name()))?;
        match &self.heap.read_referenced(id)?.payload {
            RefPayload::Array(items) => Ok(items.clone()),
            RefPayload::Object(entries) => Ok(entries.iter().map(|(k, _)| Value::Str(Arc::clone(k))).collect()),
            other => bail!("cannot iterate over {}", other.type_name()),
        }
    }

    fn iterator_on_stack(&self) -> Result<RefId> {
        self.heap
            .stack()
            .peek()?
            .as_ref_id()
            .ok_or_else(|| anyhow!("for_each lost its iterator"))
    }

    /// Binds the element under the cursor and runs the body, or ends the loop.
    fn iterate(&mut self, id: NodeId, var: &Arc<str>, body: NodeId) -> Result<Step> {
        let iter = self.iterator_on_stack()?;
        let current = match &self.heap.read_referenced(iter)?.payload {
            RefPayload::Iterator(cursor) => cursor.current().cloned(),
            other => bail!("expected an iterator, found {}", other.type_name()),
        };
        let Some(item) = current else {
            self.disarm(id)?;
            let iter = self.pop()?;
            self.discard(iter)?;
            self.push(Value::Null);
            return Ok(Step::Finish);
        };
        self.with_cursor(iter, IteratorCursor::advance)?;
        self.retain(&item)?;
        let ctx = self.current_context()?;
        self.bind(ctx, var, item)?;
        Ok(Step::Enter(body))
    }

    fn with_cursor(&mut self, iter: RefId, f: fn(&mut IteratorCursor)) -> Result<()> {
        self.heap.modify(iter, |payload| match payload {
            RefPayload::Iterator(cursor) => {
                f(cursor);
                Ok(())
            }
            other => Err(anyhow!("expected an iterator, found {}", other.type_name())),
        })?
    }

    /// Shared `exit`/`next`/`redo`/`restart` handling for the three loop kinds.
    fn loop_control(&mut self, id: NodeId, tag: &Tag, shape: LoopShape) -> Result<Step> {
        let Some(mark) = self.armed(id) else {
            return Ok(Step::Escalate);
        };
        let control = match self.heap.stack().peek()? {
            Value::Control(c) => Arc::clone(c),
            other => bail!("control signal without a control value (found {})", other.type_name()),
        };
        if !control.kind.is_loop_control() || !control.targets(tag) {
            self.disarm(id)?;
            return Ok(Step::Escalate);
        }
        trace!(target: "strand::engine", node = %id, kind = %control.kind, "loop intercepts control");
        let kind = control.kind;
        drop(control);
        let Value::Control(control) = self.pop()? else {
            bail!("control value vanished from the stack");
        };
        let payload = control.into_payload();
        self.truncate(mark.depth)?;

        if kind == ControlKind::Exit {
            self.disarm(id)?;
            if let LoopShape::ForEach { .. } = shape {
                let iter = self.pop()?;
                self.discard(iter)?;
            }
            self.push(payload);
            return Ok(Step::Finish);
        }
        self.discard(payload)?;

        match (shape, kind) {
            (LoopShape::While { body, .. } | LoopShape::Loop { body } | LoopShape::ForEach { body }, ControlKind::Redo) => {
                Ok(Step::Enter(body))
            }
            (LoopShape::While { cond, .. }, _) => Ok(Step::Enter(cond)),
            (LoopShape::Loop { body }, _) => Ok(Step::Enter(body)),
            (LoopShape::ForEach { body }, kind) => {
                if kind == ControlKind::Restart {
                    let iter = self.iterator_on_stack()?;
                    self.with_cursor(iter, IteratorCursor::reset)?;
                }
                let var = match &self.tree.node(id).kind {
                    NodeKind::ForEach { var, .. } => Arc::clone(var),
                    other => bail!("{} is not a for_each node", other.name()),
                };
                self.iterate(id, &var, body)
            }
        }
    }

    /// A block intercepts an `exit` carrying its own tag.
    pub(super) fn block(&mut self, id: NodeId, tag: &Tag, body: NodeId, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => {
                self.arm(id);
                Ok(Step::Enter(body))
            }
            s if s == Signal::end_of_child(0) => {
                self.disarm(id)?;
                Ok(Step::Finish)
            }
            Signal::CONTROL => {
                let Some(mark) = self.armed(id) else {
                    return Ok(Step::Escalate);
                };
                let matches = match self.heap.stack().peek()? {
                    Value::Control(c) => c.kind == ControlKind::Exit && tag.is_some() && c.tag == *tag,
                    _ => false,
                };
                if !matches {
                    self.disarm(id)?;
                    return Ok(Step::Escalate);
                }
                let Value::Control(control) = self.pop()? else {
                    bail!("control value vanished from the stack");
                };
                let payload = control.into_payload();
                self.truncate(mark.depth)?;
                self.disarm(id)?;
                self.push(payload);
                Ok(Step::Finish)
            }
            s => unexpected("block", s),
        }
    }

    /// Evaluating a lambda builds a closure over the current context. Its body only runs
    /// through a call, so the other signals arrive from inside an active call frame.
    pub(super) fn lambda(&mut self, id: NodeId, name: &Tag, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => {
                let context = self.heap.registers().context;
                if let Some(ctx) = context {
                    self.retain(&Value::Ref(ctx))?;
                }
                let closure = self.alloc(Referenced::frozen(RefPayload::Closure(ClosureValue { lambda: id, context })));
                self.push(closure);
                Ok(Step::Finish)
            }
            s if s == Signal::end_of_child(0) => self.body_returned(),
            Signal::CONTROL => self.body_control(name),
            s => unexpected("lambda", s),
        }
    }

    /// A quote evaluates to an immutable node value; calling it runs the body in a child of
    /// the caller's context.
    pub(super) fn quote(&mut self, id: NodeId, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => {
                let node = self.alloc(Referenced::frozen(RefPayload::Node(id)));
                self.push(node);
                Ok(Step::Finish)
            }
            s if s == Signal::end_of_child(0) => self.body_returned(),
            Signal::CONTROL => self.body_control(&None),
            s => unexpected("quote", s),
        }
    }

    fn top_frame(&self) -> Result<CallFrame> {
        self.heap
            .registers()
            .frames
            .last()
            .copied()
            .ok_or_else(|| anyhow!("callable body finished outside of a call"))
    }

    fn body_returned(&mut self) -> Result<Step> {
        let frame = self.top_frame()?;
        Ok(Step::Resume(frame.call_node, Signal::END_CALL))
    }

    /// `return` (untagged, or tagged with the lambda's name) ends the call with its payload;
    /// anything else unwinds the frame and continues from the call site.
    fn body_control(&mut self, name: &Tag) -> Result<Step> {
        let frame = self.top_frame()?;
        let Value::Control(control) = self.pop()? else {
            bail!("control signal without a control value");
        };
        if control.kind == ControlKind::Return && control.targets(name) {
            let payload = control.into_payload();
            self.truncate(frame.depth)?;
            self.push(payload);
            return Ok(Step::Resume(frame.call_node, Signal::END_CALL));
        }
        self.leave_frame()?;
        self.push(Value::Control(control));
        Ok(Step::EscalateFrom(frame.call_node))
    }

    /// Pops the innermost call frame and reinstates the caller's context.
    fn leave_frame(&mut self) -> Result<CallFrame> {
        let frame = self
            .heap
            .registers_mut()
            .frames
            .pop()
            .ok_or_else(|| anyhow!("call frame stack is empty"))?;
        let callee = std::mem::replace(&mut self.heap.registers_mut().context, frame.caller_context);
        if let Some(ctx) = callee {
            self.discard(Value::Ref(ctx))?;
        }
        Ok(frame)
    }

    pub(super) fn call(&mut self, id: NodeId, callee: NodeId, args: &[NodeId], signal: Signal) -> Result<Step> {
        if signal == Signal::START {
            return Ok(Step::Enter(callee));
        }
        if signal == Signal::END_CALL {
            self.leave_frame()?;
            return Ok(Step::Finish);
        }
        let Some(k) = signal.child_index().filter(|k| *k <= args.len()) else {
            return unexpected("call", signal);
        };
        if let Some(next) = args.get(k) {
            return Ok(Step::Enter(*next));
        }

        let mut values = self.pop_n(args.len() + 1)?.into_iter();
        let target = values.next().unwrap_or_default();
        let target_id = target
            .as_ref_id()
            .ok_or_else(|| anyhow!("cannot call {}", target.type_name()))?;
        let (entry, parent, params) = match &self.heap.read_referenced(target_id)?.payload {
            RefPayload::Closure(closure) => match &self.tree.node(closure.lambda).kind {
                NodeKind::Lambda { params, body, .. } => (*body, closure.context, params.clone()),
                other => bail!("closure points at a {} node", other.name()),
            },
            RefPayload::Node(quoted) => match &self.tree.node(*quoted).kind {
                NodeKind::Quote { body } => (*body, self.heap.registers().context, Vec::new()),
                other => bail!("quoted value points at a {} node", other.name()),
            },
            other => bail!("cannot call {}", other.type_name()),
        };

        if let Some(ctx) = parent {
            self.retain(&Value::Ref(ctx))?;
        }
        let mut frame = ContextFrame::child_of(parent);
        let mut extra = Vec::new();
        for param in &params {
            let v = values.next().unwrap_or(Value::Null);
            if let Some(old) = frame.vars.insert(Arc::clone(param), v) {
                extra.push(old);
            }
        }
        extra.extend(values);
        for v in extra {
            self.discard(v)?;
        }
        self.discard(target)?;

        let context = self.alloc(Referenced::mutable(RefPayload::Context(frame)));
        let depth = self.stack_len();
        let registers = self.heap.registers_mut();
        let caller_context = std::mem::replace(&mut registers.context, context.as_ref_id());
        registers.frames.push(CallFrame {
            call_node: id,
            caller_context,
            depth,
        });
        trace!(target: "strand::engine", call = %id, %entry, depth = registers.frames.len(), "enter call");
        Ok(Step::Enter(entry))
    }

    pub(super) fn control(
        &mut self,
        id: NodeId,
        kind: ControlKind,
        tag: &Tag,
        value: Option<NodeId>,
        signal: Signal,
    ) -> Result<Step> {
        let payload = match (signal, value) {
            (Signal::START, Some(value)) => return Ok(Step::Enter(value)),
            (Signal::START, None) => Value::Null,
            (Signal::END_EXPRESSION, Some(_)) => self.pop()?,
            (s, _) => return unexpected("control", s),
        };
        if kind == ControlKind::Backtrack {
            return self.raise_backtrack(payload);
        }
        let span = self.tree.node(id).span;
        self.push(Value::Control(Arc::new(ControlValue {
            kind,
            tag: tag.clone(),
            payload,
            span,
            origin: id,
        })));
        Ok(Step::Escalate)
    }
}
