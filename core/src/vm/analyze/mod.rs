//! Per-node transition functions.
//!
//! `analyze` is the single entry point: one `match` arm per node kind, each a small state
//! machine over [`Signal`]. Analyzers never call each other; they return a [`Step`] and the
//! engine performs it.

use anyhow::{Result, bail};

use super::Engine;
use super::engine::Step;
use crate::tree::{NodeId, NodeKind, Signal};

mod data;
mod flow;
mod pattern;

impl Engine {
    pub(crate) fn analyze(&mut self, id: NodeId, signal: Signal) -> Result<Step> {
        let tree = self.tree.clone();
        let node = tree.node(id);
        if signal == Signal::CONTROL && !intercepts_control(&node.kind) {
            return Ok(Step::Escalate);
        }
        match &node.kind {
            NodeKind::Literal(v) => {
                self.push(v.clone());
                Ok(Step::Finish)
            }
            NodeKind::Sequence(children) => self.sequence(children, signal),
            NodeKind::Load(name) => self.load(name),
            NodeKind::Define { name, value } => self.define(name, *value, signal, false),
            NodeKind::Store { name, value } => self.define(name, *value, signal, true),
            NodeKind::Unary { op, operand } => self.unary(*op, *operand, signal),
            NodeKind::Binary { op, lhs, rhs } => self.binary(*op, *lhs, *rhs, signal),
            NodeKind::If { cond, then, otherwise } => self.if_(*cond, *then, *otherwise, signal),
            NodeKind::While { tag, cond, body } => self.while_(id, tag, *cond, *body, signal),
            NodeKind::Loop { tag, body } => self.loop_(id, tag, *body, signal),
            NodeKind::ForEach {
                tag,
                var,
                iterable,
                body,
            } => self.for_each(id, tag, var, *iterable, *body, signal),
            NodeKind::Block { tag, body } => self.block(id, tag, *body, signal),
            NodeKind::Array(items) => self.array(items, signal),
            NodeKind::Object {
                keys,
                values,
                immutable,
            } => self.object(keys, values, *immutable, signal),
            NodeKind::Index { target, index } => self.index(*target, *index, signal),
            NodeKind::Member { target, key } => self.member(*target, key, signal),
            NodeKind::SetMember { target, key, value } => self.set_member(*target, key, *value, signal),
            NodeKind::Append { target, value } => self.append(*target, *value, signal),
            NodeKind::Lambda { name, .. } => self.lambda(id, name, signal),
            NodeKind::Quote { .. } => self.quote(id, signal),
            NodeKind::Call { callee, args } => self.call(id, *callee, args, signal),
            NodeKind::Control { kind, tag, value } => self.control(id, *kind, tag, *value, signal),
            NodeKind::Alternation(branches) => self.alternation(id, branches, signal),
            NodeKind::Repeat { body, min, max } => self.repeat(id, *body, *min, *max, signal),
            NodeKind::Guard(cond) => self.guard(*cond, signal),
            NodeKind::Backtrack(value) => self.backtrack(*value, signal),
            NodeKind::BacktrackData => self.backtrack_data(),
            NodeKind::Collect { body, parallel } => self.collect(id, *body, *parallel, signal),
        }
    }
}

/// Kinds that look at a passing control value; everything else forwards it untouched.
fn intercepts_control(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::While { .. }
            | NodeKind::Loop { .. }
            | NodeKind::ForEach { .. }
            | NodeKind::Block { .. }
            | NodeKind::Lambda { .. }
            | NodeKind::Quote { .. }
            | NodeKind::Collect { .. }
    )
}

pub(super) fn unexpected(kind: &str, signal: Signal) -> Result<Step> {
    bail!("{} node cannot handle signal {}", kind, signal)
}
