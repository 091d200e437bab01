use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use once_cell::sync::OnceCell;

use super::{MAX_CHILDREN, Node, NodeId, NodeKind, Signal, Span, Tag, Tree};
use crate::val::{BinaryOp, UnaryOp, Value};
use crate::vm::ControlKind;

/// Accumulates nodes in any order and links them into a [`Tree`].
///
/// `finish` assigns every parent pointer and parent signal, and rejects shapes the engine
/// cannot run: dangling ids, shared children, unreachable nodes, non-primitive literals,
/// inverted repeat bounds and nodes with more children than signals can address.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<(NodeKind, Option<Span>)>,
}

fn tag(t: Option<&str>) -> Tag {
    t.map(Arc::from)
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, kind: NodeKind) -> NodeId {
        self.push_at(kind, None)
    }

    pub fn push_at(&mut self, kind: NodeKind, span: Option<Span>) -> NodeId {
        self.nodes.push((kind, span));
        NodeId((self.nodes.len() - 1) as u32)
    }

    pub fn literal(&mut self, v: impl Into<Value>) -> NodeId {
        self.push(NodeKind::Literal(v.into()))
    }

    pub fn int(&mut self, i: i64) -> NodeId {
        self.literal(i)
    }

    pub fn null(&mut self) -> NodeId {
        self.push(NodeKind::Literal(Value::Null))
    }

    pub fn seq(&mut self, children: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::Sequence(children))
    }

    pub fn load(&mut self, name: &str) -> NodeId {
        self.push(NodeKind::Load(Arc::from(name)))
    }

    pub fn define(&mut self, name: &str, value: NodeId) -> NodeId {
        self.push(NodeKind::Define {
            name: Arc::from(name),
            value,
        })
    }

    pub fn store(&mut self, name: &str, value: NodeId) -> NodeId {
        self.push(NodeKind::Store {
            name: Arc::from(name),
            value,
        })
    }

    pub fn unary(&mut self, op: UnaryOp, operand: NodeId) -> NodeId {
        self.push(NodeKind::Unary { op, operand })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.push(NodeKind::Binary { op, lhs, rhs })
    }

    pub fn if_(&mut self, cond: NodeId, then: NodeId, otherwise: Option<NodeId>) -> NodeId {
        self.push(NodeKind::If { cond, then, otherwise })
    }

    pub fn while_(&mut self, tag_name: Option<&str>, cond: NodeId, body: NodeId) -> NodeId {
        self.push(NodeKind::While {
            tag: tag(tag_name),
            cond,
            body,
        })
    }

    pub fn loop_(&mut self, tag_name: Option<&str>, body: NodeId) -> NodeId {
        self.push(NodeKind::Loop {
            tag: tag(tag_name),
            body,
        })
    }

    pub fn for_each(&mut self, tag_name: Option<&str>, var: &str, iterable: NodeId, body: NodeId) -> NodeId {
        self.push(NodeKind::ForEach {
            tag: tag(tag_name),
            var: Arc::from(var),
            iterable,
            body,
        })
    }

    pub fn block(&mut self, tag_name: Option<&str>, body: NodeId) -> NodeId {
        self.push(NodeKind::Block {
            tag: tag(tag_name),
            body,
        })
    }

    pub fn array(&mut self, items: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::Array(items))
    }

    pub fn object(&mut self, props: Vec<(&str, NodeId)>, immutable: bool) -> NodeId {
        let (keys, values) = props.into_iter().map(|(k, v)| (Arc::<str>::from(k), v)).unzip();
        self.push(NodeKind::Object {
            keys,
            values,
            immutable,
        })
    }

    pub fn index(&mut self, target: NodeId, index: NodeId) -> NodeId {
        self.push(NodeKind::Index { target, index })
    }

    pub fn member(&mut self, target: NodeId, key: &str) -> NodeId {
        self.push(NodeKind::Member {
            target,
            key: Arc::from(key),
        })
    }

    pub fn set_member(&mut self, target: NodeId, key: &str, value: NodeId) -> NodeId {
        self.push(NodeKind::SetMember {
            target,
            key: Arc::from(key),
            value,
        })
    }

    pub fn append(&mut self, target: NodeId, value: NodeId) -> NodeId {
        self.push(NodeKind::Append { target, value })
    }

    pub fn lambda(&mut self, name: Option<&str>, params: &[&str], body: NodeId) -> NodeId {
        self.push(NodeKind::Lambda {
            name: tag(name),
            params: params.iter().map(|p| Arc::from(*p)).collect(),
            body,
        })
    }

    pub fn quote(&mut self, body: NodeId) -> NodeId {
        self.push(NodeKind::Quote { body })
    }

    pub fn call(&mut self, callee: NodeId, args: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::Call { callee, args })
    }

    pub fn control(&mut self, kind: ControlKind, tag_name: Option<&str>, value: Option<NodeId>) -> NodeId {
        self.push(NodeKind::Control {
            kind,
            tag: tag(tag_name),
            value,
        })
    }

    pub fn alt(&mut self, branches: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::Alternation(branches))
    }

    pub fn repeat(&mut self, body: NodeId, min: u32, max: Option<u32>) -> NodeId {
        self.push(NodeKind::Repeat { body, min, max })
    }

    pub fn guard(&mut self, cond: NodeId) -> NodeId {
        self.push(NodeKind::Guard(cond))
    }

    pub fn backtrack(&mut self, value: Option<NodeId>) -> NodeId {
        self.push(NodeKind::Backtrack(value))
    }

    pub fn backtrack_data(&mut self) -> NodeId {
        self.push(NodeKind::BacktrackData)
    }

    pub fn collect(&mut self, body: NodeId, parallel: bool) -> NodeId {
        self.push(NodeKind::Collect { body, parallel })
    }

    pub fn finish(self, root: NodeId) -> Result<Tree> {
        let count = self.nodes.len();
        if root.index() >= count {
            bail!("root {} is out of range ({} nodes)", root, count);
        }
        let mut links: Vec<Option<(NodeId, Signal)>> = vec![None; count];
        for (idx, (kind, _)) in self.nodes.iter().enumerate() {
            let parent = NodeId(idx as u32);
            if let NodeKind::Literal(v @ (Value::Ref(_) | Value::Control(_))) = kind {
                bail!("literal {} holds a non-primitive {}", parent, v.type_name());
            }
            if let NodeKind::Repeat { min, max: Some(max), .. } = kind {
                if max < min {
                    bail!("repeat {}: max {} is below min {}", parent, max, min);
                }
            }
            let arity = kind.arity();
            if arity > MAX_CHILDREN {
                bail!("{} {} has {} children, more than {}", kind.name(), parent, arity, MAX_CHILDREN);
            }
            for (child, signal) in kind.children() {
                let slot = links
                    .get_mut(child.index())
                    .ok_or_else(|| anyhow!("{} refers to missing node {}", parent, child))?;
                if let Some((other, _)) = slot {
                    bail!("{} has two parents: {} and {}", child, other, parent);
                }
                *slot = Some((parent, signal));
            }
        }
        if let Some((parent, _)) = links[root.index()] {
            bail!("root {} has parent {}", root, parent);
        }

        let mut seen = vec![false; count];
        let mut work = vec![root];
        while let Some(id) = work.pop() {
            if std::mem::replace(&mut seen[id.index()], true) {
                bail!("cycle through {}", id);
            }
            work.extend(self.nodes[id.index()].0.children().into_iter().map(|(c, _)| c));
        }
        if let Some(orphan) = seen.iter().position(|s| !s) {
            bail!("node n{} is not reachable from root {}", orphan, root);
        }

        let nodes = self
            .nodes
            .into_iter()
            .zip(links)
            .map(|((kind, span), link)| Node {
                parent: link.map(|(p, _)| p),
                parent_signal: link.map_or(Signal::START, |(_, s)| s),
                kind,
                span,
                text: OnceCell::new(),
            })
            .collect();
        Ok(Tree { nodes, root })
    }
}
