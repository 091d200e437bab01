//! Executable node tree handed over by lowering.
//!
//! The tree is an arena: nodes refer to each other by [`NodeId`], every node knows its parent and
//! the [`Signal`] it hands its parent when it finishes. Execution never recurses on the host
//! stack; the engine only ever holds one `(node, signal)` pair.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

mod builder;
pub mod loader;
mod signal;

pub use builder::TreeBuilder;
pub use signal::{MAX_CHILDREN, Signal};

use crate::val::{BinaryOp, UnaryOp, Value};
use crate::vm::ControlKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Source location of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

pub type Tag = Option<Arc<str>>;

#[derive(Debug, Clone)]
pub enum NodeKind {
    Literal(Value),
    Sequence(Vec<NodeId>),
    Load(Arc<str>),
    /// Binds a name in the current context frame.
    Define { name: Arc<str>, value: NodeId },
    /// Rebinds a name in the nearest frame that defines it.
    Store { name: Arc<str>, value: NodeId },
    Unary { op: UnaryOp, operand: NodeId },
    Binary { op: BinaryOp, lhs: NodeId, rhs: NodeId },
    If { cond: NodeId, then: NodeId, otherwise: Option<NodeId> },
    While { tag: Tag, cond: NodeId, body: NodeId },
    Loop { tag: Tag, body: NodeId },
    ForEach { tag: Tag, var: Arc<str>, iterable: NodeId, body: NodeId },
    Block { tag: Tag, body: NodeId },
    Array(Vec<NodeId>),
    Object { keys: Vec<Arc<str>>, values: Vec<NodeId>, immutable: bool },
    Index { target: NodeId, index: NodeId },
    Member { target: NodeId, key: Arc<str> },
    SetMember { target: NodeId, key: Arc<str>, value: NodeId },
    Append { target: NodeId, value: NodeId },
    Lambda { name: Tag, params: Vec<Arc<str>>, body: NodeId },
    /// Produces an immutable quoted-node value; calling it runs `body` in a child of the
    /// caller's context.
    Quote { body: NodeId },
    Call { callee: NodeId, args: Vec<NodeId> },
    Control { kind: ControlKind, tag: Tag, value: Option<NodeId> },
    Alternation(Vec<NodeId>),
    Repeat { body: NodeId, min: u32, max: Option<u32> },
    Guard(NodeId),
    Backtrack(Option<NodeId>),
    BacktrackData,
    Collect { body: NodeId, parallel: bool },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Literal(_) => "literal",
            NodeKind::Sequence(_) => "sequence",
            NodeKind::Load(_) => "load",
            NodeKind::Define { .. } => "define",
            NodeKind::Store { .. } => "store",
            NodeKind::Unary { .. } => "unary",
            NodeKind::Binary { .. } => "binary",
            NodeKind::If { .. } => "if",
            NodeKind::While { .. } => "while",
            NodeKind::Loop { .. } => "loop",
            NodeKind::ForEach { .. } => "for_each",
            NodeKind::Block { .. } => "block",
            NodeKind::Array(_) => "array",
            NodeKind::Object { .. } => "object",
            NodeKind::Index { .. } => "index",
            NodeKind::Member { .. } => "member",
            NodeKind::SetMember { .. } => "set_member",
            NodeKind::Append { .. } => "append",
            NodeKind::Lambda { .. } => "lambda",
            NodeKind::Quote { .. } => "quote",
            NodeKind::Call { .. } => "call",
            NodeKind::Control { .. } => "control",
            NodeKind::Alternation(_) => "alternation",
            NodeKind::Repeat { .. } => "repeat",
            NodeKind::Guard(_) => "guard",
            NodeKind::Backtrack(_) => "backtrack",
            NodeKind::BacktrackData => "backtrack_data",
            NodeKind::Collect { .. } => "collect",
        }
    }

    /// Number of children, without building their signals.
    pub fn arity(&self) -> usize {
        match self {
            NodeKind::Sequence(ids) | NodeKind::Array(ids) | NodeKind::Alternation(ids) => ids.len(),
            NodeKind::Object { values, .. } => values.len(),
            NodeKind::Call { args, .. } => args.len() + 1,
            fixed => fixed.children().len(),
        }
    }

    /// Children in evaluation order, each with the signal it reports back with.
    pub fn children(&self) -> Vec<(NodeId, Signal)> {
        fn numbered(ids: &[NodeId]) -> Vec<(NodeId, Signal)> {
            ids.iter().enumerate().map(|(i, id)| (*id, Signal::end_of_child(i))).collect()
        }
        match self {
            NodeKind::Literal(_) | NodeKind::Load(_) | NodeKind::BacktrackData => Vec::new(),
            NodeKind::Sequence(ids) | NodeKind::Array(ids) | NodeKind::Alternation(ids) => numbered(ids),
            NodeKind::Define { value, .. } | NodeKind::Store { value, .. } => numbered(&[*value]),
            NodeKind::Unary { operand, .. } => numbered(&[*operand]),
            NodeKind::Binary { lhs, rhs, .. } => numbered(&[*lhs, *rhs]),
            NodeKind::If { cond, then, otherwise } => {
                let mut out = numbered(&[*cond, *then]);
                out.extend(otherwise.map(|id| (id, Signal::end_of_child(2))));
                out
            }
            NodeKind::While { cond, body, .. } => numbered(&[*cond, *body]),
            NodeKind::ForEach { iterable, body, .. } => numbered(&[*iterable, *body]),
            NodeKind::Loop { body, .. }
            | NodeKind::Block { body, .. }
            | NodeKind::Lambda { body, .. }
            | NodeKind::Quote { body }
            | NodeKind::Repeat { body, .. }
            | NodeKind::Guard(body)
            | NodeKind::Collect { body, .. } => numbered(&[*body]),
            NodeKind::Object { values, .. } => {
                let mut out = numbered(values);
                if let Some(last) = out.last_mut() {
                    last.1 = Signal::END_PROPERTIES;
                }
                out
            }
            NodeKind::Index { target, index } => numbered(&[*target, *index]),
            NodeKind::Member { target, .. } => numbered(&[*target]),
            NodeKind::SetMember { target, value, .. } | NodeKind::Append { target, value } => {
                numbered(&[*target, *value])
            }
            NodeKind::Call { callee, args } => {
                let mut ids = vec![*callee];
                ids.extend(args.iter().copied());
                numbered(&ids)
            }
            NodeKind::Control { value, .. } => value.map(|id| (id, Signal::END_EXPRESSION)).into_iter().collect(),
            NodeKind::Backtrack(value) => value.map(|id| (id, Signal::end_of_child(0))).into_iter().collect(),
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub parent_signal: Signal,
    pub kind: NodeKind,
    pub span: Option<Span>,
    text: OnceCell<String>,
}

#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

const SOURCE_TEXT_DEPTH: usize = 3;

impl Tree {
    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Short s-expression rendering of a node, computed once and cached for diagnostics.
    pub fn source_text(&self, id: NodeId) -> &str {
        self.node(id).text.get_or_init(|| {
            let mut out = String::new();
            self.render(id, SOURCE_TEXT_DEPTH, &mut out);
            out
        })
    }

    fn render(&self, id: NodeId, depth: usize, out: &mut String) {
        use std::fmt::Write as _;

        let node = self.node(id);
        if depth == 0 {
            out.push_str("...");
            return;
        }
        out.push('(');
        out.push_str(node.kind.name());
        let _ = match &node.kind {
            NodeKind::Literal(v) => write!(out, " {v}"),
            NodeKind::Load(name) => write!(out, " {name}"),
            NodeKind::Define { name, .. } | NodeKind::Store { name, .. } => write!(out, " {name}"),
            NodeKind::Unary { op, .. } => write!(out, " {op}"),
            NodeKind::Binary { op, .. } => write!(out, " {op}"),
            NodeKind::Member { key, .. } | NodeKind::SetMember { key, .. } => write!(out, " .{key}"),
            NodeKind::ForEach { var, .. } => write!(out, " {var}"),
            NodeKind::Control { kind, tag, .. } => match tag {
                Some(tag) => write!(out, " {kind}:{tag}"),
                None => write!(out, " {kind}"),
            },
            NodeKind::Repeat { min, max, .. } => match max {
                Some(max) => write!(out, " {{{min},{max}}}"),
                None => write!(out, " {{{min},}}"),
            },
            _ => Ok(()),
        };
        for (child, _) in node.kind.children() {
            out.push(' ');
            self.render(child, depth - 1, out);
        }
        out.push(')');
    }
}
