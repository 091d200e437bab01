//! Reads lowered programs.
//!
//! A program document lists its nodes in a flat array; a node's id is its position and
//! children are referenced by id. JSON and YAML are accepted:
//!
//! ```json
//! { "root": 2, "nodes": [
//!     { "kind": "literal", "value": 1 },
//!     { "kind": "literal", "value": 2 },
//!     { "kind": "binary", "op": "add", "lhs": 0, "rhs": 1, "line": 1, "column": 3 }
//! ] }
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{NodeId, NodeKind, Span, Tag, Tree, TreeBuilder};
use crate::config::RuntimeConfig;
use crate::rt::BranchRuntime;
use crate::val::{BinaryOp, UnaryOp, Value};
use crate::vm::ControlKind;

/// Node documents converted per job when lowering runs on the branch runtime.
const LOWERING_CHUNK: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramDoc {
    pub root: u32,
    pub nodes: Vec<NodeEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    #[serde(flatten)]
    pub node: NodeDoc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarDoc {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDoc {
    pub key: String,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDoc {
    Literal {
        #[serde(default)]
        value: Option<ScalarDoc>,
    },
    Sequence {
        children: Vec<u32>,
    },
    Load {
        name: String,
    },
    Define {
        name: String,
        value: u32,
    },
    Store {
        name: String,
        value: u32,
    },
    Unary {
        op: UnaryOp,
        operand: u32,
    },
    Binary {
        op: BinaryOp,
        lhs: u32,
        rhs: u32,
    },
    If {
        cond: u32,
        then: u32,
        #[serde(default)]
        otherwise: Option<u32>,
    },
    While {
        #[serde(default)]
        tag: Option<String>,
        cond: u32,
        body: u32,
    },
    Loop {
        #[serde(default)]
        tag: Option<String>,
        body: u32,
    },
    ForEach {
        #[serde(default)]
        tag: Option<String>,
        var: String,
        iterable: u32,
        body: u32,
    },
    Block {
        #[serde(default)]
        tag: Option<String>,
        body: u32,
    },
    Array {
        #[serde(default)]
        items: Vec<u32>,
    },
    Object {
        #[serde(default)]
        properties: Vec<PropertyDoc>,
        #[serde(default)]
        immutable: bool,
    },
    Index {
        target: u32,
        index: u32,
    },
    Member {
        target: u32,
        key: String,
    },
    SetMember {
        target: u32,
        key: String,
        value: u32,
    },
    Append {
        target: u32,
        value: u32,
    },
    Lambda {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        params: Vec<String>,
        body: u32,
    },
    Quote {
        body: u32,
    },
    Call {
        callee: u32,
        #[serde(default)]
        args: Vec<u32>,
    },
    Control {
        keyword: ControlKind,
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        value: Option<u32>,
    },
    Alternation {
        branches: Vec<u32>,
    },
    Repeat {
        body: u32,
        #[serde(default)]
        min: u32,
        #[serde(default)]
        max: Option<u32>,
    },
    Guard {
        cond: u32,
    },
    Backtrack {
        #[serde(default)]
        value: Option<u32>,
    },
    BacktrackData,
    Collect {
        body: u32,
        #[serde(default)]
        parallel: bool,
    },
}

impl ProgramDoc {
    pub fn from_json(src: &str) -> Result<Self> {
        serde_json::from_str(src).context("invalid JSON program")
    }

    pub fn from_yaml(src: &str) -> Result<Self> {
        serde_yaml::from_str(src).context("invalid YAML program")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize program")
    }

    /// Converts the document into a linked [`Tree`].
    pub fn lower(self, config: &RuntimeConfig) -> Result<Tree> {
        let count = self.nodes.len();
        let kinds = if config.parallel_lowering && count > LOWERING_CHUNK {
            lower_parallel(self.nodes, config.branch_workers)?
        } else {
            self.nodes.into_iter().map(lower_entry).collect()
        };
        let mut builder = TreeBuilder::new();
        for (kind, span) in kinds {
            builder.push_at(kind, span);
        }
        let tree = builder.finish(NodeId(self.root))?;
        debug!(target: "strand::engine", nodes = count, parallel = config.parallel_lowering, "program lowered");
        Ok(tree)
    }
}

/// Reads and lowers a program file. `.yaml`/`.yml` files are parsed as YAML, anything else
/// as JSON.
pub fn load_program(path: &Path, config: &RuntimeConfig) -> Result<Tree> {
    let src = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let doc = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => ProgramDoc::from_yaml(&src),
        _ => ProgramDoc::from_json(&src),
    }
    .with_context(|| format!("failed to parse {}", path.display()))?;
    doc.lower(config)
}

fn lower_parallel(nodes: Vec<NodeEntry>, workers: usize) -> Result<Vec<(NodeKind, Option<Span>)>> {
    let runtime = BranchRuntime::new(workers)?;
    let mut jobs = Vec::new();
    let mut rest = nodes.into_iter().peekable();
    while rest.peek().is_some() {
        let chunk: Vec<NodeEntry> = rest.by_ref().take(LOWERING_CHUNK).collect();
        jobs.push(move || chunk.into_iter().map(lower_entry).collect::<Vec<_>>());
    }
    Ok(runtime.run_all(jobs)?.into_iter().flatten().collect())
}

fn tag(t: Option<String>) -> Tag {
    t.map(Arc::from)
}

fn lower_entry(entry: NodeEntry) -> (NodeKind, Option<Span>) {
    let span = entry.line.map(|line| Span::new(line, entry.column.unwrap_or(1)));
    let id = NodeId;
    let kind = match entry.node {
        NodeDoc::Literal { value } => NodeKind::Literal(match value {
            None => Value::Null,
            Some(ScalarDoc::Bool(b)) => Value::Bool(b),
            Some(ScalarDoc::Int(i)) => Value::Int(i),
            Some(ScalarDoc::Float(x)) => Value::Float(x),
            Some(ScalarDoc::Str(s)) => Value::str(s),
        }),
        NodeDoc::Sequence { children } => NodeKind::Sequence(children.into_iter().map(id).collect()),
        NodeDoc::Load { name } => NodeKind::Load(Arc::from(name)),
        NodeDoc::Define { name, value } => NodeKind::Define {
            name: Arc::from(name),
            value: id(value),
        },
        NodeDoc::Store { name, value } => NodeKind::Store {
            name: Arc::from(name),
            value: id(value),
        },
        NodeDoc::Unary { op, operand } => NodeKind::Unary {
            op,
            operand: id(operand),
        },
        NodeDoc::Binary { op, lhs, rhs } => NodeKind::Binary {
            op,
            lhs: id(lhs),
            rhs: id(rhs),
        },
        NodeDoc::If { cond, then, otherwise } => NodeKind::If {
            cond: id(cond),
            then: id(then),
            otherwise: otherwise.map(id),
        },
        NodeDoc::While { tag: t, cond, body } => NodeKind::While {
            tag: tag(t),
            cond: id(cond),
            body: id(body),
        },
        NodeDoc::Loop { tag: t, body } => NodeKind::Loop {
            tag: tag(t),
            body: id(body),
        },
        NodeDoc::ForEach {
            tag: t,
            var,
            iterable,
            body,
        } => NodeKind::ForEach {
            tag: tag(t),
            var: Arc::from(var),
            iterable: id(iterable),
            body: id(body),
        },
        NodeDoc::Block { tag: t, body } => NodeKind::Block {
            tag: tag(t),
            body: id(body),
        },
        NodeDoc::Array { items } => NodeKind::Array(items.into_iter().map(id).collect()),
        NodeDoc::Object { properties, immutable } => {
            let (keys, values) = properties
                .into_iter()
                .map(|p| (Arc::<str>::from(p.key), id(p.value)))
                .unzip();
            NodeKind::Object {
                keys,
                values,
                immutable,
            }
        }
        NodeDoc::Index { target, index } => NodeKind::Index {
            target: id(target),
            index: id(index),
        },
        NodeDoc::Member { target, key } => NodeKind::Member {
            target: id(target),
            key: Arc::from(key),
        },
        NodeDoc::SetMember { target, key, value } => NodeKind::SetMember {
            target: id(target),
            key: Arc::from(key),
            value: id(value),
        },
        NodeDoc::Append { target, value } => NodeKind::Append {
            target: id(target),
            value: id(value),
        },
        NodeDoc::Lambda { name, params, body } => NodeKind::Lambda {
            name: tag(name),
            params: params.into_iter().map(Arc::from).collect(),
            body: id(body),
        },
        NodeDoc::Quote { body } => NodeKind::Quote { body: id(body) },
        NodeDoc::Call { callee, args } => NodeKind::Call {
            callee: id(callee),
            args: args.into_iter().map(id).collect(),
        },
        NodeDoc::Control { keyword, tag: t, value } => NodeKind::Control {
            kind: keyword,
            tag: tag(t),
            value: value.map(id),
        },
        NodeDoc::Alternation { branches } => NodeKind::Alternation(branches.into_iter().map(id).collect()),
        NodeDoc::Repeat { body, min, max } => NodeKind::Repeat {
            body: id(body),
            min,
            max,
        },
        NodeDoc::Guard { cond } => NodeKind::Guard(id(cond)),
        NodeDoc::Backtrack { value } => NodeKind::Backtrack(value.map(id)),
        NodeDoc::BacktrackData => NodeKind::BacktrackData,
        NodeDoc::Collect { body, parallel } => NodeKind::Collect {
            body: id(body),
            parallel,
        },
    };
    (kind, span)
}
