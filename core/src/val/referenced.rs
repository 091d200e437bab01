use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::{IteratorCursor, RefId, Value};
use crate::tree::NodeId;

/// Composite value stored in a heap cell.
///
/// Cells hold these behind an `Arc`. Crossing a copy-on-write boundary clones the `Arc`;
/// the payload itself is only deep-cloned when a mutable value is actually mutated while an
/// ancestor generation still shares it. Immutable values are never mutated in place.
#[derive(Debug, Clone)]
pub struct Referenced {
    pub immutable: bool,
    pub payload: RefPayload,
}

#[derive(Debug, Clone)]
pub enum RefPayload {
    /// Ordered key/value pairs.
    Object(Vec<(Arc<str>, Value)>),
    Array(Vec<Value>),
    Iterator(IteratorCursor),
    Context(ContextFrame),
    Closure(ClosureValue),
    /// A quoted executable node.
    Node(NodeId),
}

/// One variable frame. Lookups that miss continue in `parent`.
#[derive(Debug, Clone, Default)]
pub struct ContextFrame {
    pub vars: FxHashMap<Arc<str>, Value>,
    pub parent: Option<RefId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureValue {
    /// The `Lambda` node that created this closure.
    pub lambda: NodeId,
    pub context: Option<RefId>,
}

impl Referenced {
    pub fn mutable(payload: RefPayload) -> Self {
        Self {
            immutable: false,
            payload,
        }
    }

    pub fn frozen(payload: RefPayload) -> Self {
        Self {
            immutable: true,
            payload,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.payload.type_name()
    }

    /// Every heap id this value keeps alive. Used by deallocation and by GC marking.
    pub fn children(&self) -> Vec<RefId> {
        let mut out = Vec::new();
        self.payload.collect_children(&mut out);
        out
    }
}

impl RefPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            RefPayload::Object(_) => "object",
            RefPayload::Array(_) => "array",
            RefPayload::Iterator(_) => "iterator",
            RefPayload::Context(_) => "context",
            RefPayload::Closure(_) => "closure",
            RefPayload::Node(_) => "node",
        }
    }

    fn collect_children(&self, out: &mut Vec<RefId>) {
        match self {
            RefPayload::Object(entries) => {
                out.extend(entries.iter().filter_map(|(_, v)| v.as_ref_id()));
            }
            RefPayload::Array(items) => out.extend(items.iter().filter_map(Value::as_ref_id)),
            RefPayload::Iterator(cursor) => {
                out.extend(cursor.items().iter().filter_map(Value::as_ref_id));
            }
            RefPayload::Context(frame) => {
                out.extend(frame.vars.values().filter_map(Value::as_ref_id));
                out.extend(frame.parent);
            }
            RefPayload::Closure(closure) => out.extend(closure.context),
            RefPayload::Node(_) => {}
        }
    }

    pub fn object_get(&self, key: &str) -> Option<&Value> {
        match self {
            RefPayload::Object(entries) => entries.iter().find(|(k, _)| k.as_ref() == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Inserts or replaces `key`, returning the displaced value.
    pub fn object_set(entries: &mut Vec<(Arc<str>, Value)>, key: Arc<str>, value: Value) -> Option<Value> {
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                entries.push((key, value));
                None
            }
        }
    }
}

impl ContextFrame {
    pub fn child_of(parent: Option<RefId>) -> Self {
        Self {
            vars: FxHashMap::default(),
            parent,
        }
    }
}
