use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// Heap-independent copy of a value.
///
/// Anything that must survive a generation rollback or cross into another worker's heap
/// (solutions gathered by `collect`, backtracking payloads, the final program result) is
/// detached first and re-imported on the other side. Payloads without a portable form
/// (closures, contexts, iterators, quoted nodes) detach as [`Detached::Opaque`].
#[derive(Debug, Clone, PartialEq)]
pub enum Detached {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Array(Vec<Detached>),
    Object(Vec<(Arc<str>, Detached)>),
    Opaque(&'static str),
}

impl Detached {
    pub fn str(s: &str) -> Self {
        Detached::Str(Arc::from(s))
    }

    pub fn ints(items: impl IntoIterator<Item = i64>) -> Self {
        Detached::Array(items.into_iter().map(Detached::Int).collect())
    }

    fn drain_children(&mut self, into: &mut Vec<Detached>) {
        match self {
            Detached::Array(items) => into.append(items),
            Detached::Object(entries) => into.extend(entries.drain(..).map(|(_, v)| v)),
            _ => {}
        }
    }
}

impl Drop for Detached {
    fn drop(&mut self) {
        let mut orphans = Vec::new();
        self.drain_children(&mut orphans);
        while let Some(mut child) = orphans.pop() {
            child.drain_children(&mut orphans);
        }
    }
}

impl Serialize for Detached {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Detached::Null => serializer.serialize_unit(),
            Detached::Bool(b) => serializer.serialize_bool(*b),
            Detached::Int(i) => serializer.serialize_i64(*i),
            Detached::Float(x) => serializer.serialize_f64(*x),
            Detached::Str(s) => serializer.serialize_str(s),
            Detached::Array(items) => serializer.collect_seq(items),
            Detached::Object(entries) => serializer.collect_map(entries.iter().map(|(k, v)| (k.as_ref(), v))),
            Detached::Opaque(kind) => serializer.serialize_str(&format!("<{kind}>")),
        }
    }
}

impl fmt::Display for Detached {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Detached::Null => write!(f, "null"),
            Detached::Bool(b) => write!(f, "{b}"),
            Detached::Int(i) => write!(f, "{i}"),
            Detached::Float(x) => write!(f, "{x}"),
            Detached::Str(s) => write!(f, "{s:?}"),
            Detached::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Detached::Object(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Detached::Opaque(kind) => write!(f, "<{kind}>"),
        }
    }
}
