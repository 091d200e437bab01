use std::sync::Arc;

use rustc_hash::FxHashSet;

use super::{CellContent, Heap, HeapError};
use crate::val::{Detached, RefPayload, Referenced, Value};

/// A composite whose children are still being detached. Children are taken in order, so the
/// next child to visit is always `out.len()`.
enum Detaching<'a> {
    /// A primitive cell forwarding to its inline value.
    Forward { id: u32, inner: &'a Value, out: Option<Detached> },
    Array { id: u32, items: &'a [Value], out: Vec<Detached> },
    Object { id: u32, entries: &'a [(Arc<str>, Value)], out: Vec<(Arc<str>, Detached)> },
}

impl<'a> Detaching<'a> {
    fn id(&self) -> u32 {
        match self {
            Detaching::Forward { id, .. } | Detaching::Array { id, .. } | Detaching::Object { id, .. } => *id,
        }
    }

    fn next_child(&self) -> Option<&'a Value> {
        match self {
            Detaching::Forward { inner, out, .. } => out.is_none().then_some(*inner),
            Detaching::Array { items, out, .. } => (*items).get(out.len()),
            Detaching::Object { entries, out, .. } => (*entries).get(out.len()).map(|(_, v)| v),
        }
    }

    fn accept(&mut self, child: Detached) {
        match self {
            Detaching::Forward { out, .. } => *out = Some(child),
            Detaching::Array { out, .. } => out.push(child),
            Detaching::Object { entries, out, .. } => {
                if let Some((key, _)) = entries.get(out.len()) {
                    out.push((key.clone(), child));
                }
            }
        }
    }

    fn finish(self) -> Detached {
        match self {
            Detaching::Forward { out, .. } => out.unwrap_or(Detached::Null),
            Detaching::Array { out, .. } => Detached::Array(out),
            Detaching::Object { out, .. } => Detached::Object(out),
        }
    }
}

/// A detached composite whose children are being materialized.
enum Attaching<'a> {
    Array { items: &'a [Detached], out: Vec<Value> },
    Object { entries: &'a [(Arc<str>, Detached)], out: Vec<(Arc<str>, Value)> },
}

impl<'a> Attaching<'a> {
    fn next_child(&self) -> Option<&'a Detached> {
        match self {
            Attaching::Array { items, out } => (*items).get(out.len()),
            Attaching::Object { entries, out } => (*entries).get(out.len()).map(|(_, d)| d),
        }
    }

    fn accept(&mut self, child: Value) {
        match self {
            Attaching::Array { out, .. } => out.push(child),
            Attaching::Object { entries, out } => {
                if let Some((key, _)) = entries.get(out.len()) {
                    out.push((key.clone(), child));
                }
            }
        }
    }

    fn payload(self) -> RefPayload {
        match self {
            Attaching::Array { out, .. } => RefPayload::Array(out),
            Attaching::Object { out, .. } => RefPayload::Object(out),
        }
    }
}

impl Heap {
    /// Copies `value` out of the heap into a [`Detached`] tree. Cycles detach as `Opaque`.
    ///
    /// Nesting depth is bounded by memory, not by the host stack.
    pub fn detach(&self, value: &Value) -> Result<Detached, HeapError> {
        let mut visiting = FxHashSet::default();
        let mut pending: Vec<Detaching<'_>> = Vec::new();
        let mut ready = self.open_detached(value, &mut visiting, &mut pending)?;
        loop {
            if let Some(done) = ready.take() {
                match pending.last_mut() {
                    Some(top) => top.accept(done),
                    None => return Ok(done),
                }
            }
            let Some(top) = pending.last() else {
                return Ok(Detached::Null);
            };
            ready = match top.next_child() {
                Some(child) => self.open_detached(child, &mut visiting, &mut pending)?,
                None => pending.pop().map(|frame| {
                    visiting.remove(&frame.id());
                    frame.finish()
                }),
            };
        }
    }

    /// Returns the detached form of a leaf, or pushes a frame for a composite and returns `None`.
    fn open_detached<'a>(
        &'a self,
        value: &'a Value,
        visiting: &mut FxHashSet<u32>,
        pending: &mut Vec<Detaching<'a>>,
    ) -> Result<Option<Detached>, HeapError> {
        let id = match value {
            Value::Null => return Ok(Some(Detached::Null)),
            Value::Bool(b) => return Ok(Some(Detached::Bool(*b))),
            Value::Int(i) => return Ok(Some(Detached::Int(*i))),
            Value::Float(x) => return Ok(Some(Detached::Float(*x))),
            Value::Str(s) => return Ok(Some(Detached::Str(s.clone()))),
            Value::Control(_) => return Ok(Some(Detached::Opaque("control"))),
            Value::Ref(id) => *id,
        };
        if visiting.contains(&id.0) {
            return Ok(Some(Detached::Opaque("cycle")));
        }
        let frame = match &self.read(id)?.content {
            CellContent::Primitive(inner) => Detaching::Forward {
                id: id.0,
                inner,
                out: None,
            },
            CellContent::Referenced(r) => match &r.payload {
                RefPayload::Array(items) => Detaching::Array {
                    id: id.0,
                    items,
                    out: Vec::with_capacity(items.len()),
                },
                RefPayload::Object(entries) => Detaching::Object {
                    id: id.0,
                    entries,
                    out: Vec::with_capacity(entries.len()),
                },
                other => return Ok(Some(Detached::Opaque(other.type_name()))),
            },
            CellContent::Freed => return Err(HeapError::UnreachableAddress(id)),
        };
        visiting.insert(id.0);
        pending.push(frame);
        Ok(None)
    }

    /// Materializes a detached value in the current generation. Composites come back mutable
    /// and owned by the returned value. Children are allocated before their parent.
    pub fn attach(&mut self, detached: &Detached) -> Value {
        let mut pending: Vec<Attaching<'_>> = Vec::new();
        let mut ready = open_attached(detached, &mut pending);
        loop {
            if let Some(done) = ready.take() {
                match pending.last_mut() {
                    Some(top) => top.accept(done),
                    None => return done,
                }
            }
            let Some(top) = pending.last() else {
                return Value::Null;
            };
            ready = match top.next_child() {
                Some(child) => open_attached(child, &mut pending),
                None => pending
                    .pop()
                    .map(|frame| Value::Ref(self.allocate_referenced(Referenced::mutable(frame.payload())))),
            };
        }
    }
}

fn open_attached<'a>(detached: &'a Detached, pending: &mut Vec<Attaching<'a>>) -> Option<Value> {
    match detached {
        Detached::Null | Detached::Opaque(_) => Some(Value::Null),
        Detached::Bool(b) => Some(Value::Bool(*b)),
        Detached::Int(i) => Some(Value::Int(*i)),
        Detached::Float(x) => Some(Value::Float(*x)),
        Detached::Str(s) => Some(Value::Str(s.clone())),
        Detached::Array(items) => {
            pending.push(Attaching::Array {
                items,
                out: Vec::with_capacity(items.len()),
            });
            None
        }
        Detached::Object(entries) => {
            pending.push(Attaching::Object {
                entries,
                out: Vec::with_capacity(entries.len()),
            });
            None
        }
    }
}
