use std::sync::Arc;

use anyhow::{Result, anyhow, bail};

use super::unexpected;
use crate::tree::{NodeId, Signal};
use crate::val::{self, BinaryOp, RefPayload, Referenced, UnaryOp, Value};
use crate::vm::Engine;
use crate::vm::engine::Step;

impl Engine {
    pub(super) fn load(&mut self, name: &str) -> Result<Step> {
        let v = self.lookup(name)?;
        self.retain(&v)?;
        self.push(v);
        Ok(Step::Finish)
    }

    /// `Define` binds in the current frame, `Store` rebinds where the name already lives.
    /// Either way the value stays on the stack as the node's result.
    pub(super) fn define(&mut self, name: &Arc<str>, value: NodeId, signal: Signal, rebind: bool) -> Result<Step> {
        match signal {
            Signal::START => Ok(Step::Enter(value)),
            s if s == Signal::end_of_child(0) => {
                let frame = if rebind {
                    self.defining_frame(name)?
                } else {
                    self.current_context()?
                };
                let v = self.heap.stack().peek()?.clone();
                self.retain(&v)?;
                self.bind(frame, name, v)?;
                Ok(Step::Finish)
            }
            s => unexpected(if rebind { "store" } else { "define" }, s),
        }
    }

    pub(super) fn unary(&mut self, op: UnaryOp, operand: NodeId, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => Ok(Step::Enter(operand)),
            s if s == Signal::end_of_child(0) => {
                let v = self.pop()?;
                let out = val::unary(op, &v)?;
                self.discard(v)?;
                self.push(out);
                Ok(Step::Finish)
            }
            s => unexpected("unary", s),
        }
    }

    pub(super) fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => Ok(Step::Enter(lhs)),
            s if s == Signal::end_of_child(0) => {
                if !op.is_short_circuit() {
                    return Ok(Step::Enter(rhs));
                }
                let truthy = self.heap.stack().peek()?.is_truthy();
                // `and` keeps a falsy left side, `or` keeps a truthy one.
                if truthy == (op == BinaryOp::Or) {
                    return Ok(Step::Finish);
                }
                let l = self.pop()?;
                self.discard(l)?;
                Ok(Step::Enter(rhs))
            }
            s if s == Signal::end_of_child(1) => {
                if op.is_short_circuit() {
                    return Ok(Step::Finish);
                }
                let r = self.pop()?;
                let l = self.pop()?;
                let out = val::binary(op, &l, &r)?;
                self.discard(r)?;
                self.discard(l)?;
                self.push(out);
                Ok(Step::Finish)
            }
            s => unexpected("binary", s),
        }
    }

    pub(super) fn array(&mut self, items: &[NodeId], signal: Signal) -> Result<Step> {
        if signal == Signal::START {
            return match items.first() {
                Some(first) => Ok(Step::Enter(*first)),
                None => {
                    let arr = self.alloc(Referenced::mutable(RefPayload::Array(Vec::new())));
                    self.push(arr);
                    Ok(Step::Finish)
                }
            };
        }
        let Some(k) = signal.child_index().filter(|k| *k < items.len()) else {
            return unexpected("array", signal);
        };
        if let Some(next) = items.get(k + 1) {
            return Ok(Step::Enter(*next));
        }
        let values = self.pop_n(items.len())?;
        let arr = self.alloc(Referenced::mutable(RefPayload::Array(values)));
        self.push(arr);
        Ok(Step::Finish)
    }

    pub(super) fn object(
        &mut self,
        keys: &[Arc<str>],
        values: &[NodeId],
        immutable: bool,
        signal: Signal,
    ) -> Result<Step> {
        if signal == Signal::START {
            if let Some(first) = values.first() {
                return Ok(Step::Enter(*first));
            }
        } else if signal != Signal::END_PROPERTIES {
            let Some(k) = signal.child_index().filter(|k| k + 1 < values.len()) else {
                return unexpected("object", signal);
            };
            return Ok(Step::Enter(values[k + 1]));
        }

        let popped = self.pop_n(values.len())?;
        let mut entries = Vec::with_capacity(popped.len());
        for (key, v) in keys.iter().zip(popped) {
            if let Some(old) = RefPayload::object_set(&mut entries, Arc::clone(key), v) {
                self.discard(old)?;
            }
        }
        let payload = RefPayload::Object(entries);
        let obj = self.alloc(if immutable {
            Referenced::frozen(payload)
        } else {
            Referenced::mutable(payload)
        });
        self.push(obj);
        Ok(Step::Finish)
    }

    pub(super) fn index(&mut self, target: NodeId, index: NodeId, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => Ok(Step::Enter(target)),
            s if s == Signal::end_of_child(0) => Ok(Step::Enter(index)),
            s if s == Signal::end_of_child(1) => {
                let idx = self.pop()?;
                let t = self.pop()?;
                let out = self.element(&t, &idx)?;
                self.retain(&out)?;
                self.discard(idx)?;
                self.discard(t)?;
                self.push(out);
                Ok(Step::Finish)
            }
            s => unexpected("index", s),
        }
    }

    fn element(&self, target: &Value, idx: &Value) -> Result<Value> {
        match (target, idx) {
            (Value::Str(s), Value::Int(i)) => Ok(position(*i, s.chars().count())
                .and_then(|p| s.chars().nth(p))
                .map(|c| Value::str(c.to_string()))
                .unwrap_or(Value::Null)),
            (Value::Ref(id), _) => {
                let payload = &self.heap.read_referenced(*id)?.payload;
                match (payload, idx) {
                    (RefPayload::Array(items), Value::Int(i)) => Ok(position(*i, items.len())
                        .map(|p| items[p].clone())
                        .unwrap_or(Value::Null)),
                    (RefPayload::Object(_), Value::Str(key)) => {
                        Ok(payload.object_get(key).cloned().unwrap_or(Value::Null))
                    }
                    (payload, idx) => bail!("cannot index {} with {}", payload.type_name(), idx.type_name()),
                }
            }
            (t, i) => bail!("cannot index {} with {}", t.type_name(), i.type_name()),
        }
    }

    pub(super) fn member(&mut self, target: NodeId, key: &str, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => Ok(Step::Enter(target)),
            s if s == Signal::end_of_child(0) => {
                let t = self.pop()?;
                let id = t
                    .as_ref_id()
                    .ok_or_else(|| anyhow!("cannot read member '{}' of {}", key, t.type_name()))?;
                let payload = &self.heap.read_referenced(id)?.payload;
                let out = match payload {
                    RefPayload::Object(_) => payload.object_get(key).cloned().unwrap_or(Value::Null),
                    RefPayload::Array(items) if key == "length" => Value::Int(items.len() as i64),
                    other => bail!("cannot read member '{}' of {}", key, other.type_name()),
                };
                self.retain(&out)?;
                self.discard(t)?;
                self.push(out);
                Ok(Step::Finish)
            }
            s => unexpected("member", s),
        }
    }

    pub(super) fn set_member(&mut self, target: NodeId, key: &Arc<str>, value: NodeId, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => Ok(Step::Enter(target)),
            s if s == Signal::end_of_child(0) => Ok(Step::Enter(value)),
            s if s == Signal::end_of_child(1) => {
                let v = self.pop()?;
                let t = self.pop()?;
                let id = t
                    .as_ref_id()
                    .ok_or_else(|| anyhow!("cannot set member '{}' on {}", key, t.type_name()))?;
                self.retain(&v)?;
                let stored = v.clone();
                let displaced = self.heap.modify(id, |payload| match payload {
                    RefPayload::Object(entries) => Ok(RefPayload::object_set(entries, Arc::clone(key), stored)),
                    other => Err(anyhow!("cannot set member '{}' on {}", key, other.type_name())),
                })??;
                if let Some(old) = displaced {
                    self.discard(old)?;
                }
                self.discard(t)?;
                self.push(v);
                Ok(Step::Finish)
            }
            s => unexpected("set_member", s),
        }
    }

    pub(super) fn append(&mut self, target: NodeId, value: NodeId, signal: Signal) -> Result<Step> {
        match signal {
            Signal::START => Ok(Step::Enter(target)),
            s if s == Signal::end_of_child(0) => Ok(Step::Enter(value)),
            s if s == Signal::end_of_child(1) => {
                let v = self.pop()?;
                let t = self.heap.stack().peek()?.clone();
                let id = t
                    .as_ref_id()
                    .ok_or_else(|| anyhow!("cannot append to {}", t.type_name()))?;
                self.heap.modify(id, |payload| match payload {
                    RefPayload::Array(items) => {
                        items.push(v);
                        Ok(())
                    }
                    other => Err(anyhow!("cannot append to {}", other.type_name())),
                })??;
                Ok(Step::Finish)
            }
            s => unexpected("append", s),
        }
    }
}

/// Resolves a possibly negative index against `len`.
fn position(i: i64, len: usize) -> Option<usize> {
    let p = if i < 0 { len as i64 + i } else { i };
    (0..len as i64).contains(&p).then_some(p as usize)
}
