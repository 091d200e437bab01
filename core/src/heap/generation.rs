use anyhow::{Result, anyhow};

use super::cell::Cell;
use super::page_table::PageTable;
use crate::tree::NodeId;
use crate::val::{RefId, Value};

/// Index of a generation in the heap's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationId(pub u32);

impl std::fmt::Display for GenerationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Interpreter scratch values, one stack per generation.
#[derive(Debug, Clone, Default)]
pub struct OperandStack {
    values: Vec<Value>,
}

impl OperandStack {
    #[inline]
    pub fn push(&mut self, v: Value) {
        self.values.push(v);
    }

    #[inline]
    pub fn pop(&mut self) -> Result<Value> {
        self.values.pop().ok_or_else(|| anyhow!("operand stack underflow"))
    }

    #[inline]
    pub fn peek(&self) -> Result<&Value> {
        self.values.last().ok_or_else(|| anyhow!("operand stack is empty"))
    }

    /// Swaps the top value for `v`, returning the old top.
    pub fn replace_top(&mut self, v: Value) -> Result<Value> {
        let top = self
            .values
            .last_mut()
            .ok_or_else(|| anyhow!("operand stack is empty"))?;
        Ok(std::mem::replace(top, v))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Removes and returns every value above `depth`, bottom first.
    pub fn split_off(&mut self, depth: usize) -> Result<Vec<Value>> {
        if depth > self.values.len() {
            return Err(anyhow!(
                "operand stack underflow: wanted depth {}, have {}",
                depth,
                self.values.len()
            ));
        }
        Ok(self.values.split_off(depth))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}

/// Return address pushed by a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub call_node: NodeId,
    pub caller_context: Option<RefId>,
    /// Stack depth when the callee body was entered.
    pub depth: usize,
}

/// Stack depth recorded by a construct that intercepts control signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    pub node: NodeId,
    pub depth: usize,
    /// Call frames active when the mark was taken; a recursive activation of the same node
    /// must not claim its caller's mark.
    pub frames: usize,
}

/// Interpreter state that must roll back together with the heap.
#[derive(Debug, Clone, Default)]
pub struct Registers {
    pub stack: OperandStack,
    pub context: Option<RefId>,
    pub frames: Vec<CallFrame>,
    pub marks: Vec<Mark>,
}

impl Registers {
    /// Ids held directly by the registers. These are GC roots.
    pub fn roots(&self) -> impl Iterator<Item = RefId> + '_ {
        let stack = self.stack.iter().flat_map(value_roots);
        let frames = self.frames.iter().filter_map(|f| f.caller_context);
        stack.chain(self.context).chain(frames)
    }
}

fn value_roots(v: &Value) -> Vec<RefId> {
    match v {
        Value::Ref(id) => vec![*id],
        Value::Control(c) => c.payload.as_ref_id().into_iter().collect(),
        _ => Vec::new(),
    }
}

/// One copy-on-write generation ("big node") of the heap.
///
/// Reads that miss the local cell table continue in `parent`. Once a child exists the node is
/// frozen: nothing writes to its cells or registers again, which is what lets forked heaps
/// share it across threads without locking.
#[derive(Debug, Clone)]
pub struct BigNode {
    pub parent: Option<GenerationId>,
    pub cells: PageTable<Cell>,
    pub registers: Registers,
    pub allocations: u32,
    pub frozen: bool,
    pub depth: u32,
}

impl BigNode {
    pub fn root(page_bits: u32) -> Self {
        Self {
            parent: None,
            cells: PageTable::new(page_bits),
            registers: Registers::default(),
            allocations: 0,
            frozen: false,
            depth: 0,
        }
    }

    /// An empty overlay over `parent` that starts from a copy of its registers.
    pub fn overlay(parent_id: GenerationId, parent: &BigNode, page_bits: u32) -> Self {
        Self {
            parent: Some(parent_id),
            cells: PageTable::new(page_bits),
            registers: parent.registers.clone(),
            allocations: 0,
            frozen: false,
            depth: parent.depth + 1,
        }
    }
}
