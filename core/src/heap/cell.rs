use std::fmt;
use std::sync::Arc;

use crate::val::{RefId, Referenced, Value};

#[derive(Debug, Clone)]
pub enum CellContent {
    Primitive(Value),
    Referenced(Arc<Referenced>),
    /// Tombstone left in the generation that deallocated the value, shadowing any ancestor copy.
    Freed,
}

impl CellContent {
    pub fn referenced(value: Referenced) -> Self {
        CellContent::Referenced(Arc::new(value))
    }

    pub fn is_freed(&self) -> bool {
        matches!(self, CellContent::Freed)
    }

    /// Ids kept alive by this content.
    pub fn children(&self) -> Vec<RefId> {
        match self {
            CellContent::Primitive(v) => v.as_ref_id().into_iter().collect(),
            CellContent::Referenced(r) => r.children(),
            CellContent::Freed => Vec::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CellContent::Primitive(v) => v.type_name(),
            CellContent::Referenced(r) => r.type_name(),
            CellContent::Freed => "freed",
        }
    }
}

/// One heap slot: its content and the number of holders that keep it alive.
#[derive(Debug, Clone)]
pub struct Cell {
    pub content: CellContent,
    pub refs: u32,
}

impl Cell {
    pub fn new(content: CellContent) -> Self {
        Self { content, refs: 1 }
    }

    pub fn as_referenced(&self) -> Option<&Referenced> {
        match &self.content {
            CellContent::Referenced(r) => Some(r),
            _ => None,
        }
    }
}

/// Heap invariant violations. These point at a defect in the engine or in lowering and are
/// never caught by language constructs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    UnreachableAddress(RefId),
    DoubleFree(RefId),
    ImmutableWrite(RefId),
    NotReferenced { id: RefId, found: &'static str },
    UnknownGeneration(u32),
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::UnreachableAddress(id) => {
                write!(f, "address {id} has no live cell in any visible generation")
            }
            HeapError::DoubleFree(id) => write!(f, "reference count of {id} dropped below zero"),
            HeapError::ImmutableWrite(id) => write!(f, "attempted in-place mutation of immutable value {id}"),
            HeapError::NotReferenced { id, found } => {
                write!(f, "expected a composite value at {id}, found {found}")
            }
            HeapError::UnknownGeneration(g) => write!(f, "generation {g} is not live"),
        }
    }
}

impl std::error::Error for HeapError {}
