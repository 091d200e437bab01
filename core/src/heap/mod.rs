//! Versioned copy-on-write heap.
//!
//! The heap is an arena of generations ("big nodes"). Exactly one generation is current and
//! receives every write; its ancestors are frozen and only read. Taking a checkpoint is
//! [`Heap::new_generation`], which freezes the current generation and stacks an empty overlay on
//! top of it. Rolling back is [`Heap::restore_generation`], which discards the overlay chain and
//! starts a fresh overlay over the checkpoint.
//!
//! Generation lifetimes are counted with pins: every child pins its parent, the current
//! generation pins itself, and callers holding a checkpoint pin it until they
//! [`Heap::release`] it. A generation whose pin count reaches zero is dropped immediately,
//! together with every cell it owned.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

mod cell;
mod gc;
mod generation;
mod page_table;
mod transfer;

pub use cell::{Cell, CellContent, HeapError};
pub use gc::{GcPolicy, GcReport};
pub use generation::{BigNode, CallFrame, GenerationId, Mark, OperandStack, Registers};
pub use page_table::PageTable;

use crate::config::RuntimeConfig;
use crate::val::{RefId, RefPayload, Referenced};


/// Snapshot of heap counters, for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub generations: usize,
    pub chain_depth: u32,
    pub live_cells: usize,
    pub allocations: u64,
    pub deallocations: u64,
    pub cow_copies: u64,
    pub payload_clones: u64,
    pub gc_passes: u64,
    pub gc_threshold: usize,
}

#[derive(Debug, Clone, Default)]
struct Counters {
    allocations: u64,
    deallocations: u64,
    cow_copies: u64,
    payload_clones: u64,
}

#[derive(Debug)]
pub struct Heap {
    generations: Vec<Option<Arc<BigNode>>>,
    pins: Vec<u32>,
    free_slots: Vec<u32>,
    current: GenerationId,
    next_id: Arc<AtomicU32>,
    gc: Arc<Mutex<GcPolicy>>,
    config: Arc<RuntimeConfig>,
    counters: Counters,
}

impl Heap {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        let root = BigNode::root(config.page_bits);
        Self {
            generations: vec![Some(Arc::new(root))],
            pins: vec![1],
            free_slots: Vec::new(),
            current: GenerationId(0),
            next_id: Arc::new(AtomicU32::new(0)),
            gc: Arc::new(Mutex::new(GcPolicy::new(&config.gc))),
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &Arc<RuntimeConfig> {
        &self.config
    }

    #[inline]
    pub fn current_generation(&self) -> GenerationId {
        self.current
    }

    pub fn generation(&self, g: GenerationId) -> Result<&BigNode, HeapError> {
        self.node(g).ok_or(HeapError::UnknownGeneration(g.0))
    }

    pub fn is_live(&self, g: GenerationId) -> bool {
        self.node(g).is_some()
    }

    #[inline]
    fn node(&self, g: GenerationId) -> Option<&BigNode> {
        self.generations.get(g.0 as usize)?.as_deref()
    }

    fn current_node(&self) -> &BigNode {
        self.node(self.current)
            .expect("current generation must stay live while it is current")
    }

    fn current_mut(&mut self) -> &mut BigNode {
        let slot = self.generations[self.current.0 as usize]
            .as_mut()
            .expect("current generation must stay live while it is current");
        Arc::make_mut(slot)
    }

    pub fn registers(&self) -> &Registers {
        &self.current_node().registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.current_mut().registers
    }

    pub fn stack(&self) -> &OperandStack {
        &self.registers().stack
    }

    pub fn stack_mut(&mut self) -> &mut OperandStack {
        &mut self.registers_mut().stack
    }

    /// Generations from `start` to the root, nearest first.
    fn chain(&self, start: Option<GenerationId>) -> impl Iterator<Item = (GenerationId, &BigNode)> + '_ {
        let mut cursor = start;
        std::iter::from_fn(move || {
            let g = cursor?;
            let node = self.node(g)?;
            cursor = node.parent;
            Some((g, node))
        })
    }

    /// First cell for `id` walking from `start` towards the root, tombstones included.
    fn lookup_from(&self, start: Option<GenerationId>, id: RefId) -> Option<(GenerationId, &Cell)> {
        self.chain(start)
            .find_map(|(g, node)| node.cells.get(id.0).map(|cell| (g, cell)))
    }

    /// Reads the cell visible from the current generation.
    pub fn read(&self, id: RefId) -> Result<&Cell, HeapError> {
        match self.lookup_from(Some(self.current), id) {
            Some((_, cell)) if !cell.content.is_freed() => Ok(cell),
            _ => Err(HeapError::UnreachableAddress(id)),
        }
    }

    pub fn read_referenced(&self, id: RefId) -> Result<&Referenced, HeapError> {
        let cell = self.read(id)?;
        cell.as_referenced().ok_or(HeapError::NotReferenced {
            id,
            found: cell.content.type_name(),
        })
    }

    pub fn ref_count(&self, id: RefId) -> Result<u32, HeapError> {
        Ok(self.read(id)?.refs)
    }

    /// True when `id` has a cell in the current generation itself.
    pub fn is_local(&self, id: RefId) -> bool {
        self.current_node().cells.contains(id.0)
    }

    /// Brings the visible cell for `id` into the current generation and returns it mutably.
    fn local_cell_mut(&mut self, id: RefId) -> Result<&mut Cell, HeapError> {
        if !self.is_local(id) {
            let inherited = self.read(id)?.clone();
            self.counters.cow_copies += 1;
            trace!(target: "strand::heap", %id, generation = %self.current, "copy-on-write");
            self.current_mut().cells.insert(id.0, inherited);
        }
        let cell = self
            .current_mut()
            .cells
            .get_mut(id.0)
            .ok_or(HeapError::UnreachableAddress(id))?;
        if cell.content.is_freed() {
            return Err(HeapError::UnreachableAddress(id));
        }
        Ok(cell)
    }

    /// Stores `content` in a fresh cell of the current generation with a reference count of 1.
    /// Ids held by `content` are owned by the new cell from now on.
    pub fn allocate(&mut self, content: CellContent) -> RefId {
        let id = RefId(self.next_id.fetch_add(1, Ordering::Relaxed));
        trace!(target: "strand::heap", %id, kind = content.type_name(), "allocate");
        let node = self.current_mut();
        node.cells.insert(id.0, Cell::new(content));
        node.allocations += 1;
        self.counters.allocations += 1;
        id
    }

    pub fn allocate_referenced(&mut self, value: Referenced) -> RefId {
        self.allocate(CellContent::referenced(value))
    }

    /// Replaces the content at `id`, keeping its reference count.
    ///
    /// A cell local to the current generation is updated in place unless `force_copy` is set;
    /// otherwise a new cell is written into the current generation and the ancestor's cell is
    /// left untouched. Ids held by the displaced content are released.
    pub fn write(&mut self, id: RefId, content: CellContent, force_copy: bool) -> Result<(), HeapError> {
        let visible = self.read(id)?;
        let displaced = if self.is_local(id) && !force_copy {
            let cell = self.local_cell_mut(id)?;
            std::mem::replace(&mut cell.content, content)
        } else {
            let fresh = Cell {
                content,
                refs: visible.refs,
            };
            let displaced = visible.content.clone();
            self.counters.cow_copies += 1;
            self.current_mut().cells.insert(id.0, fresh);
            displaced
        };
        for child in displaced.children() {
            self.decrease_ref_count(child)?;
        }
        Ok(())
    }

    /// Mutates a composite value in place, copying it into the current generation first when
    /// it is inherited. Immutable values are rejected.
    pub fn modify<R>(&mut self, id: RefId, f: impl FnOnce(&mut RefPayload) -> R) -> Result<R, HeapError> {
        let cell = self.local_cell_mut(id)?;
        let found = cell.content.type_name();
        let CellContent::Referenced(shared) = &mut cell.content else {
            return Err(HeapError::NotReferenced { id, found });
        };
        if shared.immutable {
            return Err(HeapError::ImmutableWrite(id));
        }
        let cloned = Arc::strong_count(shared) > 1;
        let out = f(&mut Arc::make_mut(shared).payload);
        if cloned {
            self.counters.payload_clones += 1;
        }
        Ok(out)
    }

    pub fn increase_ref_count(&mut self, id: RefId) -> Result<u32, HeapError> {
        let cell = self.local_cell_mut(id)?;
        cell.refs += 1;
        Ok(cell.refs)
    }

    /// Drops one holder of `id`. When the count reaches zero the value is deallocated in the
    /// current generation and every id it held is released in turn. Returns whether `id`
    /// itself was deallocated.
    pub fn decrease_ref_count(&mut self, id: RefId) -> Result<bool, HeapError> {
        let mut pending = vec![id];
        let mut freed_root = false;
        while let Some(next) = pending.pop() {
            let cell = match self.local_cell_mut(next) {
                Ok(cell) => cell,
                Err(HeapError::UnreachableAddress(_)) => return Err(HeapError::DoubleFree(next)),
                Err(e) => return Err(e),
            };
            if cell.refs == 0 {
                return Err(HeapError::DoubleFree(next));
            }
            cell.refs -= 1;
            if cell.refs > 0 {
                continue;
            }
            let content = std::mem::replace(&mut cell.content, CellContent::Freed);
            self.counters.deallocations += 1;
            trace!(target: "strand::heap", id = %next, kind = content.type_name(), "deallocate");
            if next == id {
                freed_root = true;
            }
            pending.extend(content.children());
        }
        Ok(freed_root)
    }

    /// Freezes the current generation and makes an empty overlay on top of it current.
    ///
    /// Returns the frozen generation, pinned on behalf of the caller until [`Heap::release`].
    pub fn new_generation(&mut self) -> GenerationId {
        let frozen = self.current;
        self.current_mut().frozen = true;
        let overlay = BigNode::overlay(frozen, self.current_node(), self.config.page_bits);
        let child = self.insert_generation(overlay);
        // The frozen node loses its "current" pin and gains one for the child and one for the caller.
        self.pins[frozen.0 as usize] += 1;
        self.current = child;
        debug!(target: "strand::heap", %frozen, current = %child, "new generation");
        frozen
    }

    /// Rolls back to `target`: a fresh overlay over it becomes current and the generations
    /// that were only reachable through the old current generation are dropped.
    pub fn restore_generation(&mut self, target: GenerationId) -> Result<(), HeapError> {
        let target_node = self.generation(target)?;
        if target == self.current {
            return Ok(());
        }
        let overlay = BigNode::overlay(target, target_node, self.config.page_bits);
        let child = self.insert_generation(overlay);
        self.pins[target.0 as usize] += 1;
        let previous = std::mem::replace(&mut self.current, child);
        self.unpin(previous);
        debug!(target: "strand::heap", %target, current = %child, discarded_from = %previous, "restore generation");
        Ok(())
    }

    /// Drops the checkpoint pin taken by [`Heap::new_generation`].
    pub fn release(&mut self, g: GenerationId) {
        if self.is_live(g) {
            self.unpin(g);
        }
    }

    fn insert_generation(&mut self, node: BigNode) -> GenerationId {
        let node = Some(Arc::new(node));
        match self.free_slots.pop() {
            Some(slot) => {
                self.generations[slot as usize] = node;
                self.pins[slot as usize] = 1;
                GenerationId(slot)
            }
            None => {
                self.generations.push(node);
                self.pins.push(1);
                GenerationId((self.generations.len() - 1) as u32)
            }
        }
    }

    fn unpin(&mut self, g: GenerationId) {
        let mut cursor = Some(g);
        while let Some(g) = cursor {
            let pins = &mut self.pins[g.0 as usize];
            *pins = pins.saturating_sub(1);
            if *pins > 0 {
                return;
            }
            let dropped = self.generations[g.0 as usize].take();
            self.free_slots.push(g.0);
            trace!(target: "strand::heap", generation = %g, "generation dropped");
            cursor = dropped.and_then(|node| node.parent);
        }
    }

    /// Seals the current generation once it owns more cells than the configured limit, so a
    /// long-running branch does not keep growing one table.
    pub fn rotate_if_oversized(&mut self) -> bool {
        if self.current_node().cells.len() <= self.config.generation_cell_limit {
            return false;
        }
        let sealed = self.new_generation();
        self.release(sealed);
        true
    }

    /// Splits off an independent heap for a parallel branch.
    ///
    /// Both heaps continue from the same frozen generation; the shared ancestor chain is held by
    /// `Arc` and never written again, and only the id counter and GC policy are shared.
    pub fn fork(&mut self) -> Heap {
        let snapshot = self.new_generation();
        let len = self.generations.len();
        let mut generations: Vec<Option<Arc<BigNode>>> = vec![None; len];
        let mut pins = vec![0u32; len];
        let mut cursor = Some(snapshot);
        while let Some(g) = cursor {
            let slot = self.generations[g.0 as usize].clone();
            cursor = slot.as_ref().and_then(|node| node.parent);
            generations[g.0 as usize] = slot;
            pins[g.0 as usize] = 1;
        }
        let free_slots = (0..len as u32)
            .rev()
            .filter(|i| generations[*i as usize].is_none())
            .collect();
        let mut fork = Heap {
            generations,
            pins,
            free_slots,
            current: snapshot,
            next_id: Arc::clone(&self.next_id),
            gc: Arc::clone(&self.gc),
            config: Arc::clone(&self.config),
            counters: Counters::default(),
        };
        let overlay = BigNode::overlay(snapshot, fork.current_node(), fork.config.page_bits);
        fork.current = fork.insert_generation(overlay);
        self.release(snapshot);
        debug!(target: "strand::heap", %snapshot, "heap forked");
        fork
    }

    pub fn live_generations(&self) -> Vec<GenerationId> {
        self.generations
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| GenerationId(i as u32))
            .collect()
    }

    pub fn live_cell_count(&self) -> usize {
        self.generations.iter().flatten().map(|node| node.cells.len()).sum()
    }

    pub fn stats(&self) -> HeapStats {
        let (gc_passes, gc_threshold) = self.with_policy(|p| (p.passes(), p.threshold()));
        HeapStats {
            generations: self.generations.iter().flatten().count(),
            chain_depth: self.current_node().depth,
            live_cells: self.live_cell_count(),
            allocations: self.counters.allocations,
            deallocations: self.counters.deallocations,
            cow_copies: self.counters.cow_copies,
            payload_clones: self.counters.payload_clones,
            gc_passes,
            gc_threshold,
        }
    }

    fn with_policy<R>(&self, f: impl FnOnce(&mut GcPolicy) -> R) -> R {
        let mut guard = self.gc.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}
