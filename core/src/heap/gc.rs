//! Spatial garbage collector.
//!
//! Reference counting reclaims the common acyclic case eagerly. This collector is the authority
//! for everything else: it marks every id reachable from the registers of every live generation
//! (plus roots pinned by the caller) and removes unmarked cells from each generation it owns
//! exclusively. Generations shared with a forked heap are skipped, which makes a pass
//! best-effort rather than exhaustive.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use super::{GenerationId, Heap};
use crate::config::GcConfig;
use crate::val::{RefId, Value};

/// Threshold bookkeeping shared by every fork of a heap.
#[derive(Debug, Clone)]
pub struct GcPolicy {
    threshold: usize,
    growth_multiplier: f64,
    min_free_fraction: f64,
    passes: u64,
    freed_total: u64,
}

impl GcPolicy {
    pub fn new(config: &GcConfig) -> Self {
        Self {
            threshold: config.initial_threshold,
            growth_multiplier: config.growth_multiplier,
            min_free_fraction: config.min_free_fraction,
            passes: 0,
            freed_total: 0,
        }
    }

    #[inline]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[inline]
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn freed_total(&self) -> u64 {
        self.freed_total
    }

    pub fn should_collect(&self, live_cells: usize) -> bool {
        live_cells > self.threshold
    }

    /// Records a finished pass. An unproductive pass multiplies the threshold so the next one
    /// waits for a larger heap; returns whether that happened.
    pub fn record_pass(&mut self, live_before: usize, freed: usize) -> bool {
        self.passes += 1;
        self.freed_total += freed as u64;
        let fraction = if live_before == 0 {
            1.0
        } else {
            freed as f64 / live_before as f64
        };
        if fraction >= self.min_free_fraction {
            return false;
        }
        let grown = (self.threshold as f64 * self.growth_multiplier).ceil() as usize;
        let previous = self.threshold;
        self.threshold = grown.max(previous + 1);
        info!(
            target: "strand::gc",
            previous,
            threshold = self.threshold,
            fraction,
            "collection freed too little, threshold raised"
        );
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcReport {
    pub live_before: usize,
    pub freed: usize,
    pub tombstones_cleared: usize,
    pub marked: usize,
    pub generations_skipped: usize,
    pub threshold: usize,
    pub threshold_grew: bool,
}

impl Heap {
    /// Runs a collection if GC is enabled and the live cell count is past the threshold.
    pub fn maybe_collect(&mut self, extra_roots: &[Value]) -> Option<GcReport> {
        if !self.config.gc_enabled {
            return None;
        }
        let live = self.live_cell_count();
        if !self.with_policy(|p| p.should_collect(live)) {
            return None;
        }
        Some(self.collect_garbage(extra_roots))
    }

    /// Unconditional collection pass. A no-op when GC is disabled in the configuration.
    pub fn collect_garbage(&mut self, extra_roots: &[Value]) -> GcReport {
        if !self.config.gc_enabled {
            debug!(target: "strand::gc", "collector disabled, skipping pass");
            return GcReport {
                threshold: self.with_policy(|p| p.threshold()),
                ..GcReport::default()
            };
        }
        let live_before = self.live_cell_count();
        let marked = self.mark(extra_roots);

        let mut order = self.live_generations();
        order.sort_by_key(|g| self.node(*g).map_or(0, |n| n.depth));

        let mut freed = 0;
        let mut skipped = 0;
        for g in &order {
            let Some(node) = self.generations[g.0 as usize].as_mut().and_then(Arc::get_mut) else {
                skipped += 1;
                continue;
            };
            freed += node
                .cells
                .retain(|id, cell| cell.content.is_freed() || marked.contains(&id));
        }

        let tombstones_cleared = self.clear_tombstones(&order, &marked);
        freed += tombstones_cleared;

        if skipped > 0 {
            warn!(target: "strand::gc", skipped, "generations shared with a fork were not swept");
        }
        let (threshold_grew, threshold) = self.with_policy(|p| {
            let grew = p.record_pass(live_before, freed);
            (grew, p.threshold())
        });
        let report = GcReport {
            live_before,
            freed,
            tombstones_cleared,
            marked: marked.len(),
            generations_skipped: skipped,
            threshold,
            threshold_grew,
        };
        debug!(target: "strand::gc", ?report, "collection finished");
        report
    }

    fn mark(&self, extra_roots: &[Value]) -> FxHashSet<u32> {
        let live: Vec<GenerationId> = self.live_generations();
        let mut work: Vec<RefId> = extra_roots.iter().filter_map(Value::as_ref_id).collect();
        for g in &live {
            if let Some(node) = self.node(*g) {
                work.extend(node.registers.roots());
            }
        }
        let mut marked = FxHashSet::default();
        while let Some(id) = work.pop() {
            if !marked.insert(id.0) {
                continue;
            }
            // Union over every generation: an id reachable in any view keeps all its children.
            for g in &live {
                if let Some(cell) = self.node(*g).and_then(|n| n.cells.get(id.0)) {
                    work.extend(cell.content.children());
                }
            }
        }
        marked
    }

    /// Removes tombstones for unmarked ids once no ancestor still holds a cell they would hide.
    fn clear_tombstones(&mut self, order: &[GenerationId], marked: &FxHashSet<u32>) -> usize {
        let mut cleared = 0;
        for g in order {
            let Some(node) = self.node(*g) else {
                continue;
            };
            let parent = node.parent;
            let removable: Vec<u32> = node
                .cells
                .iter()
                .filter(|(id, cell)| cell.content.is_freed() && !marked.contains(id))
                .map(|(id, _)| id)
                .filter(|id| self.lookup_from(parent, RefId(*id)).is_none())
                .collect();
            if removable.is_empty() {
                continue;
            }
            let Some(node) = self.generations[g.0 as usize].as_mut().and_then(Arc::get_mut) else {
                continue;
            };
            for id in removable {
                node.cells.remove(id);
                cleared += 1;
            }
        }
        cleared
    }
}
