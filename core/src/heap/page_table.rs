//! Sparse two-level map from 32-bit ids to slots.
//!
//! An id is split into a directory index (high bits) and a slot index (low `page_bits` bits).
//! Pages are allocated on first insert and released when they empty, so a generation that
//! touches a handful of scattered ids costs a handful of pages rather than one giant array.

#[derive(Debug, Clone)]
struct Page<T> {
    slots: Box<[Option<T>]>,
    occupied: usize,
}

impl<T> Page<T> {
    fn new(size: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(size).collect(),
            occupied: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageTable<T> {
    directory: Vec<Option<Box<Page<T>>>>,
    page_bits: u32,
    len: usize,
}

impl<T> PageTable<T> {
    pub fn new(page_bits: u32) -> Self {
        debug_assert!((1..32).contains(&page_bits), "page_bits out of range: {page_bits}");
        Self {
            directory: Vec::new(),
            page_bits,
            len: 0,
        }
    }

    #[inline]
    fn split(&self, id: u32) -> (usize, usize) {
        let slot_mask = (1u32 << self.page_bits) - 1;
        ((id >> self.page_bits) as usize, (id & slot_mask) as usize)
    }

    #[inline]
    fn page_size(&self) -> usize {
        1usize << self.page_bits
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of pages currently materialized.
    pub fn page_count(&self) -> usize {
        self.directory.iter().filter(|p| p.is_some()).count()
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        let (dir, slot) = self.split(id);
        self.directory.get(dir)?.as_ref()?.slots[slot].as_ref()
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        let (dir, slot) = self.split(id);
        self.directory.get_mut(dir)?.as_mut()?.slots[slot].as_mut()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    /// Stores `value` at `id`, returning the previous occupant.
    pub fn insert(&mut self, id: u32, value: T) -> Option<T> {
        let (dir, slot) = self.split(id);
        if dir >= self.directory.len() {
            self.directory.resize_with(dir + 1, || None);
        }
        let size = self.page_size();
        let page = self.directory[dir].get_or_insert_with(|| Box::new(Page::new(size)));
        let previous = page.slots[slot].replace(value);
        if previous.is_none() {
            page.occupied += 1;
            self.len += 1;
        }
        previous
    }

    pub fn remove(&mut self, id: u32) -> Option<T> {
        let (dir, slot) = self.split(id);
        let entry = self.directory.get_mut(dir)?;
        let page = entry.as_mut()?;
        let removed = page.slots[slot].take()?;
        page.occupied -= 1;
        self.len -= 1;
        if page.occupied == 0 {
            *entry = None;
        }
        Some(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        let page_bits = self.page_bits;
        self.directory.iter().enumerate().flat_map(move |(dir, page)| {
            page.iter().flat_map(move |page| {
                page.slots.iter().enumerate().filter_map(move |(slot, value)| {
                    value
                        .as_ref()
                        .map(|v| (((dir as u32) << page_bits) | slot as u32, v))
                })
            })
        })
    }

    /// Keeps only the entries for which `keep` returns true. Returns how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(u32, &T) -> bool) -> usize {
        let page_bits = self.page_bits;
        let mut dropped = 0;
        for (dir, entry) in self.directory.iter_mut().enumerate() {
            let Some(page) = entry.as_mut() else {
                continue;
            };
            let mut dropped_here = 0;
            for (slot, value) in page.slots.iter_mut().enumerate() {
                let id = ((dir as u32) << page_bits) | slot as u32;
                if value.as_ref().is_some_and(|v| !keep(id, v)) {
                    *value = None;
                    dropped_here += 1;
                }
            }
            page.occupied -= dropped_here;
            dropped += dropped_here;
            if page.occupied == 0 {
                *entry = None;
            }
        }
        self.len -= dropped;
        dropped
    }
}
