use super::Value;

/// Cursor over a snapshot of collection elements.
///
/// The snapshot is taken when the iterator is created, so later mutation of the source
/// collection does not disturb an in-flight traversal.
#[derive(Debug, Clone, Default)]
pub struct IteratorCursor {
    items: Vec<Value>,
    index: usize,
}

impl IteratorCursor {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items, index: 0 }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn is_ended(&self) -> bool {
        self.index >= self.items.len()
    }

    /// Element under the cursor, `None` once the iterator has ended.
    pub fn current(&self) -> Option<&Value> {
        self.items.get(self.index)
    }

    /// Moves past the current element. Advancing an ended iterator is a no-op.
    pub fn advance(&mut self) {
        if !self.is_ended() {
            self.index += 1;
        }
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }

    pub(crate) fn items(&self) -> &[Value] {
        &self.items
    }
}
