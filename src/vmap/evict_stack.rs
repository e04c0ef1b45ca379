use crate::common::concurrent::constants::EVICT_STACK_CAPACITY;

/// A tiny ring-buffer stack remembering the last few relays visited while
/// linking.
///
/// It never owns what it records. Pushing onto a full stack silently drops
/// the oldest entry, so backtracking memory stays constant however long the
/// crawl is.
pub(crate) struct EvictStack<T: Copy> {
    slots: [Option<T>; EVICT_STACK_CAPACITY],
    top: usize,
    len: usize,
}

impl<T: Copy> EvictStack<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: [None; EVICT_STACK_CAPACITY],
            top: 0,
            len: 0,
        }
    }

    pub(crate) fn push(&mut self, item: T) {
        self.top = (self.top + 1) % EVICT_STACK_CAPACITY;
        self.slots[self.top] = Some(item);
        self.len = (self.len + 1).min(EVICT_STACK_CAPACITY);
    }

    pub(crate) fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }

        let item = self.slots[self.top].take();
        self.top = (self.top + EVICT_STACK_CAPACITY - 1) % EVICT_STACK_CAPACITY;
        self.len -= 1;
        item
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
