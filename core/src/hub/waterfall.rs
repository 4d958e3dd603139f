/// Fixed-capacity ring of the most recent items, oldest first on read.
pub struct WaterfallHistory<T> {
    capacity: usize,
    slots: Vec<T>,
    next: usize,
}

impl<T: Clone> WaterfallHistory<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: Vec::with_capacity(capacity),
            next: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn push(&mut self, item: T) {
        if self.slots.len() < self.capacity {
            self.slots.push(item);
        } else {
            self.slots[self.next] = item;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.next = 0;
    }

    /// Retained items in arrival order.
    pub fn snapshot(&self) -> Vec<T> {
        if self.slots.len() < self.capacity {
            return self.slots.clone();
        }
        let (newer, older) = self.slots.split_at(self.next);
        older.iter().chain(newer.iter()).cloned().collect()
    }
}
