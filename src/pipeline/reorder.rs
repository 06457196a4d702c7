//! Fixed-size reorder buffer keyed by link position.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReorderError {
    #[error("position {position} outside buffer of {capacity}")]
    OutOfRange { position: usize, capacity: usize },
    #[error("position {0} already filled")]
    Occupied(usize),
}

/// Releases items strictly in position order, whatever order they arrive in
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    slots: Vec<Option<T>>,
    next: usize,
}

impl<T> ReorderBuffer<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            next: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Lowest position not yet released
    #[must_use]
    pub const fn next_position(&self) -> usize {
        self.next
    }

    /// Store an item at its position
    ///
    /// # Errors
    ///
    /// Fails if the position is out of range, already filled, or already released.
    pub fn insert(&mut self, position: usize, item: T) -> Result<(), ReorderError> {
        let capacity = self.slots.len();
        let slot = self
            .slots
            .get_mut(position)
            .ok_or(ReorderError::OutOfRange { position, capacity })?;
        if slot.is_some() || position < self.next {
            return Err(ReorderError::Occupied(position));
        }
        *slot = Some(item);
        Ok(())
    }

    /// Take the contiguous run of filled slots starting at the lowest unreleased one
    pub fn drain_ready(&mut self) -> Vec<(usize, T)> {
        let mut ready = Vec::new();
        while let Some(item) = self.slots.get_mut(self.next).and_then(Option::take) {
            ready.push((self.next, item));
            self.next += 1;
        }
        ready
    }

    /// Positions not yet filled and not yet released
    #[must_use]
    pub fn missing(&self) -> Vec<usize> {
        (self.next..self.slots.len())
            .filter(|&i| self.slots[i].is_none())
            .collect()
    }

    /// Every position has been released
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.next == self.slots.len()
    }
}
