//! Bounded FIFO of pending calls.

use std::collections::VecDeque;

/// Rejected enqueue: the queue was at its bound. The item is handed back
/// untouched and the queue length is unchanged.
#[derive(Debug)]
pub struct Overflow<T> {
    pub item: T,
    pub limit: usize,
}

/// FIFO queue with O(1) enqueue/dequeue and explicit overflow signaling.
///
/// Backed by a ring buffer, so dequeuing never compacts. An enqueue beyond
/// the bound is rejected, never silently dropped. Observers get read-only
/// access through snapshots; nothing outside the owning coordinator can
/// mutate the queue.
#[derive(Debug)]
pub struct CallQueue<T> {
    items: VecDeque<T>,
    max_size: Option<usize>,
}

impl<T> CallQueue<T> {
    /// `max_size` of `None` means unbounded.
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    /// Append at the tail, or hand the item back if the queue is full.
    pub fn enqueue(&mut self, item: T) -> Result<(), Overflow<T>> {
        if let Some(limit) = self.max_size {
            if self.items.len() >= limit {
                return Err(Overflow { item, limit });
            }
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Remove and return the oldest item.
    pub fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Inspect the oldest item without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Remove everything, oldest first. Teardown uses this to mass-reject.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }
}
