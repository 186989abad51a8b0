//! Mailbox ring buffer
//!
//! The storage half of a mailbox: a bounded FIFO of values plus the count of
//! values dropped because the ring was full. Coordination between producers
//! and consumers is done by the kernel with two semaphores.

use heapless::Deque;

use crate::{KernelError, RResult};

/// What `put` does when the mailbox is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PutPolicy {
    /// Drop the new value, count the loss and return immediately
    #[default]
    Lossy,
    /// Block the producer until a consumer makes room
    Blocking,
}

/// Bounded FIFO of `N` values with a loss counter
#[derive(Debug)]
pub struct Ring<T, const N: usize> {
    slots: Deque<T, N>,
    lost: u32,
}

impl<T: Copy, const N: usize> Ring<T, N> {
    pub const fn new() -> Self {
        Self {
            slots: Deque::new(),
            lost: 0,
        }
    }

    /// Append a value, handing it back if the ring is full
    pub fn push(&mut self, value: T) -> Result<(), T> {
        self.slots.push_back(value)
    }

    /// Append a value, counting it as lost if the ring is full
    pub fn push_or_count_loss(&mut self, value: T) -> RResult<()> {
        self.slots.push_back(value).map_err(|_| {
            self.lost = self.lost.saturating_add(1);
            KernelError::MailboxFull
        })
    }

    /// Remove the oldest value
    pub fn pop(&mut self) -> Option<T> {
        self.slots.pop_front()
    }

    /// Look at the oldest value without removing it
    pub fn peek(&self) -> Option<T> {
        self.slots.front().copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.is_full()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Discard all stored values. The loss count is kept.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Values dropped because the ring was full
    pub fn lost(&self) -> u32 {
        self.lost
    }
}

impl<T: Copy, const N: usize> Default for Ring<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut ring: Ring<u8, 3> = Ring::new();
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        ring.push(3).unwrap();

        assert!(ring.is_full());
        assert_eq!(ring.push(4), Err(4));
        assert_eq!(ring.peek(), Some(1));
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), None);
        assert_eq!(ring.peek(), None);
    }

    #[test]
    fn full_ring_keeps_oldest_and_counts_loss() {
        let mut ring: Ring<u32, 1> = Ring::new();
        assert_eq!(ring.push_or_count_loss(5), Ok(()));
        assert_eq!(ring.push_or_count_loss(7), Err(KernelError::MailboxFull));
        assert_eq!(ring.lost(), 1);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.pop(), Some(5));
        assert_eq!(ring.lost(), 1);
    }

    #[test]
    fn wraps_around() {
        let mut ring: Ring<u16, 2> = Ring::new();
        for n in 0..10 {
            ring.push(n).unwrap();
            assert_eq!(ring.pop(), Some(n));
        }
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 2);
        assert_eq!(ring.lost(), 0);
    }
}
