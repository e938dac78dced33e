//! Bounded rolling history of output ticks
//!
//! The scheduler is the only writer. Readers copy the whole history out
//! and release the lock immediately, so they never hold up a tick.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::audio::frame::OutputTick;

pub struct History {
    ticks: Mutex<VecDeque<OutputTick>>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            ticks: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a tick, returning the oldest one if it fell out
    pub fn push(&self, tick: OutputTick) -> Option<OutputTick> {
        let mut ticks = self.ticks.lock();
        ticks.push_back(tick);
        if ticks.len() > self.capacity {
            ticks.pop_front()
        } else {
            None
        }
    }

    /// Copy of the history, oldest first
    pub fn snapshot(&self) -> Vec<OutputTick> {
        let ticks = self.ticks.lock();
        ticks.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ticks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(index: u64) -> OutputTick {
        OutputTick {
            index,
            entries: Vec::new(),
        }
    }

    #[test]
    fn test_evicts_oldest_first() {
        let history = History::new(3);
        for i in 0..3 {
            assert!(history.push(tick(i)).is_none());
        }

        let evicted = history.push(tick(3)).unwrap();
        assert_eq!(evicted.index, 0);
        assert_eq!(history.push(tick(4)).unwrap().index, 1);

        let indices: Vec<u64> = history.snapshot().iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![2, 3, 4]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let history = History::new(50);
        for i in 0..1234 {
            history.push(tick(i));
            assert!(history.len() <= history.capacity());
        }
        assert_eq!(history.len(), 50);
        assert_eq!(history.snapshot().first().map(|t| t.index), Some(1184));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let history = History::new(4);
        history.push(tick(1));
        let snapshot = history.snapshot();
        history.push(tick(2));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(history.len(), 2);
    }
}
