//! Deadline queue polled by the reactor loop

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

/// Handle to a scheduled timer, used to cancel it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Priority queue of deadlines.
///
/// Cancelling only removes the payload, the heap entry is discarded lazily once it
/// reaches the top.
#[derive(Debug)]
pub struct TimerQueue<T> {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    live: HashMap<u64, T>,
    next_id: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, deadline: Instant, value: T) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;

        self.heap.push(Reverse((deadline, id)));
        self.live.insert(id, value);

        TimerId(id)
    }

    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        self.live.remove(&id.0)
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.live.contains_key(&id.0)
    }

    /// Earliest deadline of all timers that are still scheduled
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.purge();
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Remove and return the next timer which expired at `now`
    pub fn pop_expired(&mut self, now: Instant) -> Option<T> {
        self.purge();

        let Reverse((deadline, id)) = *self.heap.peek()?;

        if deadline > now {
            return None;
        }

        self.heap.pop();
        self.live.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn purge(&mut self) {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            if self.live.contains_key(id) {
                break;
            }

            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn expires_in_order() {
        let now = Instant::now();
        let mut queue = TimerQueue::new();

        queue.insert(now + Duration::from_secs(2), "b");
        queue.insert(now + Duration::from_secs(1), "a");
        queue.insert(now + Duration::from_secs(3), "c");

        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(queue.pop_expired(now), None);

        let later = now + Duration::from_secs(2);
        assert_eq!(queue.pop_expired(later), Some("a"));
        assert_eq!(queue.pop_expired(later), Some("b"));
        assert_eq!(queue.pop_expired(later), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let now = Instant::now();
        let mut queue = TimerQueue::new();

        let a = queue.insert(now, 1);
        queue.insert(now + Duration::from_secs(5), 2);

        assert_eq!(queue.cancel(a), Some(1));
        assert_eq!(queue.cancel(a), None);
        assert!(!queue.contains(a));

        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(5)));
        assert_eq!(queue.pop_expired(now), None);
    }
}
