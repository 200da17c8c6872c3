//! Clocks and timer scheduling
//!
//! The send loop asks its driver to "resume after D". This module provides
//! the two clocks such drivers run on: the wall clock, and a discrete-event
//! [`EventQueue`] whose time only moves when the next event is popped.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::ops::{Add, Sub};
use std::time::{Duration, Instant};

/// Monotonic timestamp
///
/// Wraps `Instant` so simulated and wall-clock time share one type: a
/// simulated timestamp is the queue's origin plus its virtual offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Instant);

impl Timestamp {
    /// Get the current wall-clock timestamp
    #[inline]
    pub fn now() -> Self {
        Timestamp(Instant::now())
    }

    /// Create a timestamp from an instant
    #[inline]
    pub fn from_instant(instant: Instant) -> Self {
        Timestamp(instant)
    }

    /// Get the underlying instant
    #[inline]
    pub fn as_instant(&self) -> Instant {
        self.0
    }

    /// Duration since an earlier timestamp, zero if `earlier` is later
    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    /// Wall-clock time elapsed since this timestamp
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// Timestamp `offset` after `origin`
    pub fn from_offset(origin: Timestamp, offset: Duration) -> Self {
        Timestamp(origin.0 + offset)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, duration: Duration) -> Timestamp {
        Timestamp(self.0 + duration)
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, duration: Duration) -> Timestamp {
        Timestamp(self.0 - duration)
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, other: Timestamp) -> Duration {
        self.duration_since(other)
    }
}

/// Source of the current time
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// The operating system's monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Handle to a scheduled event, used to cancel it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Something that can deliver an event after a delay
pub trait Scheduler<E>: Clock {
    /// Schedule `event` to fire `delay` from now
    fn schedule_after(&mut self, delay: Duration, event: E) -> TimerHandle;

    /// Cancel a pending event; returns false if it already fired or was cancelled
    fn cancel(&mut self, handle: TimerHandle) -> bool;
}

#[derive(Debug, PartialEq, Eq)]
struct QueueEntry {
    due: Duration,
    id: u64,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, earliest deadline must pop first.
        // Ids increase monotonically, so equal deadlines fire in schedule order.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Discrete-event scheduler with virtual time
///
/// Time starts at the origin and jumps to each event's deadline as it is
/// popped. Cancelled events are never delivered.
#[derive(Debug)]
pub struct EventQueue<E> {
    origin: Timestamp,
    now: Duration,
    next_id: u64,
    heap: BinaryHeap<QueueEntry>,
    pending: HashMap<u64, E>,
}

impl<E> EventQueue<E> {
    /// Create a queue whose virtual time starts now
    pub fn new() -> Self {
        Self::with_origin(Timestamp::now())
    }

    /// Create a queue whose virtual time starts at `origin`
    pub fn with_origin(origin: Timestamp) -> Self {
        EventQueue {
            origin,
            now: Duration::ZERO,
            next_id: 0,
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
        }
    }

    /// Pop the earliest live event, advancing virtual time to its deadline
    pub fn pop_next(&mut self) -> Option<(Timestamp, E)> {
        while let Some(entry) = self.heap.pop() {
            if let Some(event) = self.pending.remove(&entry.id) {
                self.now = entry.due;
                return Some((Timestamp::from_offset(self.origin, entry.due), event));
            }
        }
        None
    }

    /// Offset from the origin of the earliest live event, without popping it
    pub fn next_due(&mut self) -> Option<Duration> {
        while let Some(entry) = self.heap.peek() {
            if self.pending.contains_key(&entry.id) {
                return Some(entry.due);
            }
            self.heap.pop();
        }
        None
    }

    /// Virtual time elapsed since the origin
    pub fn elapsed(&self) -> Duration {
        self.now
    }

    /// Origin of virtual time
    pub fn origin(&self) -> Timestamp {
        self.origin
    }

    /// Number of live (not cancelled, not fired) events
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if no live events remain
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clock for EventQueue<E> {
    fn now(&self) -> Timestamp {
        Timestamp::from_offset(self.origin, self.now)
    }
}

impl<E> Scheduler<E> for EventQueue<E> {
    fn schedule_after(&mut self, delay: Duration, event: E) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;

        let due = self.now.saturating_add(delay);
        self.heap.push(QueueEntry { due, id });
        self.pending.insert(id, event);

        TimerHandle(id)
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        // The heap entry stays behind and is skipped when popped
        self.pending.remove(&handle.0).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timestamp_arithmetic() {
        let ts1 = Timestamp::now();
        thread::sleep(Duration::from_millis(10));
        let ts2 = Timestamp::now();

        let diff = ts2 - ts1;
        assert!(diff >= Duration::from_millis(10));
        assert_eq!(ts1 - ts2, Duration::ZERO);
    }

    #[test]
    fn test_timestamp_offset() {
        let origin = Timestamp::now();
        let later = Timestamp::from_offset(origin, Duration::from_millis(250));

        assert_eq!(later - origin, Duration::from_millis(250));
        assert_eq!(later - Duration::from_millis(250), origin);
    }

    #[test]
    fn test_events_fire_in_deadline_order() {
        let mut queue = EventQueue::new();
        queue.schedule_after(Duration::from_millis(30), "c");
        queue.schedule_after(Duration::from_millis(10), "a");
        queue.schedule_after(Duration::from_millis(20), "b");

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_next().map(|(_, e)| e)).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(queue.elapsed(), Duration::from_millis(30));
    }

    #[test]
    fn test_equal_deadlines_are_fifo() {
        let mut queue = EventQueue::new();
        for i in 0..5 {
            queue.schedule_after(Duration::from_millis(1), i);
        }

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_next().map(|(_, e)| e)).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_cancelled_event_never_fires() {
        let mut queue = EventQueue::new();
        let keep = queue.schedule_after(Duration::from_millis(5), 1);
        let drop = queue.schedule_after(Duration::from_millis(1), 2);

        assert!(queue.cancel(drop));
        assert!(!queue.cancel(drop));
        assert_eq!(queue.len(), 1);

        let (_, event) = queue.pop_next().unwrap();
        assert_eq!(event, 1);
        assert!(!queue.cancel(keep));
        assert!(queue.pop_next().is_none());
    }

    #[test]
    fn test_next_due_skips_cancelled() {
        let mut queue = EventQueue::new();
        let early = queue.schedule_after(Duration::from_millis(1), 'a');
        queue.schedule_after(Duration::from_millis(4), 'b');

        assert_eq!(queue.next_due(), Some(Duration::from_millis(1)));
        queue.cancel(early);
        assert_eq!(queue.next_due(), Some(Duration::from_millis(4)));

        // Peeking leaves time and the event alone
        assert_eq!(queue.elapsed(), Duration::ZERO);
        assert_eq!(queue.pop_next().map(|(_, e)| e), Some('b'));
        assert_eq!(queue.next_due(), None);
    }

    #[test]
    fn test_virtual_time_is_relative_to_pop() {
        let origin = Timestamp::now();
        let mut queue = EventQueue::with_origin(origin);

        queue.schedule_after(Duration::from_secs(2), ());
        let (at, _) = queue.pop_next().unwrap();
        assert_eq!(at - origin, Duration::from_secs(2));

        // Scheduling after a pop is relative to the new virtual time
        queue.schedule_after(Duration::from_secs(1), ());
        let (at, _) = queue.pop_next().unwrap();
        assert_eq!(at - origin, Duration::from_secs(3));
        assert_eq!(queue.now(), at);
    }

    proptest::proptest! {
        #[test]
        fn prop_pop_order_is_sorted(delays in proptest::collection::vec(0u64..10_000, 1..64)) {
            let mut queue = EventQueue::new();
            for (i, d) in delays.iter().enumerate() {
                queue.schedule_after(Duration::from_micros(*d), i);
            }

            let mut last = queue.now();
            let mut popped = 0;
            while let Some((at, i)) = queue.pop_next() {
                proptest::prop_assert!(at >= last);
                proptest::prop_assert_eq!(at - queue.origin(), Duration::from_micros(delays[i]));
                last = at;
                popped += 1;
            }
            proptest::prop_assert_eq!(popped, delays.len());
        }
    }
}
