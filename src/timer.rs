//! Deadline-ordered timers for the reactor thread.
//!
//! The wheel is an ordered multimap keyed by absolute expiry time: timers that
//! share a deadline share a bucket, and the smallest key is always the next
//! deadline. It is owned exclusively by the reactor thread, so no locking is
//! involved.

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use crate::reactor::Reactor;

/// Identifier handed out by [`Reactor::add_timer`](crate::Reactor::add_timer).
///
/// Unique per reactor and monotonically assigned. A recurring timer keeps its
/// id across re-arms.
pub type TimerId = u64;

pub(crate) type TimerCallback = Box<dyn FnMut(&mut Reactor) + Send>;

/// A scheduled callback. `interval` of zero means one-shot; otherwise the
/// timer re-arms after each firing.
pub(crate) struct Timer {
    pub(crate) id: TimerId,
    pub(crate) interval: Duration,
    pub(crate) callback: TimerCallback,
}

pub(crate) struct TimerWheel {
    buckets: BTreeMap<Instant, Vec<Timer>>,
    /// Ids of timers detached from the wheel by the current firing pass.
    /// Entries are added when a bucket is detached and removed when the timer
    /// re-arms or completes.
    in_flight: HashSet<TimerId>,
    /// In-flight ids cancelled mid-pass. Consumed when the timer would
    /// re-arm or complete.
    cancelled: HashSet<TimerId>,
    next_id: TimerId,
}

impl TimerWheel {
    pub(crate) fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            in_flight: HashSet::new(),
            cancelled: HashSet::new(),
            next_id: 0,
        }
    }

    /// Schedules a callback and returns its freshly assigned id.
    pub(crate) fn insert(
        &mut self,
        deadline: Instant,
        interval: Duration,
        callback: TimerCallback,
    ) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.buckets.entry(deadline).or_default().push(Timer {
            id,
            interval,
            callback,
        });
        id
    }

    /// Puts a fired recurring timer back, unless it was cancelled while it was
    /// detached from the wheel.
    pub(crate) fn reinsert(&mut self, deadline: Instant, timer: Timer) {
        self.in_flight.remove(&timer.id);
        if self.cancelled.remove(&timer.id) {
            return;
        }
        self.buckets.entry(deadline).or_default().push(timer);
    }

    /// Retires a fired one-shot timer, clearing any in-flight bookkeeping so
    /// its id does not linger.
    pub(crate) fn complete(&mut self, id: TimerId) {
        self.in_flight.remove(&id);
        self.cancelled.remove(&id);
    }

    /// The earliest deadline currently scheduled, if any.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.buckets.keys().next().copied()
    }

    /// Detaches and returns the earliest bucket if it has expired. Detaching
    /// the whole bucket means callbacks never observe themselves in the
    /// wheel; the detached timers are tracked as in-flight until they re-arm
    /// or complete.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<Vec<Timer>> {
        let (&deadline, _) = self.buckets.first_key_value()?;
        if deadline > now {
            return None;
        }
        let bucket = self.buckets.remove(&deadline)?;
        self.in_flight.extend(bucket.iter().map(|timer| timer.id));
        Some(bucket)
    }

    /// Cancels a timer. Returns `true` if the timer will not fire again.
    ///
    /// A timer that is mid-flight in the current firing pass cannot be pulled
    /// out of the detached bucket; its id is tombstoned instead and the
    /// re-arm is suppressed, so cancellation is effective no later than the
    /// end of that pass. Ids that are neither scheduled nor in flight (never
    /// issued, or a one-shot that already completed) are rejected.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        let mut emptied = None;
        let mut found = false;
        for (&deadline, bucket) in self.buckets.iter_mut() {
            if let Some(pos) = bucket.iter().position(|timer| timer.id == id) {
                bucket.remove(pos);
                found = true;
                if bucket.is_empty() {
                    emptied = Some(deadline);
                }
                break;
            }
        }
        if let Some(deadline) = emptied {
            self.buckets.remove(&deadline);
        }
        if found {
            return true;
        }
        if self.in_flight.contains(&id) {
            self.cancelled.insert(id);
            return true;
        }
        false
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback() -> TimerCallback {
        Box::new(|_reactor: &mut Reactor| {})
    }

    #[test]
    fn ids_are_monotonic() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let a = wheel.insert(now, Duration::ZERO, callback());
        let b = wheel.insert(now, Duration::ZERO, callback());
        assert!(b > a);
    }

    #[test]
    fn smallest_key_is_next_deadline() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        wheel.insert(now + Duration::from_millis(50), Duration::ZERO, callback());
        wheel.insert(now + Duration::from_millis(10), Duration::ZERO, callback());
        assert_eq!(wheel.next_deadline(), Some(now + Duration::from_millis(10)));
    }

    #[test]
    fn same_deadline_shares_a_bucket() {
        let mut wheel = TimerWheel::new();
        let deadline = Instant::now();
        wheel.insert(deadline, Duration::ZERO, callback());
        wheel.insert(deadline, Duration::ZERO, callback());
        let bucket = wheel.pop_expired(deadline).expect("bucket is due");
        assert_eq!(bucket.len(), 2);
        assert!(wheel.is_empty());
    }

    #[test]
    fn future_buckets_are_not_detached() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        wheel.insert(now + Duration::from_secs(60), Duration::ZERO, callback());
        assert!(wheel.pop_expired(now).is_none());
        assert!(!wheel.is_empty());
    }

    #[test]
    fn expired_buckets_pop_in_deadline_order() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let late = wheel.insert(now, Duration::ZERO, callback());
        let early = wheel.insert(now - Duration::from_millis(5), Duration::ZERO, callback());
        let first = wheel.pop_expired(now).expect("two buckets due");
        assert_eq!(first[0].id, early);
        let second = wheel.pop_expired(now).expect("one bucket left");
        assert_eq!(second[0].id, late);
    }

    #[test]
    fn cancel_removes_a_scheduled_timer() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let id = wheel.insert(now + Duration::from_millis(10), Duration::ZERO, callback());
        assert!(wheel.cancel(id));
        assert!(wheel.is_empty());
        assert_eq!(wheel.next_deadline(), None);
    }

    #[test]
    fn cancel_of_detached_timer_suppresses_rearm() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let interval = Duration::from_millis(10);
        let id = wheel.insert(now, interval, callback());
        let mut bucket = wheel.pop_expired(now).expect("due");
        assert!(wheel.cancel(id), "in-flight cancel is recorded");
        let timer = bucket.remove(0);
        wheel.reinsert(now + interval, timer);
        assert!(wheel.is_empty(), "re-arm of a cancelled timer is dropped");
    }

    #[test]
    fn cancel_of_completed_one_shot_is_rejected() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let id = wheel.insert(now, Duration::ZERO, callback());
        let _bucket = wheel.pop_expired(now).expect("due");
        wheel.complete(id);
        // The id is neither scheduled nor in flight any more; cancelling it
        // is a no-op, not a tombstone.
        assert!(!wheel.cancel(id));
    }

    #[test]
    fn cancel_of_unknown_id_is_rejected() {
        let mut wheel = TimerWheel::new();
        assert!(!wheel.cancel(7));
    }
}
