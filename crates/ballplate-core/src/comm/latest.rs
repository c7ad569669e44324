//! Single-slot latest-value buffer

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A published value with its sequence number and publish time
#[derive(Debug)]
pub struct Stamped<T> {
    /// Starts at 1 and increases by one per publish
    pub seq: u64,
    pub published_at: Instant,
    pub value: T,
}

struct SlotState<T> {
    seq: u64,
    latest: Option<Arc<Stamped<T>>>,
}

/// Holds only the most recently published value
///
/// Publishing swaps an `Arc` under a short lock, so readers see either the
/// previous value or the new one in full. Readers never block on the
/// producer beyond that lock; [`wait_newer`](Self::wait_newer) is the only
/// call that waits, and it is bounded.
///
/// # Example
/// ```
/// use ballplate_core::comm::LatestSlot;
///
/// let slot = LatestSlot::new();
/// assert!(slot.latest().is_none());
/// slot.publish(1);
/// slot.publish(2);
/// let latest = slot.latest().unwrap();
/// assert_eq!((latest.seq, latest.value), (2, 2));
/// ```
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    published: Condvar,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                seq: 0,
                latest: None,
            }),
            published: Condvar::new(),
        }
    }

    /// Replace the held value, returning its sequence number
    pub fn publish(&self, value: T) -> u64 {
        let seq = {
            let mut state = self.state.lock();
            state.seq += 1;
            state.latest = Some(Arc::new(Stamped {
                seq: state.seq,
                published_at: Instant::now(),
                value,
            }));
            state.seq
        };
        self.published.notify_all();
        seq
    }

    /// Most recent value, if anything was published
    #[inline]
    pub fn latest(&self) -> Option<Arc<Stamped<T>>> {
        self.state.lock().latest.clone()
    }

    /// Sequence number of the most recent value (0 if none)
    #[inline]
    pub fn seq(&self) -> u64 {
        self.state.lock().seq
    }

    /// Wait up to `timeout` for a value newer than `after`
    pub fn wait_newer(&self, after: u64, timeout: Duration) -> Option<Arc<Stamped<T>>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.seq <= after {
            if self.published.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.latest.clone().filter(|v| v.seq > after)
    }
}

impl<T> std::fmt::Debug for LatestSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatestSlot").field("seq", &self.seq()).finish()
    }
}
