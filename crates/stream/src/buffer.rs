use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::warn;

use crate::options::OverflowWarning;

/// Cumulative overflow counters of a [`BoundedBuffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverflowStats {
    /// Messages evicted since the buffer was created.
    pub dropped_total: u64,
    /// Overflow warnings logged since the buffer was created.
    pub overflow_warnings: u64,
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<Bytes>,
    /// Evictions since the last drain.
    dropped_in_interval: u64,
    warned_in_interval: bool,
    stats: OverflowStats,
}

/// A FIFO of raw payloads that drops its oldest entries when full.
///
/// Pushes come from the transport's dispatch context and drains from the
/// poller; both only hold the lock for the queue manipulation itself.
#[derive(Debug)]
pub struct BoundedBuffer {
    channel: String,
    capacity: usize,
    policy: OverflowWarning,
    inner: Mutex<Inner>,
}

impl BoundedBuffer {
    /// Create a buffer for `channel` holding at most `capacity` payloads.
    pub fn new(channel: impl Into<String>, capacity: usize, policy: OverflowWarning) -> Self {
        Self {
            channel: channel.into(),
            capacity,
            policy,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append a payload, evicting from the front until the capacity holds.
    pub fn push(&self, payload: Bytes) {
        let warn_now = {
            let mut inner = self.inner.lock();
            inner.queue.push_back(payload);

            let mut evicted = 0u64;
            while inner.queue.len() > self.capacity {
                inner.queue.pop_front();
                evicted += 1;
            }
            if evicted == 0 {
                return;
            }

            inner.dropped_in_interval += evicted;
            inner.stats.dropped_total += evicted;
            if self.policy == OverflowWarning::FirstDrop && !inner.warned_in_interval {
                inner.warned_in_interval = true;
                inner.stats.overflow_warnings += 1;
                Some(inner.dropped_in_interval)
            } else {
                None
            }
        };

        if let Some(count) = warn_now {
            self.warn_dropped(count);
        }
    }

    /// Remove up to `max` payloads oldest-first, or everything when `max` is
    /// `None`. Never waits for data.
    ///
    /// Every drain ends the current overflow interval.
    pub fn drain(&self, max: Option<usize>) -> Vec<Bytes> {
        let (drained, dropped) = {
            let mut inner = self.inner.lock();
            let take = max.map_or(inner.queue.len(), |m| m.min(inner.queue.len()));
            let drained: Vec<Bytes> = inner.queue.drain(..take).collect();

            let dropped = inner.dropped_in_interval;
            let warn_now = self.policy == OverflowWarning::OnDrain && dropped > 0;
            if warn_now {
                inner.stats.overflow_warnings += 1;
            }
            inner.dropped_in_interval = 0;
            inner.warned_in_interval = false;
            (drained, warn_now.then_some(dropped))
        };

        if let Some(count) = dropped {
            self.warn_dropped(count);
        }
        drained
    }

    /// Discard every buffered payload.
    pub fn clear(&self) {
        self.inner.lock().queue.clear();
    }

    /// Number of buffered payloads.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow_stats(&self) -> OverflowStats {
        self.inner.lock().stats
    }

    fn warn_dropped(&self, count: u64) {
        warn!(
            channel = %self.channel,
            dropped = count,
            capacity = self.capacity,
            "Dropped {count} messages on the floor due to overflowing cache size"
        );
    }
}
