//! Bounded capture buffer
//!
//! Sits between the GPS callback and the store writer. Pushing never waits:
//! when the buffer is full the oldest unpersisted sample is discarded.
//! Sequence numbers are handed out under the same lock as the enqueue, so
//! samples always leave the buffer in sequence order.

use crate::shared::route::RoutePoint;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Result of a push
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Queued,
    /// Buffer was full; the returned sample was discarded to make room
    DroppedOldest(RoutePoint),
    /// Buffer already closed; the sample was not accepted
    Closed,
}

#[derive(Debug, Default)]
struct BufferState {
    samples: VecDeque<RoutePoint>,
    next_sequence: i64,
    dropped: u64,
    closed: bool,
}

/// Single-consumer drop-oldest queue of points
#[derive(Debug)]
pub struct PointBuffer {
    state: Mutex<BufferState>,
    notify: Notify,
    capacity: usize,
}

impl PointBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Assign the next sequence number, build the sample with it and enqueue
    pub fn push(&self, make: impl FnOnce(i64) -> RoutePoint) -> (i64, PushOutcome) {
        let (sequence, outcome) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let sequence = state.next_sequence;
            if state.closed {
                return (sequence, PushOutcome::Closed);
            }
            state.next_sequence += 1;
            let point = make(sequence);
            let evicted = if state.samples.len() >= self.capacity {
                state.dropped += 1;
                state.samples.pop_front()
            } else {
                None
            };
            state.samples.push_back(point);
            let outcome = match evicted {
                Some(old) => PushOutcome::DroppedOldest(old),
                None => PushOutcome::Queued,
            };
            (sequence, outcome)
        };
        self.notify.notify_one();
        (sequence, outcome)
    }

    /// Take up to `max` samples from the front
    pub fn drain_batch(&self, max: usize) -> Vec<RoutePoint> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let n = max.min(state.samples.len());
        state.samples.drain(..n).collect()
    }

    /// Wait until samples are available
    ///
    /// Returns false once the buffer is closed and fully drained.
    pub async fn wait(&self) -> bool {
        loop {
            {
                let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if !state.samples.is_empty() {
                    return true;
                }
                if state.closed {
                    return false;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting samples; queued samples can still be drained
    pub fn close(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed = true;
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples discarded because the buffer was full
    pub fn dropped_count(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).dropped
    }
}
