//! Epoch-windowed load estimation: a timestamped request FIFO whose entries
//! expire after one epoch. Current load is the window size.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::time::{Duration, Instant};

use crate::wire::LoadVal;

#[derive(Debug)]
struct WindowInner {
    epoch_start: Option<Instant>,
    request_ts: VecDeque<Instant>,
}

/// Per-server load sample window, serialized by a mutex.
#[derive(Debug)]
pub(crate) struct LoadWindow {
    epoch: Duration,
    inner: Mutex<WindowInner>,
}

impl LoadWindow {
    pub(crate) fn new(epoch: Duration) -> Self {
        LoadWindow {
            epoch,
            inner: Mutex::new(WindowInner {
                epoch_start: None,
                request_ts: VecDeque::new(),
            }),
        }
    }

    /// Records a request at `now` and returns the resulting window size.
    pub(crate) fn observe(&self, now: Instant) -> LoadVal {
        let mut inner = self.inner.lock().unwrap();
        let epoch_start = *inner.epoch_start.get_or_insert(now);
        inner.request_ts.push_back(now);

        if now.duration_since(epoch_start) > self.epoch {
            let new_start = now - self.epoch;
            inner.epoch_start = Some(new_start);
            // timestamps arrive in order; prune the stale prefix only
            while let Some(&front) = inner.request_ts.front() {
                if front < new_start {
                    inner.request_ts.pop_front();
                } else {
                    break;
                }
            }
        }

        inner.request_ts.len().min(LoadVal::MAX as usize) as LoadVal
    }
}
