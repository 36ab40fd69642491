//! Engine timers on the tokio clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use webchannel_core::{Scheduler, TimerId};

use crate::DriverEvent;

/// [`Scheduler`] that runs each timer as a sleeping tokio task.
///
/// A fire is posted to the engine task as [`DriverEvent::Timer`] with the
/// sequence number of the arming. A timer that was replaced or canceled
/// after its task already posted is filtered out by [`TokioScheduler::fired`].
#[derive(Debug)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<DriverEvent>,
    armed: HashMap<TimerId, (u64, AbortHandle)>,
    next_seq: u64,
}

impl TokioScheduler {
    pub(crate) fn new(tx: mpsc::UnboundedSender<DriverEvent>) -> Self {
        Self {
            tx,
            armed: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Consume a posted fire. Returns `false` when the arming it belongs to
    /// is no longer current.
    pub(crate) fn fired(&mut self, timer: TimerId, seq: u64) -> bool {
        match self.armed.get(&timer) {
            Some((armed_seq, _)) if *armed_seq == seq => {
                self.armed.remove(&timer);
                true
            }
            _ => false,
        }
    }

    /// Number of armed timers.
    #[must_use]
    pub fn armed(&self) -> usize {
        self.armed.len()
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn schedule(&mut self, timer: TimerId, delay: Duration) {
        self.cancel(timer);
        let seq = self.next_seq;
        self.next_seq += 1;

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(DriverEvent::Timer(timer, seq));
        });
        self.armed.insert(timer, (seq, handle.abort_handle()));
    }

    fn cancel(&mut self, timer: TimerId) {
        if let Some((_, handle)) = self.armed.remove(&timer) {
            handle.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.armed.values() {
            handle.abort();
        }
    }
}
