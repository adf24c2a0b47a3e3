//! Frame-tick job queue.
//!
//! Deferred work (the debounced bounding-box recompute) is queued here and
//! run by the frame loop on its next tick.

use crossbeam_channel::{Receiver, Sender};

type Job = Box<dyn FnOnce() + Send>;

/// Cloneable handle to the frame job queue
#[derive(Clone)]
pub struct FrameScheduler {
    tx: Sender<Job>,
    rx: Receiver<Job>,
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScheduler {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Run `job` on the next tick
    pub fn defer<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Both ends live in self, the channel cannot be disconnected here
        if self.tx.send(Box::new(job)).is_err() {
            tracing::error!("Frame scheduler queue closed, dropping job");
        }
    }

    /// Run the jobs queued before this call. Jobs they defer wait for the
    /// next tick. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let count = self.rx.len();
        for _ in 0..count {
            match self.rx.try_recv() {
                Ok(job) => job(),
                Err(_) => return count,
            }
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_jobs_wait_for_tick() {
        let scheduler = FrameScheduler::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        scheduler.defer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.run_pending(), 0);
    }

    #[test]
    fn test_nested_defer_runs_next_tick() {
        let scheduler = FrameScheduler::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let inner_scheduler = scheduler.clone();
        let counter = ran.clone();
        scheduler.defer(move || {
            inner_scheduler.defer(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        scheduler.run_pending();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        scheduler.run_pending();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
