// src/task_queue.rs
// Process-wide FIFO serializer (spec §4.6): `updateIndex`, `queryIndex`,
// and `destroy` all submit through here so no two mutate-or-read a
// secondary store's batch concurrently. A single dedicated worker
// thread drains jobs in submission order; `submit` enqueues and blocks
// for the reply, `submit_detached` enqueues and returns immediately
// (used for the `stale = 'update_after'` background refresh).
//
// Grounded on the bounded-channel worker-thread shape used for
// background compaction in `ironbase-core`'s storage layer, generalized
// from a fire-and-forget job to one that can also carry a typed reply.

use crossbeam_channel::{bounded, Sender};
use std::thread;

type Job = Box<dyn FnOnce() + Send>;

pub struct TaskQueue {
    sender: Sender<Job>,
}

impl TaskQueue {
    /// `capacity` bounds how many submitted-but-not-yet-run jobs may sit
    /// in the lane before a caller's `submit`/`submit_detached` blocks -
    /// this is [`crate::config::EngineConfig::lane_capacity`].
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded::<Job>(capacity.max(1));
        thread::Builder::new()
            .name("mrview-task-queue".into())
            .spawn(move || {
                for job in receiver {
                    job();
                }
            })
            .expect("failed to spawn task queue worker thread");
        TaskQueue { sender }
    }

    /// Run `f` once every task submitted before it has completed, and
    /// block until `f` itself has completed. Submission races with other
    /// callers only over queue order, never over execution - the worker
    /// thread runs one job at a time (spec §4.6).
    pub fn submit<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = bounded(1);
        let job: Job = Box::new(move || {
            let _ = reply_tx.send(f());
        });
        self.sender.send(job).expect("task queue worker thread died");
        reply_rx.recv().expect("task queue worker dropped its reply")
    }

    /// Enqueue `f` without waiting for it to run. Used for the
    /// `update_after` background refresh: the caller already has its
    /// (possibly stale) answer and does not need to wait on this.
    pub fn submit_detached<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(f)).is_err() {
            crate::log_warn!("task queue worker thread is gone; dropping detached task");
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn submit_returns_the_closures_value() {
        let q = TaskQueue::new(16);
        assert_eq!(q.submit(|| 2 + 2), 4);
    }

    #[test]
    fn tasks_run_in_submission_order() {
        let q = TaskQueue::new(16);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..20 {
            let order = Arc::clone(&order);
            // Submitted from the same thread, sequentially - FIFO order
            // is guaranteed regardless of how long each job takes.
            handles.push(q.submit(move || {
                order.lock().push(i);
                i
            }));
        }
        assert_eq!(handles, (0..20).collect::<Vec<_>>());
        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn submit_detached_eventually_runs() {
        let q = TaskQueue::new(16);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        q.submit_detached(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        // A synchronous submit after it guarantees the detached job,
        // enqueued earlier, has already run by the time this returns.
        q.submit(|| ());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
