//! Asynchronous completion executor
//!
//! When a binding delivers completions from its own I/O threads, running the
//! measurement bookkeeping inline can contend with completion dispatch under
//! high concurrency. The executor makes that choice explicit: completions
//! run either inline on the binding's thread or on a fixed-size dedicated
//! pool fed through a crossbeam channel.

use crossbeam::channel::{self, Sender};
use std::thread::{self, JoinHandle};

/// A queued completion job.
pub type Job = Box<dyn FnOnce() + Send>;

/// Where asynchronous completion callbacks run.
#[derive(Debug)]
pub enum CompletionExecutor {
    /// Run the callback on the binding's own completion thread
    Inline,
    /// Ship the callback to a dedicated fixed-size pool
    Dedicated(CompletionPool),
}

impl CompletionExecutor {
    /// Build the executor from configuration: `Some(n)` selects a dedicated
    /// pool with `n` threads, `None` selects inline execution.
    pub fn from_config(dedicated_threads: Option<usize>) -> Self {
        match dedicated_threads {
            Some(threads) => CompletionExecutor::Dedicated(CompletionPool::new(threads)),
            None => CompletionExecutor::Inline,
        }
    }
}

/// Fixed-size thread pool draining completion jobs in submission order.
#[derive(Debug)]
pub struct CompletionPool {
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl CompletionPool {
    /// Spawn a pool with `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = channel::unbounded::<Job>();
        let handles = (0..threads)
            .map(|index| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("completion-{index}"))
                    .spawn(move || {
                        for job in receiver.iter() {
                            job();
                        }
                    })
                    .expect("failed to spawn completion thread")
            })
            .collect();
        tracing::debug!(threads, "dedicated completion pool started");
        Self {
            sender: Some(sender),
            handles,
        }
    }

    /// Queue a completion job.
    pub fn execute(&self, job: Job) {
        if let Some(sender) = &self.sender {
            // Receivers only disappear on drop, so send cannot fail here
            let _ = sender.send(job);
        }
    }

    /// Number of pool threads.
    pub fn threads(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for CompletionPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain outstanding jobs and exit
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_pool_runs_all_jobs() {
        let pool = CompletionPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        drop(pool); // joins workers after draining

        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_pool_has_at_least_one_thread() {
        let pool = CompletionPool::new(0);
        assert_eq!(pool.threads(), 1);
    }

    #[test]
    fn test_from_config() {
        assert!(matches!(
            CompletionExecutor::from_config(None),
            CompletionExecutor::Inline
        ));
        match CompletionExecutor::from_config(Some(3)) {
            CompletionExecutor::Dedicated(pool) => assert_eq!(pool.threads(), 3),
            CompletionExecutor::Inline => panic!("expected dedicated pool"),
        }
    }
}
