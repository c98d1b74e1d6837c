//! Fixed-capacity worker pool.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

/// Decrements `running` however the task ends.
struct RunningGuard(Arc<Counters>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounds the number of concurrently running tasks to `capacity`. Submitted
/// tasks beyond that wait (in submission order) for a free slot; the wait
/// queue itself is unbounded.
#[derive(Debug)]
pub struct WorkerPool {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            warn!("worker pool capacity of 0 requested, using 1");
            1
        } else {
            capacity
        };

        info!("Starting worker pool with {} slots", capacity);

        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            counters: Arc::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks waiting for a slot.
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.counters.running.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running tasks seen so far.
    pub fn peak_running(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Queue `task`; it starts once a slot is free. Never blocks the caller.
    pub fn submit<F>(&self, task: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let counters = self.counters.clone();
        counters.queued.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            counters.queued.fetch_sub(1, Ordering::SeqCst);

            // The semaphore is never closed while the pool is alive.
            let Ok(_permit) = permit else {
                return None;
            };

            let running = counters.running.fetch_add(1, Ordering::SeqCst) + 1;
            counters.peak.fetch_max(running, Ordering::SeqCst);
            let _running = RunningGuard(counters.clone());

            Some(task.await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_capacity() {
        for capacity in [1, 2, 3] {
            let pool = Arc::new(WorkerPool::new(capacity));
            let observed = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..12)
                .map(|_| {
                    let inner = pool.clone();
                    let observed = observed.clone();
                    pool.submit(async move {
                        observed.fetch_max(inner.running(), Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    })
                })
                .collect();

            for handle in handles {
                assert!(handle.await.unwrap().is_some());
            }

            assert!(pool.peak_running() <= capacity);
            assert!(observed.load(Ordering::SeqCst) <= capacity);
            assert_eq!(pool.peak_running(), capacity);
            assert_eq!(pool.running(), 0);
            assert_eq!(pool.queued(), 0);
        }
    }

    #[tokio::test]
    async fn submit_does_not_wait_for_a_slot() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let blocker = pool.submit(async move {
            let _ = rx.await;
        });
        let queued = pool.submit(async { 7 });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.running(), 1);
        assert_eq!(pool.queued(), 1);

        tx.send(()).unwrap();
        blocker.await.unwrap();
        assert_eq!(queued.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn slot_released_after_panic() {
        let pool = WorkerPool::new(1);

        let panicked = pool.submit(async { panic!("boom") });
        assert!(panicked.await.is_err());

        assert_eq!(pool.running(), 0);
        assert_eq!(pool.submit(async { 1 }).await.unwrap(), Some(1));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(WorkerPool::new(0).capacity(), 1);
    }
}
