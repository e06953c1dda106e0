//! Blocking-I/O executor.
//!
//! Syscalls never run on the async scheduler: the coordinator submits
//! closures to this dedicated pool and awaits their results. `run`
//! bodies may execute concurrently with each other; `run_exclusive`
//! bodies execute with no other operation in flight.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;

use crate::config::{IoPoolPriority, StoreOptions};
use crate::error::{Result, WaxError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Thread pool executing blocking closures for the coordinator.
#[derive(Debug)]
pub struct IoExecutor {
    sender: Option<Sender<Job>>,
    gate: Arc<RwLock<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl IoExecutor {
    /// Spawns the pool. Thread names carry the configured label so
    /// blocked I/O shows up attributably in thread dumps.
    pub fn new(options: &StoreOptions) -> Result<Self> {
        let threads = num_cpus::get().clamp(2, 8);
        let (sender, receiver): (Sender<Job>, Receiver<Job>) = crossbeam_channel::unbounded();
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let name = format!("{}-{index}", options.io_thread_pool_label);
            let handle = std::thread::Builder::new()
                .name(name)
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })
                .map_err(WaxError::from)?;
            workers.push(handle);
        }
        if options.io_thread_pool_priority == IoPoolPriority::Background {
            tracing::debug!(
                label = %options.io_thread_pool_label,
                "io pool runs at background priority (advisory)"
            );
        }
        Ok(Self {
            sender: Some(sender),
            gate: Arc::new(RwLock::new(())),
            workers,
        })
    }

    fn submit(&self, job: Job) -> Result<()> {
        self.sender
            .as_ref()
            .ok_or(WaxError::ExecutorShutdown)?
            .send(job)
            .map_err(|_| WaxError::ExecutorShutdown)
    }

    /// Runs `body` on the pool; may overlap with other `run` bodies.
    pub async fn run<T, F>(&self, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let gate = Arc::clone(&self.gate);
        self.submit(Box::new(move || {
            let _shared = gate.read();
            let _ = tx.send(body());
        }))?;
        rx.await.map_err(|_| WaxError::ExecutorShutdown)
    }

    /// Fire-and-forget variant of [`IoExecutor::run_exclusive`]; used
    /// where the caller cannot await (e.g. drop paths).
    pub fn spawn_exclusive<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let gate = Arc::clone(&self.gate);
        self.submit(Box::new(move || {
            let _exclusive = gate.write();
            body();
        }))
    }

    /// Runs `body` with no other pool operation in flight.
    pub async fn run_exclusive<T, F>(&self, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let gate = Arc::clone(&self.gate);
        self.submit(Box::new(move || {
            let _exclusive = gate.write();
            let _ = tx.send(body());
        }))?;
        rx.await.map_err(|_| WaxError::ExecutorShutdown)
    }
}

impl Drop for IoExecutor {
    fn drop(&mut self) {
        // Closing the channel drains the workers.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn executor() -> IoExecutor {
        IoExecutor::new(&StoreOptions::default()).expect("pool")
    }

    #[tokio::test]
    async fn run_returns_the_body_result() {
        let pool = executor();
        let out = pool.run(|| 21 * 2).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn concurrent_runs_overlap() {
        let pool = Arc::new(executor());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) >= 2, "reads should overlap");
    }

    #[tokio::test]
    async fn exclusive_runs_alone() {
        let pool = Arc::new(executor());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let clash = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for index in 0..6 {
            let pool = Arc::clone(&pool);
            let in_flight = Arc::clone(&in_flight);
            let clash = Arc::clone(&clash);
            handles.push(tokio::spawn(async move {
                if index % 2 == 0 {
                    pool.run(move || {
                        in_flight.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(10));
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
                } else {
                    pool.run_exclusive(move || {
                        if in_flight.load(Ordering::SeqCst) != 0 {
                            clash.fetch_add(1, Ordering::SeqCst);
                        }
                        std::thread::sleep(Duration::from_millis(10));
                    })
                    .await
                    .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(clash.load(Ordering::SeqCst), 0, "exclusive ran alongside a read");
    }
}
