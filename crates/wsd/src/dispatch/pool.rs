// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-size worker pool fed by a crossbeam channel.
//!
//! Jobs are typed closures. A panicking job is caught and counted; the
//! worker keeps serving the queue.

use crate::error::{DiscoveryError, DiscoveryResult};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Unit of work run on a pool thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    panics: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Spawn `threads` workers named `{name}-{index}`.
    ///
    /// # Errors
    /// Returns IO error if a thread cannot be spawned.
    pub fn new(name: &str, threads: usize) -> io::Result<Self> {
        let (tx, rx) = channel::unbounded::<Job>();
        let panics = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let rx = rx.clone();
            let panics = Arc::clone(&panics);
            let thread_name = format!("{}-{}", name, index);
            let handle = std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || Self::run_worker(&thread_name, &rx, &panics))?;
            workers.push(handle);
        }

        Ok(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            panics,
        })
    }

    fn run_worker(name: &str, rx: &Receiver<Job>, panics: &AtomicU64) {
        while let Ok(job) = rx.recv() {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                panics.fetch_add(1, Ordering::Relaxed);
                log::error!("[POOL] job panicked on {}", name);
            }
        }
        log::trace!("[POOL] {} exiting", name);
    }

    /// Queue a job.
    ///
    /// # Errors
    /// [`DiscoveryError::Shutdown`] once the pool has been shut down.
    pub fn submit<F>(&self, job: F) -> DiscoveryResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(DiscoveryError::Shutdown)?;
        sender
            .send(Box::new(job))
            .map_err(|_| DiscoveryError::Shutdown)
    }

    /// Jobs that panicked so far.
    pub fn panics(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close the queue and join the workers.
    ///
    /// Jobs already queued still run. Safe to call more than once, and from a
    /// pool thread (that thread is not joined).
    pub fn shutdown(&self) {
        self.sender.lock().take();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let current = std::thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::warn!("[POOL] {} worker terminated abnormally", self.name);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_runs_jobs() {
        let pool = WorkerPool::new("wsd-test", 2).unwrap();
        let (tx, rx) = channel::unbounded();
        for i in 0..10 {
            let tx = tx.clone();
            pool.submit(move || {
                let _ = tx.send(i);
            })
            .unwrap();
        }
        let mut got: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        got.sort_unstable();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_panic_isolated() {
        let pool = WorkerPool::new("wsd-panic", 1).unwrap();
        let (tx, rx) = channel::unbounded();
        pool.submit(|| panic!("listener blew up")).unwrap();
        pool.submit(move || {
            let _ = tx.send("still alive");
        })
        .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "still alive");
        assert_eq!(pool.panics(), 1);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new("wsd-closed", 1).unwrap();
        pool.shutdown();
        assert!(matches!(pool.submit(|| {}), Err(DiscoveryError::Shutdown)));
        pool.shutdown();
    }
}
