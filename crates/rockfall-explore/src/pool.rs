//! Fixed pool of long-lived solver workers.
//!
//! A worker is FREE until a job is submitted (BUSY), RUNNING while
//! the job executes, then FREE again.  The main thread acquires a
//! free worker, writes that worker's per-thread query file, submits,
//! and finally drains the pool with [`WorkerPool::wait_all`] — which
//! is the happens-before edge before the iteration's results are
//! read.  Bounding the pool to the configured solver parallelism is
//! the point: a thread per query would fork thousands.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// Worker lifecycle word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Free,
    Busy,
    Running,
}

/// A job receives the worker's 1-based thread id (used for artefact
/// suffixes and child-pid slots).
type Job = Box<dyn FnOnce(usize) + Send + 'static>;

struct Slot {
    status: WorkerStatus,
    job: Option<Job>,
}

struct PoolState {
    slots: Vec<Slot>,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// Signalled when a job is submitted (workers wait here).
    job_ready: Condvar,
    /// Signalled when a worker becomes FREE (the main thread waits
    /// here).
    completion: Condvar,
}

/// The pool.  Dropping it joins all workers.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers.  Panics on `size == 0`; a zero-thread
    /// configuration means the caller should not build a pool at all.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "worker pool needs at least one thread");
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                slots: (0..size)
                    .map(|_| Slot {
                        status: WorkerStatus::Free,
                        job: None,
                    })
                    .collect(),
                shutdown: false,
            }),
            job_ready: Condvar::new(),
            completion: Condvar::new(),
        });
        let handles = (0..size)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("solver-worker-{}", index + 1))
                    .spawn(move || worker_loop(shared, index))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self { shared, handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Block until some worker is FREE and return its index.
    pub fn acquire_free(&self) -> usize {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(i) = state
                .slots
                .iter()
                .position(|s| s.status == WorkerStatus::Free)
            {
                return i;
            }
            state = self.shared.completion.wait(state).unwrap();
        }
    }

    /// Hand a job to worker `index`, which must be FREE (i.e. was
    /// just returned by [`acquire_free`](Self::acquire_free)).
    pub fn submit(&self, index: usize, job: impl FnOnce(usize) + Send + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        let slot = &mut state.slots[index];
        assert_eq!(slot.status, WorkerStatus::Free, "worker {index} not free");
        slot.status = WorkerStatus::Busy;
        slot.job = Some(Box::new(job));
        self.shared.job_ready.notify_all();
    }

    /// Block until every worker is FREE again.
    pub fn wait_all(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state
            .slots
            .iter()
            .any(|s| s.status != WorkerStatus::Free)
        {
            state = self.shared.completion.wait(state).unwrap();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            self.shared.job_ready.notify_all();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>, index: usize) {
    let thread_id = index + 1;
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.shutdown {
            return;
        }
        if state.slots[index].status == WorkerStatus::Busy {
            let job = state.slots[index].job.take().expect("busy slot without job");
            state.slots[index].status = WorkerStatus::Running;
            drop(state);

            job(thread_id);

            state = shared.state.lock().unwrap();
            state.slots[index].status = WorkerStatus::Free;
            shared.completion.notify_all();
        } else {
            state = shared.job_ready.wait(state).unwrap();
        }
    }
}
