//! Worker thread pool with pollable task handles.
//!
//! Latency-sensitive callers (the audio thread) submit slow work here and
//! poll for completion instead of blocking. A task is any `FnOnce` producing
//! a `Send` value; the value is parked in the handle until the submitter
//! takes it. Dropping the handle abandons the task: the worker still runs it
//! to completion, the result is simply discarded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared state between the pool front-end and its workers.
struct SharedPoolState {
    queue: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    stop_flag: AtomicBool,
}

/// Result slot shared between a worker and a [`TaskHandle`].
struct TaskState<T> {
    done: AtomicBool,
    value: Mutex<Option<T>>,
}

/// Handle to a submitted task.
///
/// `is_complete` is cheap enough to call once per audio step. `try_take`
/// returns the value exactly once; later calls return `None`.
pub struct TaskHandle<T> {
    state: Arc<TaskState<T>>,
}

impl<T> TaskHandle<T> {
    pub fn is_complete(&self) -> bool {
        self.state.done.load(Ordering::Acquire)
    }

    pub fn try_take(&self) -> Option<T> {
        if !self.is_complete() {
            return None;
        }
        self.state.value.lock().ok()?.take()
    }
}

/// Fixed-size worker pool.
pub struct ThreadPool {
    state: Arc<SharedPoolState>,
    threads: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn a pool with `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Self {
        let state = Arc::new(SharedPoolState {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            stop_flag: AtomicBool::new(false),
        });

        let num_threads = num_threads.max(1);
        let mut threads = Vec::with_capacity(num_threads);
        for worker_id in 0..num_threads {
            let state = Arc::clone(&state);
            threads.push(thread::spawn(move || Self::worker_loop(worker_id, state)));
        }

        info!("Thread pool started with {} worker threads", num_threads);
        Self { state, threads }
    }

    /// Submit work to any worker. Returns a handle the caller polls.
    pub fn submit<T, F>(&self, job: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let task_state = Arc::new(TaskState {
            done: AtomicBool::new(false),
            value: Mutex::new(None),
        });

        let worker_state = Arc::clone(&task_state);
        let wrapped: Job = Box::new(move || {
            let value = job();
            if let Ok(mut slot) = worker_state.value.lock() {
                *slot = Some(value);
            }
            worker_state.done.store(true, Ordering::Release);
        });

        {
            let mut queue = self.state.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.push_back(wrapped);
        }
        self.state.condvar.notify_one();

        TaskHandle { state: task_state }
    }

    /// Stop the workers and join them. Queued jobs that have not started
    /// are dropped; running jobs finish first.
    pub fn shutdown(&mut self) {
        if self.state.stop_flag.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.condvar.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        debug!("Thread pool stopped");
    }

    fn worker_loop(worker_id: usize, state: Arc<SharedPoolState>) {
        debug!("Worker {} started", worker_id);
        loop {
            let job = {
                let mut queue = state.queue.lock().unwrap_or_else(|e| e.into_inner());
                loop {
                    if state.stop_flag.load(Ordering::SeqCst) {
                        debug!("Worker {} stopping", worker_id);
                        return;
                    }
                    if let Some(job) = queue.pop_front() {
                        break job;
                    }
                    queue = state
                        .condvar
                        .wait(queue)
                        .unwrap_or_else(|e| e.into_inner());
                }
            };
            job();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
