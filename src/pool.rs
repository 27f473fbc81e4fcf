//! Fixed-size worker pool with a single FIFO queue.
//!
//! # Architecture
//!
//! ```text
//!   producer thread ──submit──┐                       ┌──► worker 0 ──► callback(unit)
//!   (waits for a free worker) │   Mutex<State>        │
//!                             ├──► VecDeque<T> ───────┼──► worker 1 ──► callback(unit)
//!   worker threads ───submit──┘   pills, free_workers │
//!   (never wait)                                      └──► worker N ──► callback(unit)
//!
//!   Condvars: work_available (queue or pill pushed)
//!             worker_idle    (a worker finished a unit or exited)
//! ```
//!
//! # Correctness Invariants
//!
//! - **Drain before exit**: a worker takes a poison pill only when the queue
//!   is empty, so units submitted by workers while the pool is joining still
//!   run. Every submitted unit runs exactly once.
//! - **Producer backpressure**: the thread that created the pool waits in
//!   `submit` until the queue holds fewer units than there are idle workers.
//!   Workers never wait in `submit` (all of them could be blocked).
//! - **Panic isolation**: a panicking callback is caught in the worker, the
//!   first payload is stored, and `join` re-raises it on the caller.
//! - **Join on drop**: dropping an un-joined pool joins it, except on one of
//!   its own workers, where it only signals the workers to exit.

use std::any::Any;
use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Pool counters. Exact once the pool is joined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub threads: usize,
    pub submitted: u64,
    pub completed: u64,
    /// Callbacks that panicked.
    pub panics: u64,
    /// Times the producer thread blocked waiting for an idle worker.
    pub producer_waits: u64,
}

struct State<T> {
    queue: VecDeque<T>,
    /// Poison pills not yet consumed.
    pills: usize,
    /// Workers not currently running a unit.
    free_workers: usize,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    work_available: Condvar,
    worker_idle: Condvar,
    live: AtomicUsize,
    callback: Box<dyn Fn(T) + Send + Sync>,
    panic: Mutex<Option<Box<dyn Any + Send + 'static>>>,
    submitted: AtomicU64,
    completed: AtomicU64,
    panics: AtomicU64,
    producer_waits: AtomicU64,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().expect("pool state poisoned")
    }

    fn record_panic(&self, payload: Box<dyn Any + Send + 'static>) {
        self.panics.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.panic.lock().expect("panic mutex poisoned");
        if guard.is_none() {
            *guard = Some(payload);
        }
    }
}

/// A fixed set of worker threads running one callback over submitted units.
pub struct ThreadPool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    producer: ThreadId,
    threads: usize,
    poll_interval: Duration,
}

impl<T: Send + 'static> ThreadPool<T> {
    /// Spawns `threads` workers named `{name}-{i}` that pass every unit to
    /// `callback`. The calling thread becomes the producer thread.
    ///
    /// `poll_interval` is the sleep between liveness checks in
    /// [`join`](Self::join).
    pub fn new<F>(threads: usize, name: &str, poll_interval: Duration, callback: F) -> io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                pills: 0,
                free_workers: 0,
                closed: false,
            }),
            work_available: Condvar::new(),
            worker_idle: Condvar::new(),
            live: AtomicUsize::new(0),
            callback: Box::new(callback),
            panic: Mutex::new(None),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            panics: AtomicU64::new(0),
            producer_waits: AtomicU64::new(0),
        });

        let pool = Self {
            shared,
            handles: Mutex::new(Vec::with_capacity(threads)),
            producer: thread::current().id(),
            threads,
            poll_interval,
        };
        for i in 0..threads {
            let shared = Arc::clone(&pool.shared);
            pool.shared.live.fetch_add(1, Ordering::AcqRel);
            pool.shared.lock().free_workers += 1;
            let spawned = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || worker_loop(&shared));
            match spawned {
                Ok(handle) => pool.handles.lock().expect("pool handles poisoned").push(handle),
                Err(e) => {
                    pool.shared.live.fetch_sub(1, Ordering::AcqRel);
                    pool.shared.lock().free_workers -= 1;
                    // Dropping `pool` joins the workers already started.
                    return Err(e);
                }
            }
        }
        debug!(threads, name, "thread pool started");
        Ok(pool)
    }

    /// Queues `unit`. Returns it back when the pool is already closed.
    ///
    /// On the producer thread this first waits until an idle worker is
    /// available for the unit.
    pub fn submit(&self, unit: T) -> Result<(), T> {
        let on_worker = self.on_worker_thread();
        let mut st = self.shared.lock();
        if !on_worker && thread::current().id() == self.producer {
            let mut waited = false;
            while !st.closed && st.queue.len() >= st.free_workers {
                waited = true;
                st = self
                    .shared
                    .worker_idle
                    .wait(st)
                    .expect("pool state poisoned");
            }
            if waited {
                self.shared.producer_waits.fetch_add(1, Ordering::Relaxed);
            }
        }
        if st.closed && !on_worker {
            return Err(unit);
        }
        st.queue.push_back(unit);
        drop(st);
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Units waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Workers that have not exited.
    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Workers not currently running a unit.
    pub fn free_workers(&self) -> usize {
        self.shared.lock().free_workers
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            threads: self.threads,
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            panics: self.shared.panics.load(Ordering::Relaxed),
            producer_waits: self.shared.producer_waits.load(Ordering::Relaxed),
        }
    }

    /// Drains the queue, stops every worker and joins them.
    ///
    /// Idempotent. Submissions from outside the pool are refused from the
    /// moment `join` starts; units workers submit while draining still run.
    ///
    /// # Panics
    ///
    /// Re-raises the first panic caught in a worker.
    pub fn join(&self) -> PoolStats {
        self.stop_and_wait();
        if let Some(p) = self
            .shared
            .panic
            .lock()
            .expect("panic mutex poisoned")
            .take()
        {
            panic::resume_unwind(p);
        }
        self.stats()
    }

    /// Close the queue to outside producers and hand each live worker a pill.
    fn signal_stop(&self) {
        let mut st = self.shared.lock();
        if !st.closed {
            st.closed = true;
            st.pills += self.shared.live.load(Ordering::Acquire);
        }
        drop(st);
        self.shared.work_available.notify_all();
        self.shared.worker_idle.notify_all();
    }

    fn stop_and_wait(&self) {
        self.signal_stop();
        while self.shared.live.load(Ordering::Acquire) > 0 {
            thread::sleep(self.poll_interval);
        }
        let handles = std::mem::take(&mut *self.handles.lock().expect("pool handles poisoned"));
        for h in handles {
            if let Err(p) = h.join() {
                self.shared.record_panic(p);
            }
        }
        debug!(stats = ?self.stats(), "thread pool joined");
    }

    /// True when called from one of this pool's workers.
    fn on_worker_thread(&self) -> bool {
        let me = Arc::as_ptr(&self.shared) as *const () as usize;
        WORKER_OF.with(|w| w.get() == me)
    }
}

impl<T: Send + 'static> Drop for ThreadPool<T> {
    fn drop(&mut self) {
        if self.on_worker_thread() {
            // Joining ourselves would deadlock; the workers exit on their own.
            self.signal_stop();
            return;
        }
        if !self.handles.get_mut().map(|h| h.is_empty()).unwrap_or(true) {
            self.stop_and_wait();
        }
    }
}

thread_local! {
    /// Address of the pool state the current thread works for (0: none).
    static WORKER_OF: Cell<usize> = const { Cell::new(0) };
}

fn worker_loop<T>(shared: &Shared<T>) {
    WORKER_OF.with(|w| w.set(shared as *const Shared<T> as *const () as usize));
    loop {
        let unit = {
            let mut st = shared.lock();
            while st.queue.is_empty() && st.pills == 0 {
                st = shared
                    .work_available
                    .wait(st)
                    .expect("pool state poisoned");
            }
            st.free_workers -= 1;
            match st.queue.pop_front() {
                Some(unit) => unit,
                None => {
                    st.pills -= 1;
                    drop(st);
                    shared.live.fetch_sub(1, Ordering::AcqRel);
                    shared.worker_idle.notify_all();
                    trace!("worker exiting");
                    return;
                }
            }
        };

        if let Err(p) = panic::catch_unwind(AssertUnwindSafe(|| (shared.callback)(unit))) {
            shared.record_panic(p);
        }
        shared.completed.fetch_add(1, Ordering::Relaxed);

        shared.lock().free_workers += 1;
        shared.worker_idle.notify_all();
    }
}
