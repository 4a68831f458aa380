use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rhai::Dynamic;

pub type TimerThunk = Box<dyn FnOnce() + Send>;

/// External timer collaborator: runs a zero-argument closure after a delay.
/// No cancellation handle; a thunk whose engine has been destroyed fizzles on
/// its own through the weak-reference check.
pub trait Timer: Send + Sync {
    fn register_delayed_callback(&self, delay: Duration, thunk: TimerThunk);
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    thunk: TimerThunk,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // BinaryHeap is a max-heap; invert so the earliest deadline surfaces
    // first, with registration order breaking ties.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerShared {
    queue: Mutex<TimerQueue>,
    wakeup: Condvar,
    shutdown: AtomicBool,
}

struct TimerQueue {
    entries: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

/// Worker-thread timer: a deadline heap drained by a single thread that
/// sleeps until the next due entry. Thunks run on the worker thread, outside
/// the queue lock, so a thunk may register further timers.
pub struct DefaultTimer {
    shared: Arc<TimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DefaultTimer {
    pub fn new() -> Self {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(TimerQueue { entries: BinaryHeap::new(), next_seq: 0 }),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || run_worker(&worker_shared));
        DefaultTimer { shared, worker: Mutex::new(Some(worker)) }
    }
}

impl Default for DefaultTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for DefaultTimer {
    fn register_delayed_callback(&self, delay: Duration, thunk: TimerThunk) {
        {
            let mut queue = self.shared.queue.lock();
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.entries.push(TimerEntry { deadline: Instant::now() + delay, seq, thunk });
        }
        self.shared.wakeup.notify_one();
    }
}

impl Drop for DefaultTimer {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, AtomicOrdering::SeqCst);
        self.shared.wakeup.notify_one();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(shared: &TimerShared) {
    loop {
        let mut queue = shared.queue.lock();
        if shared.shutdown.load(AtomicOrdering::SeqCst) {
            return;
        }
        let now = Instant::now();
        match queue.entries.peek().map(|entry| entry.deadline) {
            None => {
                shared.wakeup.wait(&mut queue);
            }
            Some(deadline) if deadline > now => {
                shared.wakeup.wait_until(&mut queue, deadline);
            }
            Some(_) => {
                if let Some(entry) = queue.entries.pop() {
                    drop(queue);
                    (entry.thunk)();
                }
            }
        }
    }
}

/// Convenience constructor mirroring the host-facing factory.
pub fn create_default_timer() -> Arc<dyn Timer> {
    Arc::new(DefaultTimer::new())
}

/// A deferred callback invocation owned by the registry: the callable first
/// argument plus every scheduling argument, persisted as owned values so they
/// stay valid outside any execution-context scope.
pub(crate) struct TimerTask {
    pub(crate) arguments: Vec<Dynamic>,
}

#[derive(Default)]
pub(crate) struct TimerTaskRegistry {
    tasks: HashMap<u64, TimerTask>,
    next_token: u64,
}

impl TimerTaskRegistry {
    /// Registers a task and hands back its stable token.
    pub(crate) fn insert(&mut self, task: TimerTask) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.tasks.insert(token, task);
        token
    }

    /// Removes and returns the task; a second take of the same token yields
    /// nothing, which is what makes removal exactly-once.
    pub(crate) fn take(&mut self, token: u64) -> Option<TimerTask> {
        self.tasks.remove(&token)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }
}
