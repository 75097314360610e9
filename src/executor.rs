//! Posting work to "the next tick".
//!
//! Several operations must not act inline: releasing the parents of a settled
//! [`ChildDeferred`](crate::ChildDeferred), dropping a promise from a
//! [`PromiseSitter`](crate::PromiseSitter) once it settled, counting parents that were
//! already settled when result tracking started, and the delayed settlement of
//! [`Promise::delayed_resolve`](crate::Promise::delayed_resolve). All of them go through
//! an [`Executor`].
//!
//! The crate never creates threads. By default tasks are queued on
//! [`EventLoop::main`], which the application pumps with
//! [`EventLoop::process_events`] or [`EventLoop::run_until`]. Until it is pumped, queued
//! tasks keep whatever they captured alive, such as the parents of settled links. A
//! different executor can be installed once per process with [`install`]. With the
//! `tokio` feature, [`TokioExecutor`] spawns the tasks on a tokio runtime instead, and
//! [`current`] picks it on its own when called from inside a runtime and nothing was
//! installed.
//!
//! # Examples
//!
//! ```
//! use deferred_promise::executor::{EventLoop, Executor};
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new();
//! let ran = Arc::new(AtomicBool::new(false));
//! let flag = ran.clone();
//! event_loop.post(Duration::ZERO, Box::new(move || flag.store(true, Ordering::SeqCst)));
//! assert!(!ran.load(Ordering::SeqCst));
//! assert_eq!(event_loop.process_events(), 1);
//! assert!(ran.load(Ordering::SeqCst));
//! ```
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt::{self, Debug};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::Error;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks "later": never inline from within `post`.
pub trait Executor: Send + Sync {
    /// Schedules `task` to run once `delay` has elapsed. A zero delay means "as soon as
    /// control returns to whoever drives this executor". Posted tasks cannot be
    /// withdrawn.
    fn post(&self, delay: Duration, task: Task);
}

static INSTALLED: OnceLock<Arc<dyn Executor>> = OnceLock::new();

/// Installs the process-wide default executor.
///
/// Only the first call succeeds; later ones return [`Error::ExecutorAlreadyInstalled`].
/// Tasks posted before the install stay where they were posted.
pub fn install(executor: Arc<dyn Executor>) -> Result<(), Error> {
    INSTALLED
        .set(executor)
        .map_err(|_| Error::ExecutorAlreadyInstalled)
}

/// The process-wide default executor.
///
/// This is the installed executor if there is one. Otherwise, with the `tokio` feature
/// and a runtime entered on the calling thread, it is a [`TokioExecutor`] on that
/// runtime. Otherwise it is [`EventLoop::main`].
pub fn current() -> Arc<dyn Executor> {
    if let Some(installed) = INSTALLED.get() {
        return installed.clone();
    }
    #[cfg(feature = "tokio")]
    {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            return Arc::new(TokioExecutor::new(handle));
        }
    }
    EventLoop::main()
}

/// Queue length at which an unpumped [`EventLoop`] logs a warning.
const BACKLOG_WARNING: usize = 1024;

struct Scheduled {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // BinaryHeap is a max-heap; the earliest deadline (then the lowest seq) must win.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
    // Set once the backlog warning fired; cleared by process_events.
    warned: bool,
}

/// A manually driven timer queue.
///
/// Tasks run on whichever thread calls [`process_events`](EventLoop::process_events).
pub struct EventLoop {
    queue: Mutex<Queue>,
    posted: Condvar,
}

impl EventLoop {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(Queue::default()),
            posted: Condvar::new(),
        })
    }

    /// The loop backing [`current`] unless another executor was installed.
    pub fn main() -> Arc<Self> {
        static MAIN: OnceLock<Arc<EventLoop>> = OnceLock::new();
        MAIN.get_or_init(EventLoop::new).clone()
    }

    /// Runs every task that was due when the call started. Tasks posted while processing
    /// are left for the next call. Returns the number of tasks run.
    pub fn process_events(&self) -> usize {
        let now = Instant::now();
        let horizon = {
            let mut queue = self.queue.lock();
            queue.warned = false;
            queue.next_seq
        };
        let mut ran = 0;
        loop {
            let task = {
                let mut queue = self.queue.lock();
                match queue.heap.peek() {
                    Some(next) if next.due <= now && next.seq < horizon => queue.heap.pop(),
                    _ => None,
                }
            };
            match task {
                Some(scheduled) => {
                    (scheduled.task)();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }

    /// Processes events until `done` returns `true` or `timeout` elapses, sleeping until
    /// the next deadline or the next post in between. Returns the final `done()`.
    pub fn run_until(&self, mut done: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_events();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let mut queue = self.queue.lock();
            let wake_at = queue
                .heap
                .peek()
                .map_or(deadline, |next| next.due.min(deadline));
            if wake_at > now {
                self.posted.wait_until(&mut queue, wake_at);
            }
        }
    }

    /// Number of queued tasks, due or not.
    pub fn pending(&self) -> usize {
        self.queue.lock().heap.len()
    }
}

impl Executor for EventLoop {
    fn post(&self, delay: Duration, task: Task) {
        let mut queue = self.queue.lock();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Scheduled {
            due: Instant::now() + delay,
            seq,
            task,
        });
        let backlog = queue.heap.len();
        let warn_now = backlog >= BACKLOG_WARNING && !queue.warned;
        queue.warned |= warn_now;
        drop(queue);
        if warn_now {
            warn!(
                pending = backlog,
                "event loop backlog keeps growing, is anything calling process_events?"
            );
        }
        self.posted.notify_all();
    }
}

impl Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(feature = "tokio")]
pub use tokio_executor::TokioExecutor;

#[cfg(feature = "tokio")]
mod tokio_executor {
    use super::{Executor, Task};
    use std::time::Duration;
    use tokio::runtime::Handle;

    /// Spawns posted tasks on a tokio runtime.
    #[derive(Debug, Clone)]
    pub struct TokioExecutor {
        handle: Handle,
    }

    impl TokioExecutor {
        pub fn new(handle: Handle) -> Self {
            Self { handle }
        }

        /// Uses the runtime the caller is running in.
        ///
        /// # Panics
        ///
        /// When called outside of a tokio runtime.
        pub fn current() -> Self {
            Self::new(Handle::current())
        }
    }

    impl Executor for TokioExecutor {
        fn post(&self, delay: Duration, task: Task) {
            self.handle.spawn(async move {
                if delay.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(delay).await;
                }
                task();
            });
        }
    }
}
