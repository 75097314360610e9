//! The write side of an asynchronous operation.
//!
//! A [`Deferred`] starts [`Pending`](State::Pending) and is settled exactly once, by
//! [`resolve`](Deferred::resolve) or [`reject`](Deferred::reject). While pending it can be
//! [`notify`](Deferred::notify)-ed any number of times. Observers run synchronously on the
//! thread that settles or notifies, in the order they were registered.
//!
//! # Examples
//!
//! ```
//! use deferred_promise::{Deferred, State};
//! use std::thread;
//!
//! let (deferred, promise) = Deferred::with_promise();
//! let producer = thread::spawn(move || {
//!     deferred.notify(50);
//!     deferred.resolve("🍓")
//! });
//! assert!(producer.join().expect("The producer thread has panicked"));
//! assert_eq!(promise.state(), State::Resolved);
//! assert_eq!(promise.value().get::<String>().as_deref(), Some("🍓"));
//! ```
use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;
use tracing::{debug, error, warn};

use crate::child::Lineage;
use crate::signal::{Connection, Signal, Slot};
use crate::{Promise, Value};

/// Possible states of a [`Deferred`] or [`Promise`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// The outcome of the asynchronous operation has not been reported yet.
    #[default]
    Pending,
    /// The asynchronous operation completed successfully.
    Resolved,
    /// The asynchronous operation failed.
    Rejected,
}

impl State {
    pub fn is_settled(self) -> bool {
        self != State::Pending
    }

    fn as_str(self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Resolved => "resolved",
            State::Rejected => "rejected",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a deferred. Clones of a [`Deferred`] share it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeferredId(usize);

impl Debug for DeferredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Default)]
pub(crate) struct Cell {
    state: State,
    value: Value,
}

pub(crate) struct Inner {
    cell: ReentrantMutex<RefCell<Cell>>,
    in_signal_handler: AtomicUsize,
    log_invalid_action: AtomicBool,
    resolved: Signal<Value>,
    rejected: Signal<Value>,
    notified: Signal<Value>,
    destroyed: Signal<DeferredId>,
    lineage: Option<Arc<Lineage>>,
}

impl Inner {
    fn id(&self) -> DeferredId {
        DeferredId(self as *const Inner as usize)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let id = self.id();
        if self.in_signal_handler.swap(0, Ordering::AcqRel) > 0 {
            error!(deferred = ?id, "deferred destroyed as reaction to its own signal");
        }
        if self.cell.get_mut().get_mut().state == State::Pending {
            warn!(deferred = ?id, "deferred destroyed while still pending");
        }
        if let Some(lineage) = self.lineage.take() {
            lineage.detach_all();
        }
        self.destroyed.emit(&id);
    }
}

/// Communicates the outcome of an asynchronous operation.
///
/// This is a handle: clones refer to the same deferred, which lives as long as any
/// handle, any [`Promise`] on it or any child chained to it.
#[derive(Clone)]
pub struct Deferred {
    pub(crate) inner: Arc<Inner>,
}

impl Deferred {
    /// Creates a pending deferred.
    pub fn new() -> Self {
        Self::build(None)
    }

    pub(crate) fn with_lineage(lineage: Arc<Lineage>) -> Self {
        Self::build(Some(lineage))
    }

    fn build(lineage: Option<Arc<Lineage>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cell: ReentrantMutex::new(RefCell::new(Cell::default())),
                in_signal_handler: AtomicUsize::new(0),
                log_invalid_action: AtomicBool::new(true),
                resolved: Signal::new(),
                rejected: Signal::new(),
                notified: Signal::new(),
                destroyed: Signal::new(),
                lineage,
            }),
        }
    }

    /// Creates a deferred which is already resolved or rejected with `value`.
    /// [`State::Pending`] is treated like [`State::Resolved`].
    pub fn settled(state: State, value: impl Into<Value>) -> Self {
        let deferred = Self::new();
        match state {
            State::Rejected => deferred.reject(value),
            State::Resolved | State::Pending => deferred.resolve(value),
        };
        deferred
    }

    /// Creates a pending deferred together with the promise reading it.
    pub fn with_promise() -> (Self, Promise) {
        let deferred = Self::new();
        let promise = Promise::create(deferred.clone());
        (deferred, promise)
    }

    pub fn id(&self) -> DeferredId {
        self.inner.id()
    }

    pub fn state(&self) -> State {
        self.inner.cell.lock().borrow().state
    }

    /// The resolve value, the rejection reason, or null while pending.
    pub fn value(&self) -> Value {
        self.inner.cell.lock().borrow().value.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    /// Communicates success of the asynchronous operation.
    ///
    /// Returns `false`, and changes nothing, if the deferred was not pending.
    pub fn resolve(&self, value: impl Into<Value>) -> bool {
        self.settle(State::Resolved, value.into())
    }

    /// Communicates failure of the asynchronous operation.
    ///
    /// Returns `false`, and changes nothing, if the deferred was not pending.
    pub fn reject(&self, reason: impl Into<Value>) -> bool {
        self.settle(State::Rejected, reason.into())
    }

    /// Communicates progress of the asynchronous operation.
    ///
    /// Returns `false` if the deferred was not pending.
    pub fn notify(&self, progress: impl Into<Value>) -> bool {
        let progress = progress.into();
        let guard = self.inner.cell.lock();
        let state = guard.borrow().state;
        if state != State::Pending {
            self.log_invalid_action("notify", state);
            return false;
        }
        self.emit(&self.inner.notified, &progress);
        true
    }

    fn settle(&self, state: State, value: Value) -> bool {
        let guard = self.inner.cell.lock();
        let current = guard.borrow().state;
        if current != State::Pending {
            self.log_invalid_action(
                if state == State::Resolved { "resolve" } else { "reject" },
                current,
            );
            return false;
        }
        {
            let mut cell = guard.borrow_mut();
            cell.state = state;
            cell.value = value.clone();
        }
        let signal = match state {
            State::Rejected => &self.inner.rejected,
            State::Resolved | State::Pending => &self.inner.resolved,
        };
        self.emit(signal, &value);
        // Nothing can be emitted anymore.
        self.inner.resolved.clear();
        self.inner.rejected.clear();
        self.inner.notified.clear();
        drop(guard);
        if let Some(lineage) = &self.inner.lineage {
            lineage.release_parents(true);
        }
        true
    }

    fn emit(&self, signal: &Signal<Value>, value: &Value) {
        self.inner.in_signal_handler.fetch_add(1, Ordering::AcqRel);
        signal.emit(value);
        self.inner.in_signal_handler.fetch_sub(1, Ordering::AcqRel);
    }

    fn log_invalid_action(&self, action: &str, state: State) {
        if self.inner.log_invalid_action.load(Ordering::Relaxed) {
            debug!(deferred = ?self.id(), "cannot {action} deferred which is already {state}");
        }
    }

    /// Whether resolving, rejecting or notifying a settled deferred is logged. On by
    /// default.
    pub fn set_log_invalid_action(&self, enabled: bool) {
        self.inner.log_invalid_action.store(enabled, Ordering::Relaxed);
    }

    /// Runs `f` with the value every time this deferred is resolved (at most once).
    pub fn on_resolved<F>(&self, f: F) -> Connection
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.connect_resolved(Arc::new(f))
    }

    /// Runs `f` with the reason when this deferred is rejected.
    pub fn on_rejected<F>(&self, f: F) -> Connection
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.connect_rejected(Arc::new(f))
    }

    /// Runs `f` with every progress value passed to [`notify`](Self::notify).
    pub fn on_notified<F>(&self, f: F) -> Connection
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.connect_notified(Arc::new(f))
    }

    /// Runs `f` when the last handle to this deferred is gone.
    pub fn on_destroyed<F>(&self, f: F) -> Connection
    where
        F: Fn(DeferredId) + Send + Sync + 'static,
    {
        self.inner.destroyed.connect(Arc::new(move |id: &DeferredId| f(*id)))
    }

    pub(crate) fn connect_resolved(&self, slot: Slot<Value>) -> Connection {
        self.inner.resolved.connect(slot)
    }

    pub(crate) fn connect_rejected(&self, slot: Slot<Value>) -> Connection {
        self.inner.rejected.connect(slot)
    }

    pub(crate) fn connect_notified(&self, slot: Slot<Value>) -> Connection {
        self.inner.notified.connect(slot)
    }

    /// Holds this deferred's lock, so its state cannot change until the guard drops.
    /// Reentrant: the holder may still read, settle or notify.
    pub(crate) fn hold(&self) -> impl Sized + '_ {
        self.inner.cell.lock()
    }

    pub(crate) fn lineage(&self) -> Option<&Arc<Lineage>> {
        self.inner.lineage.as_ref()
    }

    pub(crate) fn downgrade(&self) -> WeakDeferred {
        WeakDeferred(Arc::downgrade(&self.inner))
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Deferred {}

impl Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("value", &self.value())
            .field(
                "observers",
                &(self.inner.resolved.len() + self.inner.rejected.len() + self.inner.notified.len()),
            )
            .finish()
    }
}

/// A non-owning reference to a deferred.
#[derive(Clone)]
pub(crate) struct WeakDeferred(Weak<Inner>);

impl WeakDeferred {
    pub(crate) fn upgrade(&self) -> Option<Deferred> {
        self.0.upgrade().map(|inner| Deferred { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Spies {
        resolved: Mutex<Vec<Value>>,
        rejected: Mutex<Vec<Value>>,
        notified: Mutex<Vec<Value>>,
    }

    fn spy(deferred: &Deferred) -> Arc<Spies> {
        let spies = Arc::new(Spies::default());
        let s = spies.clone();
        deferred.on_resolved(move |v| s.resolved.lock().push(v.clone()));
        let s = spies.clone();
        deferred.on_rejected(move |v| s.rejected.lock().push(v.clone()));
        let s = spies.clone();
        deferred.on_notified(move |v| s.notified.lock().push(v.clone()));
        spies
    }

    #[test]
    fn test_new_is_pending() {
        let deferred = Deferred::new();
        assert_eq!(deferred.state(), State::Pending);
        assert!(deferred.is_pending());
        assert!(deferred.value().is_null());
    }

    #[test]
    fn test_resolve() {
        let deferred = Deferred::new();
        let spies = spy(&deferred);

        assert!(deferred.resolve("myValue"));
        assert_eq!(deferred.state(), State::Resolved);
        assert_eq!(deferred.value(), Value::from("myValue"));
        assert_eq!(*spies.resolved.lock(), vec![Value::from("myValue")]);

        assert!(!deferred.notify("progress"));
        assert!(!deferred.reject("reason"));
        assert!(!deferred.resolve("other"));
        assert_eq!(deferred.value(), Value::from("myValue"));
        assert_eq!(deferred.state(), State::Resolved);
        assert_eq!(spies.resolved.lock().len(), 1);
        assert!(spies.rejected.lock().is_empty());
        assert!(spies.notified.lock().is_empty());
    }

    #[test]
    fn test_reject() {
        let deferred = Deferred::new();
        let spies = spy(&deferred);

        assert!(deferred.reject("reason"));
        assert_eq!(deferred.state(), State::Rejected);
        assert_eq!(deferred.value(), Value::from("reason"));

        assert!(!deferred.notify("progress"));
        assert!(!deferred.resolve("value"));
        assert_eq!(deferred.value(), Value::from("reason"));
        assert!(spies.resolved.lock().is_empty());
        assert_eq!(*spies.rejected.lock(), vec![Value::from("reason")]);
        assert!(spies.notified.lock().is_empty());
    }

    #[test]
    fn test_notify_in_call_order() {
        let deferred = Deferred::new();
        let spies = spy(&deferred);

        for step in 1..=3 {
            assert!(deferred.notify(step));
        }
        assert_eq!(deferred.state(), State::Pending);
        assert_eq!(
            *spies.notified.lock(),
            vec![Value::from(1), Value::from(2), Value::from(3)]
        );

        assert!(deferred.resolve(()));
        assert!(!deferred.notify(4));
        assert_eq!(spies.notified.lock().len(), 3);
    }

    #[test]
    fn test_settled() {
        let resolved = Deferred::settled(State::Resolved, 1);
        assert_eq!(resolved.state(), State::Resolved);
        assert_eq!(resolved.value(), Value::from(1));

        let rejected = Deferred::settled(State::Rejected, "err");
        assert_eq!(rejected.state(), State::Rejected);

        let pending_means_resolved = Deferred::settled(State::Pending, 2);
        assert_eq!(pending_means_resolved.state(), State::Resolved);
    }

    #[test]
    fn test_observer_may_read_state_reentrantly() {
        let deferred = Deferred::new();
        let seen = Arc::new(Mutex::new(None));
        let reader = deferred.clone();
        let s = seen.clone();
        deferred.on_resolved(move |_| *s.lock() = Some((reader.state(), reader.resolve("again"))));
        deferred.resolve("first");
        assert_eq!(*seen.lock(), Some((State::Resolved, false)));
    }

    #[test]
    fn test_disconnected_observer_is_not_invoked() {
        let deferred = Deferred::new();
        let spies = spy(&deferred);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let connection = deferred.on_resolved(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        connection.disconnect();
        deferred.resolve(());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(spies.resolved.lock().len(), 1);
    }

    #[test]
    fn test_destroyed_fires_with_identity() {
        let deferred = Deferred::new();
        let id = deferred.id();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        deferred.on_destroyed(move |gone| *s.lock() = Some(gone));
        let clone = deferred.clone();
        assert_eq!(clone, deferred);
        drop(deferred);
        assert!(seen.lock().is_none());
        clone.resolve(());
        drop(clone);
        assert_eq!(*seen.lock(), Some(id));
    }

    #[test]
    fn test_concurrent_settle_has_single_winner() {
        let deferred = Deferred::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let d = deferred.clone();
                std::thread::spawn(move || if i % 2 == 0 { d.resolve(i) } else { d.reject(i) })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("The settling thread has panicked"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(deferred.state().is_settled());
    }

    #[test]
    fn test_settling_releases_observers() {
        let deferred = Deferred::new();
        let captured = deferred.clone();
        let weak = deferred.downgrade();
        let connection = deferred.on_notified(move |_| {
            let _ = captured.state();
        });
        deferred.resolve(());
        assert!(!connection.is_connected());
        drop(deferred);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_weak_reference_does_not_keep_alive() {
        let deferred = Deferred::new();
        let weak = deferred.downgrade();
        assert!(weak.upgrade().is_some());
        deferred.resolve(());
        drop(deferred);
        assert!(weak.upgrade().is_none());
    }
}
