//! Observer lists.
//!
//! A [`Signal`] holds an ordered list of callbacks. Emitting a signal takes a snapshot of
//! the list and runs every callback that is still connected when its turn comes, so a
//! callback may connect or disconnect other callbacks (or itself) while the signal is
//! being emitted. Callbacks connected during an emission are first run by the next one.
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub(crate) type Slot<A> = Arc<dyn Fn(&A) + Send + Sync>;

struct Entry<A> {
    id: u64,
    active: Arc<AtomicBool>,
    slot: Slot<A>,
}

type Entries<A> = Mutex<Vec<Entry<A>>>;

pub(crate) struct Signal<A> {
    entries: Arc<Entries<A>>,
    next_id: AtomicU64,
}

impl<A: 'static> Signal<A> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn connect(&self, slot: Slot<A>) -> Connection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.entries.lock().push(Entry {
            id,
            active: active.clone(),
            slot,
        });
        let entries: Weak<Entries<A>> = Arc::downgrade(&self.entries);
        Connection {
            active,
            detach: Mutex::new(Some(Box::new(move || {
                if let Some(entries) = entries.upgrade() {
                    entries.lock().retain(|entry| entry.id != id);
                }
            }))),
        }
    }

    /// Runs every connected slot with `arg`. Returns how many ran.
    pub(crate) fn emit(&self, arg: &A) -> usize {
        let snapshot: Vec<(Arc<AtomicBool>, Slot<A>)> = self
            .entries
            .lock()
            .iter()
            .map(|entry| (entry.active.clone(), entry.slot.clone()))
            .collect();
        let mut invoked = 0;
        for (active, slot) in snapshot {
            if active.load(Ordering::Acquire) {
                slot(arg);
                invoked += 1;
            }
        }
        invoked
    }

    /// Drops every slot without running it.
    pub(crate) fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for entry in &entries {
            entry.active.store(false, Ordering::Release);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl<A> Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("slots", &self.entries.lock().len())
            .finish()
    }
}

/// Handle to a callback registered on a deferred, a promise or a context token.
///
/// Dropping the handle keeps the callback registered; call
/// [`disconnect`](Connection::disconnect) to remove it.
pub struct Connection {
    active: Arc<AtomicBool>,
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Connection {
    /// Removes the callback. A callback that has not run yet in an emission that is
    /// already in progress will not run.
    pub fn disconnect(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(detach) = self.detach.lock().take() {
            detach();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .finish()
    }
}
