//! Keeping "fire and forget" promises alive.
//!
//! A promise chain lives only as long as someone holds its tail. When nothing else
//! would, hand the tail to a [`PromiseSitter`]: it holds the promise until it settles,
//! until it is removed, or until one of the [`ContextToken`]s it was added with is gone.
//!
//! # Examples
//!
//! ```
//! use deferred_promise::executor::EventLoop;
//! use deferred_promise::{Deferred, PromiseSitter};
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new();
//! let sitter = PromiseSitter::with_executor(event_loop.clone());
//! let (deferred, promise) = Deferred::with_promise();
//!
//! sitter.add(&promise.then(|value| println!("got {value:?}")), &[]);
//! assert_eq!(sitter.len(), 1);
//!
//! deferred.resolve("🍓");
//! assert!(event_loop.run_until(|| sitter.is_empty(), Duration::from_secs(1)));
//! ```
use std::collections::hash_map::{Entry as MapEntry, HashMap};
use std::fmt::{self, Debug};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::trace;

use crate::executor::{self, Executor};
use crate::promise::PromiseId;
use crate::signal::{Connection, Signal};
use crate::{Promise, Value};

struct TokenInner {
    destroyed: Signal<()>,
}

impl Drop for TokenInner {
    fn drop(&mut self) {
        self.destroyed.emit(&());
    }
}

/// A lifetime token for a context a promise belongs to.
///
/// Clones share the token; once the last clone is dropped, the observers registered
/// with [`on_destroyed`](Self::on_destroyed) run.
#[derive(Clone)]
pub struct ContextToken {
    inner: Arc<TokenInner>,
}

impl ContextToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                destroyed: Signal::new(),
            }),
        }
    }

    pub fn on_destroyed<F>(&self, f: F) -> Connection
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.destroyed.connect(Arc::new(move |_: &()| f()))
    }
}

impl Default for ContextToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ContextToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextToken")
            .field("observers", &self.inner.destroyed.len())
            .finish()
    }
}

struct Entry {
    promise: Promise,
    connections: Vec<Connection>,
}

impl Entry {
    fn disconnect(&self) {
        for connection in &self.connections {
            connection.disconnect();
        }
    }
}

struct SitterInner {
    entries: RwLock<HashMap<PromiseId, Entry>>,
    executor: Arc<dyn Executor>,
}

impl SitterInner {
    fn remove(&self, id: PromiseId) -> Option<Entry> {
        let entry = self.entries.write().remove(&id)?;
        entry.disconnect();
        trace!(promise = ?id, state = %entry.promise.state(), "promise released by sitter");
        Some(entry)
    }
}

impl Drop for SitterInner {
    fn drop(&mut self) {
        for entry in self.entries.get_mut().values() {
            entry.disconnect();
        }
    }
}

/// Holds promises until they settle.
///
/// Removal after settlement happens on the next tick of the sitter's executor, never
/// from within the promise's own notification.
#[derive(Clone)]
pub struct PromiseSitter {
    inner: Arc<SitterInner>,
}

impl PromiseSitter {
    /// A sitter on the current default executor.
    pub fn new() -> Self {
        Self::with_executor(executor::current())
    }

    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self {
            inner: Arc::new(SitterInner {
                entries: RwLock::new(HashMap::new()),
                executor,
            }),
        }
    }

    /// The process-wide sitter.
    pub fn instance() -> &'static PromiseSitter {
        static INSTANCE: OnceLock<PromiseSitter> = OnceLock::new();
        INSTANCE.get_or_init(PromiseSitter::new)
    }

    /// Holds `promise` until it settles or any of `contexts` is destroyed.
    ///
    /// A promise that is already settled is not held. Adding a held promise again
    /// only adds the new contexts.
    pub fn add(&self, promise: &Promise, contexts: &[&ContextToken]) {
        let id = promise.id();
        let deferred = promise.deferred();
        let guard = deferred.hold();
        if deferred.state().is_settled() {
            trace!(promise = ?id, "settled promise not added to sitter");
            return;
        }

        let mut entries = self.inner.entries.write();
        let entry = match entries.entry(id) {
            MapEntry::Occupied(occupied) => occupied.into_mut(),
            MapEntry::Vacant(vacant) => {
                let on_settled = settle_watch(Arc::downgrade(&self.inner), id);
                let connections = vec![
                    deferred.on_resolved(on_settled.clone()),
                    deferred.on_rejected(on_settled),
                ];
                trace!(promise = ?id, "promise added to sitter");
                vacant.insert(Entry {
                    promise: promise.clone(),
                    connections,
                })
            }
        };
        for context in contexts {
            let sitter = Arc::downgrade(&self.inner);
            entry.connections.push(context.on_destroyed(move || {
                if let Some(sitter) = sitter.upgrade() {
                    drop(sitter.remove(id));
                }
            }));
        }
        drop(entries);
        drop(guard);
    }

    /// Releases `promise` early. Returns whether it was held.
    pub fn remove(&self, promise: &Promise) -> bool {
        self.inner.remove(promise.id()).is_some()
    }

    pub fn contains(&self, promise: &Promise) -> bool {
        self.inner.entries.read().contains_key(&promise.id())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PromiseSitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for PromiseSitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseSitter")
            .field("promises", &self.len())
            .finish()
    }
}

fn settle_watch(
    sitter: Weak<SitterInner>,
    id: PromiseId,
) -> impl Fn(&Value) + Clone + Send + Sync + 'static {
    move |_: &Value| {
        let Some(inner) = sitter.upgrade() else {
            return;
        };
        let sitter = sitter.clone();
        inner.executor.post(
            Duration::ZERO,
            Box::new(move || {
                if let Some(inner) = sitter.upgrade() {
                    drop(inner.remove(id));
                }
            }),
        );
    }
}
