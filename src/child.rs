//! A deferred holding on to other (parent) deferreds.
//!
//! This is what promise chaining is made of: [`Promise::then`](crate::Promise::then),
//! [`Promise::all`](crate::Promise::all) and [`Promise::any`](crate::Promise::any) create a
//! [`ChildDeferred`] which keeps the deferreds it was derived from alive and settles itself
//! from their outcome. When the child settles it lets go of its parents on the next tick.
//!
//! With result tracking enabled, the child also reports every parent settling and fires an
//! aggregate event once *all* parents resolved (or all rejected), with the values in parent
//! order.
//!
//! # Examples
//!
//! ```
//! use deferred_promise::executor::EventLoop;
//! use deferred_promise::{ChildDeferred, Deferred, Value};
//! use std::sync::{Arc, Mutex};
//!
//! let (a, b) = (Deferred::new(), Deferred::new());
//! let child = ChildDeferred::create_many(vec![a.clone(), b.clone()], true);
//! let results = Arc::new(Mutex::new(None));
//! let r = results.clone();
//! child.on_parents_resolved(move |values| *r.lock().unwrap() = Some(values.to_vec()));
//!
//! b.resolve(2);
//! a.resolve(1);
//! assert_eq!(
//!     *results.lock().unwrap(),
//!     Some(vec![Value::from(1), Value::from(2)])
//! );
//! # child.resolve(());
//! # EventLoop::main().process_events();
//! ```
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, trace};

use crate::deferred::{DeferredId, WeakDeferred};
use crate::executor;
use crate::signal::{Connection, Signal, Slot};
use crate::{Deferred, State, Value};

/// Callbacks attached to a parent with [`ChildDeferred::connect_parent`].
///
/// Each callback is optional; missing ones are simply not connected.
#[derive(Default)]
pub struct ParentSlots {
    resolved: Option<Slot<Value>>,
    rejected: Option<Slot<Value>>,
    notified: Option<Slot<Value>>,
}

impl ParentSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_resolved<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.resolved = Some(Arc::new(f));
        self
    }

    pub fn on_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.rejected = Some(Arc::new(f));
        self
    }

    pub fn on_notified<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.notified = Some(Arc::new(f));
        self
    }
}

impl Debug for ParentSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParentSlots")
            .field("resolved", &self.resolved.is_some())
            .field("rejected", &self.rejected.is_some())
            .field("notified", &self.notified.is_some())
            .finish()
    }
}

/// One occurrence of a parent. The same deferred may occur more than once.
struct Link {
    slot: u64,
    parent: Deferred,
    outcome: Option<Value>,
    tracking: Vec<Connection>,
}

impl Link {
    fn untrack(&mut self) {
        for connection in self.tracking.drain(..) {
            connection.disconnect();
        }
        self.outcome = None;
    }
}

#[derive(Default)]
struct Links {
    entries: Vec<Link>,
    /// Destruction watches and `connect_parent` callbacks, per parent.
    watches: HashMap<DeferredId, Vec<Connection>>,
    track: bool,
    generation: u64,
    resolved_count: usize,
    rejected_count: usize,
    all_resolved_fired: bool,
    all_rejected_fired: bool,
}

impl Links {
    /// Disconnects everything and hands back the parents, which the caller drops once
    /// no lock is held.
    fn take_all(&mut self) -> Vec<Deferred> {
        for (_, connections) in self.watches.drain() {
            for connection in connections {
                connection.disconnect();
            }
        }
        self.entries
            .drain(..)
            .map(|mut link| {
                link.untrack();
                link.parent
            })
            .collect()
    }

    fn restart(&mut self) {
        self.generation += 1;
        self.resolved_count = 0;
        self.rejected_count = 0;
        self.all_resolved_fired = false;
        self.all_rejected_fired = false;
        for link in &mut self.entries {
            link.untrack();
        }
    }
}

pub(crate) struct Lineage {
    links: Mutex<Links>,
    next_slot: AtomicU64,
    parent_resolved: Signal<Value>,
    parent_rejected: Signal<Value>,
    parents_resolved: Signal<Vec<Value>>,
    parents_rejected: Signal<Vec<Value>>,
}

impl Lineage {
    fn new() -> Self {
        Self {
            links: Mutex::new(Links::default()),
            next_slot: AtomicU64::new(0),
            parent_resolved: Signal::new(),
            parent_rejected: Signal::new(),
            parents_resolved: Signal::new(),
            parents_rejected: Signal::new(),
        }
    }

    fn link(&self, parent: Deferred) -> Link {
        Link {
            slot: self.next_slot.fetch_add(1, Ordering::Relaxed),
            parent,
            outcome: None,
            tracking: Vec::new(),
        }
    }

    /// Disconnects from every parent. Used when the owning deferred goes away.
    pub(crate) fn detach_all(&self) {
        let parents = self.links.lock().take_all();
        drop(parents);
    }

    pub(crate) fn release_parents(&self, delayed: bool) {
        let parents = self.links.lock().take_all();
        if parents.is_empty() {
            return;
        }
        trace!(parents = parents.len(), delayed, "releasing parents");
        if delayed {
            executor::current().post(Duration::ZERO, Box::new(move || drop(parents)));
        } else {
            drop(parents);
        }
    }

    fn record(&self, generation: u64, slot: u64, state: State, value: Value) {
        let aggregate = {
            let mut guard = self.links.lock();
            let links = &mut *guard;
            if links.generation != generation || !links.track {
                return;
            }
            match links.entries.iter_mut().find(|link| link.slot == slot) {
                Some(link) if link.outcome.is_none() => link.outcome = Some(value.clone()),
                _ => return,
            }
            let (count, fired) = match state {
                State::Rejected => (&mut links.rejected_count, &mut links.all_rejected_fired),
                State::Resolved | State::Pending => {
                    (&mut links.resolved_count, &mut links.all_resolved_fired)
                }
            };
            *count += 1;
            if !*fired && *count == links.entries.len() {
                *fired = true;
                Some(
                    links
                        .entries
                        .iter()
                        .map(|link| link.outcome.clone().unwrap_or_default())
                        .collect::<Vec<_>>(),
                )
            } else {
                None
            }
        };
        let (each, all) = match state {
            State::Rejected => (&self.parent_rejected, &self.parents_rejected),
            State::Resolved | State::Pending => (&self.parent_resolved, &self.parents_resolved),
        };
        each.emit(&value);
        if let Some(values) = aggregate {
            all.emit(&values);
        }
    }

    /// Starts watching one parent occurrence for the given tracking generation.
    ///
    /// A parent that already settled is counted on the next tick, as if it had settled
    /// right after tracking started.
    fn track(self: &Arc<Self>, generation: u64, slot: u64, parent: &Deferred) {
        let weak = Arc::downgrade(self);
        let guard = parent.hold();
        let state = parent.state();
        if state.is_settled() {
            let value = parent.value();
            drop(guard);
            executor::current().post(
                Duration::ZERO,
                Box::new(move || {
                    if let Some(lineage) = weak.upgrade() {
                        lineage.record(generation, slot, state, value);
                    }
                }),
            );
            return;
        }

        let connections = vec![
            parent.connect_resolved(record_slot(&weak, generation, slot, State::Resolved)),
            parent.connect_rejected(record_slot(&weak, generation, slot, State::Rejected)),
        ];
        drop(guard);

        let mut links = self.links.lock();
        let current = links.generation == generation && links.track;
        match links.entries.iter_mut().find(|link| link.slot == slot) {
            Some(link) if current => link.tracking.extend(connections),
            _ => connections.iter().for_each(Connection::disconnect),
        }
    }
}

fn record_slot(weak: &Weak<Lineage>, generation: u64, slot: u64, state: State) -> Slot<Value> {
    let weak = weak.clone();
    Arc::new(move |value: &Value| {
        if let Some(lineage) = weak.upgrade() {
            lineage.record(generation, slot, state, value.clone());
        }
    })
}

/// A [`Deferred`] that owns its parents and derives its outcome from them.
///
/// Derefs to [`Deferred`], so it can be resolved, rejected, notified and observed like
/// any other deferred.
#[derive(Clone)]
pub struct ChildDeferred {
    deferred: Deferred,
    lineage: Arc<Lineage>,
}

/// A non-owning reference to a child deferred.
#[derive(Clone)]
pub struct WeakChild(WeakDeferred);

impl WeakChild {
    pub fn upgrade(&self) -> Option<ChildDeferred> {
        self.0.upgrade().and_then(ChildDeferred::from_deferred)
    }
}

impl ChildDeferred {
    /// Creates a pending child of `parent`.
    pub fn create(parent: Deferred) -> Self {
        Self::create_many(vec![parent], false)
    }

    /// Creates a pending child of all `parents`, optionally tracking their results
    /// (see [`set_track_parent_results`](Self::set_track_parent_results)).
    pub fn create_many(parents: Vec<Deferred>, track_results: bool) -> Self {
        let lineage = Arc::new(Lineage::new());
        let deferred = Deferred::with_lineage(lineage.clone());
        deferred.set_log_invalid_action(false);
        let child = Self { deferred, lineage };
        child.set_parents(parents);
        child.set_track_parent_results(track_results);
        child
    }

    /// Recovers the child behind a deferred handle, if the deferred is one.
    pub fn from_deferred(deferred: Deferred) -> Option<Self> {
        let lineage = deferred.lineage()?.clone();
        Some(Self { deferred, lineage })
    }

    pub fn into_deferred(self) -> Deferred {
        self.deferred
    }

    pub fn downgrade(&self) -> WeakChild {
        WeakChild(self.deferred.downgrade())
    }

    /// Replaces all parents with `parent`.
    pub fn set_parent(&self, parent: Deferred) {
        self.set_parents(vec![parent]);
    }

    /// Replaces all parents. Callbacks connected to the previous parents are
    /// disconnected first; result tracking, if enabled, restarts on the new parents.
    pub fn set_parents(&self, parents: Vec<Deferred>) {
        let (previous, track) = {
            let mut links = self.lineage.links.lock();
            let previous = links.take_all();
            for parent in &parents {
                self.watch(&mut links, parent);
            }
            links.entries = parents
                .into_iter()
                .map(|parent| self.lineage.link(parent))
                .collect();
            trace!(child = ?self.id(), parents = links.entries.len(), "parents set");
            (previous, links.track)
        };
        drop(previous);
        if track {
            self.set_track_parent_results(true);
        }
    }

    /// Adds one more parent. If results are tracked, the new parent is tracked too
    /// without resetting what was counted so far.
    pub fn add_parent(&self, parent: Deferred) {
        let tracked = {
            let mut links = self.lineage.links.lock();
            self.watch(&mut links, &parent);
            let link = self.lineage.link(parent.clone());
            let slot = link.slot;
            links.entries.push(link);
            trace!(child = ?self.id(), parents = links.entries.len(), "parent added");
            links.track.then_some((links.generation, slot))
        };
        if let Some((generation, slot)) = tracked {
            self.lineage.track(generation, slot, &parent);
        }
    }

    pub fn parents(&self) -> Vec<Deferred> {
        self.lineage
            .links
            .lock()
            .entries
            .iter()
            .map(|link| link.parent.clone())
            .collect()
    }

    /// Disconnects and drops all parents.
    ///
    /// With `delayed`, the parents are only released on the next tick of the current
    /// executor. Use that from within a callback of one of the parents.
    pub fn remove_parents(&self, delayed: bool) {
        self.lineage.release_parents(delayed);
    }

    /// Enables or disables watching the results of the parents.
    ///
    /// Enabling resets both counters and (re)subscribes to every current parent. Parents
    /// that are already settled are counted on the next tick, so the outcome does not
    /// depend on whether a parent settled before or after tracking started.
    pub fn set_track_parent_results(&self, enabled: bool) {
        let parents = {
            let mut links = self.lineage.links.lock();
            links.track = enabled;
            links.restart();
            if !enabled {
                return;
            }
            let generation = links.generation;
            links
                .entries
                .iter()
                .map(|link| (generation, link.slot, link.parent.clone()))
                .collect::<Vec<_>>()
        };
        for (generation, slot, parent) in parents {
            self.lineage.track(generation, slot, &parent);
        }
    }

    pub fn is_tracking_parent_results(&self) -> bool {
        self.lineage.links.lock().track
    }

    /// Connects callbacks to the signals of `parent`, which should be one of this
    /// child's parents. The callbacks are disconnected when the parent is removed or this
    /// child goes away.
    pub fn connect_parent(&self, parent: &Deferred, slots: ParentSlots) {
        let mut links = self.lineage.links.lock();
        debug_assert!(
            links.entries.iter().any(|link| link.parent == *parent),
            "parent should be added as parent to this ChildDeferred"
        );
        let mut connections = Vec::with_capacity(3);
        if let Some(slot) = slots.resolved {
            connections.push(parent.connect_resolved(slot));
        }
        if let Some(slot) = slots.rejected {
            connections.push(parent.connect_rejected(slot));
        }
        if let Some(slot) = slots.notified {
            connections.push(parent.connect_notified(slot));
        }
        links.watches.entry(parent.id()).or_default().extend(connections);
    }

    /// Runs `f` with the value of each parent that resolves while results are tracked.
    pub fn on_parent_resolved<F>(&self, f: F) -> Connection
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.lineage.parent_resolved.connect(Arc::new(f))
    }

    /// Runs `f` with the reason of each parent that rejects while results are tracked.
    pub fn on_parent_rejected<F>(&self, f: F) -> Connection
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.lineage.parent_rejected.connect(Arc::new(f))
    }

    /// Runs `f` once all parents resolved, with their values in parent order.
    pub fn on_parents_resolved<F>(&self, f: F) -> Connection
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.lineage
            .parents_resolved
            .connect(Arc::new(move |values: &Vec<Value>| f(values.as_slice())))
    }

    /// Runs `f` once all parents rejected, with their reasons in parent order.
    pub fn on_parents_rejected<F>(&self, f: F) -> Connection
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.lineage
            .parents_rejected
            .connect(Arc::new(move |values: &Vec<Value>| f(values.as_slice())))
    }

    fn watch(&self, links: &mut Links, parent: &Deferred) {
        if links.watches.contains_key(&parent.id()) {
            return;
        }
        let child = self.downgrade();
        let watch = parent.on_destroyed(move |id| {
            if let Some(child) = child.upgrade() {
                child.on_parent_destroyed(id);
            }
        });
        links.watches.insert(parent.id(), vec![watch]);
    }

    fn on_parent_destroyed(&self, id: DeferredId) {
        let removed = {
            let mut guard = self.lineage.links.lock();
            let links = &mut *guard;
            if let Some(connections) = links.watches.remove(&id) {
                connections.iter().for_each(Connection::disconnect);
            }
            let before = links.entries.len();
            links.entries.retain_mut(|link| {
                let keep = link.parent.id() != id;
                if !keep {
                    link.untrack();
                }
                keep
            });
            before - links.entries.len()
        };
        if removed > 0 && self.is_pending() {
            error!(
                parent = ?id,
                child = ?self.id(),
                "parent deferred destroyed while child is still holding a reference"
            );
        }
    }
}

impl Debug for WeakChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakChild")
            .field(&self.upgrade().map(|child| child.id()))
            .finish()
    }
}

impl Deref for ChildDeferred {
    type Target = Deferred;

    fn deref(&self) -> &Deferred {
        &self.deferred
    }
}

impl From<ChildDeferred> for Deferred {
    fn from(child: ChildDeferred) -> Self {
        child.deferred
    }
}

impl Debug for ChildDeferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (parents, track, resolved_count, rejected_count) = {
            let links = self.lineage.links.lock();
            (
                links.entries.len(),
                links.track,
                links.resolved_count,
                links.rejected_count,
            )
        };
        f.debug_struct("ChildDeferred")
            .field("deferred", &self.deferred)
            .field("parents", &parents)
            .field("track", &track)
            .field("resolved_count", &resolved_count)
            .field("rejected_count", &rejected_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::EventLoop;
    use std::sync::atomic::AtomicUsize;

    fn collect_all(child: &ChildDeferred) -> (Arc<Mutex<Vec<Vec<Value>>>>, Arc<Mutex<Vec<Vec<Value>>>>) {
        let resolved = Arc::new(Mutex::new(Vec::new()));
        let rejected = Arc::new(Mutex::new(Vec::new()));
        let r = resolved.clone();
        child.on_parents_resolved(move |values| r.lock().push(values.to_vec()));
        let r = rejected.clone();
        child.on_parents_rejected(move |values| r.lock().push(values.to_vec()));
        (resolved, rejected)
    }

    fn pump() {
        EventLoop::main().process_events();
    }

    #[test]
    fn test_child_keeps_parent_alive() {
        let parent = Deferred::new();
        let weak = parent.downgrade();
        let child = ChildDeferred::create(parent);
        assert!(weak.upgrade().is_some());
        assert_eq!(child.parents().len(), 1);
        assert_eq!(child.state(), State::Pending);

        weak.upgrade().unwrap().resolve(());
        child.remove_parents(false);
        assert!(weak.upgrade().is_none());
        child.resolve(());
    }

    #[test]
    fn test_settled_child_releases_parents_on_next_tick() {
        let event_loop = EventLoop::main();
        let parent = Deferred::new();
        let weak = parent.downgrade();
        let child = ChildDeferred::create(parent);
        assert!(child.resolve("done"));
        assert!(child.parents().is_empty());
        assert!(
            event_loop.run_until(|| weak.upgrade().is_none(), Duration::from_secs(5)),
            "parent was not released"
        );
    }

    #[test]
    fn test_track_all_resolved_in_parent_order() {
        let parents: Vec<_> = (0..3).map(|_| Deferred::new()).collect();
        let child = ChildDeferred::create_many(parents.clone(), true);
        let (resolved, rejected) = collect_all(&child);
        let each = Arc::new(AtomicUsize::new(0));
        let e = each.clone();
        child.on_parent_resolved(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        parents[2].resolve("c");
        parents[0].resolve("a");
        assert!(resolved.lock().is_empty());
        parents[1].resolve("b");

        assert_eq!(each.load(Ordering::SeqCst), 3);
        assert_eq!(
            *resolved.lock(),
            vec![vec![Value::from("a"), Value::from("b"), Value::from("c")]]
        );
        assert!(rejected.lock().is_empty());
        child.resolve(());
    }

    #[test]
    fn test_track_all_rejected() {
        let parents: Vec<_> = (0..2).map(|_| Deferred::new()).collect();
        let child = ChildDeferred::create_many(parents.clone(), true);
        let (resolved, rejected) = collect_all(&child);
        parents[1].reject("y");
        parents[0].reject("x");
        assert!(resolved.lock().is_empty());
        assert_eq!(*rejected.lock(), vec![vec![Value::from("x"), Value::from("y")]]);
        child.reject(());
    }

    #[test]
    fn test_mixed_outcomes_fire_no_aggregate() {
        let parents: Vec<_> = (0..2).map(|_| Deferred::new()).collect();
        let child = ChildDeferred::create_many(parents.clone(), true);
        let (resolved, rejected) = collect_all(&child);
        parents[0].resolve(1);
        parents[1].reject(2);
        assert!(resolved.lock().is_empty());
        assert!(rejected.lock().is_empty());
        child.resolve(());
    }

    #[test]
    fn test_already_settled_parents_counted_on_next_tick() {
        let event_loop = EventLoop::main();
        let parents = vec![
            Deferred::settled(State::Resolved, 1),
            Deferred::settled(State::Resolved, 2),
        ];
        // Connected after tracking started; an inline count would have been missed.
        let child = ChildDeferred::create_many(parents, true);
        let (resolved, _) = collect_all(&child);
        assert!(event_loop.run_until(|| !resolved.lock().is_empty(), Duration::from_secs(5)));
        assert_eq!(*resolved.lock(), vec![vec![Value::from(1), Value::from(2)]]);
        child.resolve(());
    }

    #[test]
    fn test_settled_and_pending_parents_mixed() {
        let event_loop = EventLoop::main();
        let pending = Deferred::new();
        let child =
            ChildDeferred::create_many(vec![Deferred::settled(State::Resolved, 1), pending.clone()], true);
        let (resolved, _) = collect_all(&child);
        pending.resolve(2);
        assert!(event_loop.run_until(|| !resolved.lock().is_empty(), Duration::from_secs(5)));
        assert_eq!(*resolved.lock(), vec![vec![Value::from(1), Value::from(2)]]);
        child.resolve(());
    }

    #[test]
    fn test_duplicate_parent_counted_per_occurrence() {
        let parent = Deferred::new();
        let child = ChildDeferred::create_many(vec![parent.clone(), parent.clone()], true);
        let (resolved, _) = collect_all(&child);
        parent.resolve("twice");
        assert_eq!(
            *resolved.lock(),
            vec![vec![Value::from("twice"), Value::from("twice")]]
        );
        child.resolve(());
    }

    #[test]
    fn test_restart_tracking_resets_counters_and_ignores_stale_ticks() {
        let event_loop = EventLoop::main();
        let first = Deferred::settled(State::Resolved, "old");
        let child = ChildDeferred::create_many(vec![first], true);
        let (resolved, _) = collect_all(&child);

        let second = Deferred::new();
        child.set_parents(vec![second.clone()]);
        event_loop.process_events();
        assert!(resolved.lock().is_empty(), "stale next-tick count leaked into new tracking");

        second.resolve("new");
        assert_eq!(*resolved.lock(), vec![vec![Value::from("new")]]);
        child.resolve(());
        pump();
    }

    #[test]
    fn test_disable_tracking() {
        let parent = Deferred::new();
        let child = ChildDeferred::create_many(vec![parent.clone()], true);
        assert!(child.is_tracking_parent_results());
        let (resolved, _) = collect_all(&child);
        child.set_track_parent_results(false);
        assert!(!child.is_tracking_parent_results());
        parent.resolve(());
        assert!(resolved.lock().is_empty());
        child.resolve(());
    }

    #[test]
    fn test_add_parent_extends_threshold() {
        let a = Deferred::new();
        let child = ChildDeferred::create_many(vec![a.clone()], true);
        let (resolved, _) = collect_all(&child);
        let b = Deferred::new();
        child.add_parent(b.clone());
        a.resolve("a");
        assert!(resolved.lock().is_empty());
        b.resolve("b");
        assert_eq!(*resolved.lock(), vec![vec![Value::from("a"), Value::from("b")]]);
        child.resolve(());
    }

    #[test]
    fn test_connect_parent_callbacks_removed_with_parent() {
        let parent = Deferred::new();
        let child = ChildDeferred::create(parent.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        child.connect_parent(
            &parent,
            ParentSlots::new().on_notified(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        parent.notify(1);
        child.remove_parents(false);
        parent.notify(2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        parent.resolve(());
        child.resolve(());
    }

    #[test]
    fn test_dropping_child_disconnects_parent() {
        let parent = Deferred::new();
        let child = ChildDeferred::create(parent.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        child.connect_parent(
            &parent,
            ParentSlots::new().on_resolved(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        child.reject("dropped");
        drop(child);
        parent.resolve(());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parent_destroyed_is_removed() {
        let parent = Deferred::new();
        let other = Deferred::new();
        let child = ChildDeferred::create_many(vec![parent.clone(), other.clone()], false);
        child.on_parent_destroyed(parent.id());
        assert_eq!(child.parents(), vec![other.clone()]);
        parent.resolve(());
        other.resolve(());
        child.resolve(());
    }

    #[test]
    fn test_from_deferred_roundtrip() {
        let child = ChildDeferred::create(Deferred::new());
        let plain: Deferred = child.clone().into();
        assert!(ChildDeferred::from_deferred(plain).is_some());
        assert!(ChildDeferred::from_deferred(Deferred::new()).is_none());
        for parent in child.parents() {
            parent.resolve(());
        }
        child.resolve(());
    }
}
