//! The read side of an asynchronous operation, and the combinators built on it.
//!
//! A [`Promise`] is an immutable view of one [`Deferred`]. It cannot settle the deferred,
//! but it can derive new promises from it:
//!
//! * [`then`](Promise::then), [`fail`](Promise::fail), [`progress`](Promise::progress),
//!   [`always`](Promise::always) and the general [`then_with`](Promise::then_with) run a
//!   handler once the source settles (or notifies) and settle the new promise from what
//!   the handler returned (see [`CallbackOutcome`]);
//! * [`all`](Promise::all) and [`any`](Promise::any) aggregate several promises.
//!
//! # Examples
//!
//! ```
//! use deferred_promise::{Deferred, Promise, State, Value};
//!
//! let (deferred, promise) = Deferred::with_promise();
//! let doubled = promise
//!     .then(|value| value.get::<i32>().unwrap_or_default() * 2)
//!     .fail(|_| -1);
//!
//! deferred.resolve(21);
//! assert_eq!(doubled.state(), State::Resolved);
//! assert_eq!(doubled.value(), Value::from(42));
//! ```
use std::borrow::Borrow;
use std::fmt::{self, Debug};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::child::{ChildDeferred, ParentSlots, WeakChild};
use crate::executor::{self, Executor};
use crate::signal::Connection;
use crate::wait::PromiseFuture;
use crate::{Deferred, Error, State, Value};

/// What a handler passed to [`Promise::then`] and friends asks for.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// The derived promise settles exactly like the source (or, for a notified handler,
    /// the progress value is forwarded unchanged).
    Passthrough,
    /// The derived promise resolves with this value, even when it is returned from a
    /// rejected handler.
    Value(Value),
    /// The derived promise follows this promise.
    Chained(Promise),
}

/// Conversion of a handler's return value into a [`CallbackOutcome`].
///
/// `()` passes through, a [`Promise`] is chained, `Result::Err` chains to a rejected
/// promise, anything convertible into a [`Value`] resolves.
pub trait IntoOutcome {
    fn into_outcome(self) -> CallbackOutcome;
}

impl IntoOutcome for CallbackOutcome {
    fn into_outcome(self) -> CallbackOutcome {
        self
    }
}

impl IntoOutcome for () {
    fn into_outcome(self) -> CallbackOutcome {
        CallbackOutcome::Passthrough
    }
}

impl IntoOutcome for Promise {
    fn into_outcome(self) -> CallbackOutcome {
        CallbackOutcome::Chained(self)
    }
}

impl IntoOutcome for Value {
    fn into_outcome(self) -> CallbackOutcome {
        CallbackOutcome::Value(self)
    }
}

impl IntoOutcome for &str {
    fn into_outcome(self) -> CallbackOutcome {
        CallbackOutcome::Value(self.into())
    }
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: Into<Value>,
    E: Into<Value>,
{
    fn into_outcome(self) -> CallbackOutcome {
        match self {
            Ok(value) => CallbackOutcome::Value(value.into()),
            Err(reason) => CallbackOutcome::Chained(Promise::create_rejected(reason)),
        }
    }
}

macro_rules! value_outcome {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoOutcome for $ty {
                fn into_outcome(self) -> CallbackOutcome {
                    CallbackOutcome::Value(self.into())
                }
            }
        )*
    };
}

value_outcome!(
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    usize,
    isize,
    f32,
    f64,
    String,
    Vec<Value>
);

type Handler = Arc<dyn Fn(&Value) -> CallbackOutcome + Send + Sync>;

fn handler<F, R>(f: F) -> Handler
where
    F: Fn(&Value) -> R + Send + Sync + 'static,
    R: IntoOutcome,
{
    Arc::new(move |value: &Value| f(value).into_outcome())
}

/// Up to three handlers for [`Promise::then_with`].
#[derive(Default, Clone)]
pub struct Handlers {
    resolved: Option<Handler>,
    rejected: Option<Handler>,
    notified: Option<Handler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_resolved<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.resolved = Some(handler(f));
        self
    }

    pub fn on_rejected<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.rejected = Some(handler(f));
        self
    }

    /// Handles progress. A returned value is notified instead of the original progress;
    /// a returned promise has its progress and its resolve value notified.
    pub fn on_notified<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.notified = Some(handler(f));
        self
    }
}

impl Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("resolved", &self.resolved.is_some())
            .field("rejected", &self.rejected.is_some())
            .field("notified", &self.notified.is_some())
            .finish()
    }
}

/// Identity of a [`Promise`]. Clones share it; [`Promise::create`] always makes a new one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromiseId(usize);

impl Debug for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

struct PromiseInner {
    deferred: Deferred,
}

/// Read-only access to the outcome of an asynchronous operation.
#[derive(Clone)]
pub struct Promise {
    inner: Arc<PromiseInner>,
}

impl Promise {
    /// Wraps `deferred`. The promise keeps it alive.
    pub fn create(deferred: Deferred) -> Self {
        Self {
            inner: Arc::new(PromiseInner { deferred }),
        }
    }

    pub fn create_resolved(value: impl Into<Value>) -> Self {
        Self::create(Deferred::settled(State::Resolved, value))
    }

    pub fn create_rejected(reason: impl Into<Value>) -> Self {
        Self::create(Deferred::settled(State::Rejected, reason))
    }

    /// A promise resolved with `value` once `delay` elapsed on the current executor.
    /// A zero delay resolves it on the next tick. Cannot be cancelled.
    pub fn delayed_resolve(value: impl Into<Value>, delay: Duration) -> Self {
        Self::delayed_resolve_on(&*executor::current(), value, delay)
    }

    /// Like [`delayed_resolve`](Self::delayed_resolve), but rejects.
    pub fn delayed_reject(reason: impl Into<Value>, delay: Duration) -> Self {
        Self::delayed_reject_on(&*executor::current(), reason, delay)
    }

    pub fn delayed_resolve_on(
        executor: &dyn Executor,
        value: impl Into<Value>,
        delay: Duration,
    ) -> Self {
        Self::delayed(executor, State::Resolved, value.into(), delay)
    }

    pub fn delayed_reject_on(
        executor: &dyn Executor,
        reason: impl Into<Value>,
        delay: Duration,
    ) -> Self {
        Self::delayed(executor, State::Rejected, reason.into(), delay)
    }

    fn delayed(executor: &dyn Executor, state: State, value: Value, delay: Duration) -> Self {
        let (deferred, promise) = Deferred::with_promise();
        executor.post(
            delay,
            Box::new(move || {
                settle(&deferred, state, value);
            }),
        );
        promise
    }

    pub fn id(&self) -> PromiseId {
        PromiseId(Arc::as_ptr(&self.inner) as usize)
    }

    pub fn state(&self) -> State {
        self.inner.deferred.state()
    }

    /// The resolve value, the rejection reason, or null while pending.
    pub fn value(&self) -> Value {
        self.inner.deferred.value()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.deferred.is_pending()
    }

    pub(crate) fn deferred(&self) -> &Deferred {
        &self.inner.deferred
    }

    /// Runs `f` when this promise resolves.
    ///
    /// The returned promise resolves with what `f` returned, follows a promise returned
    /// by `f`, or, if `f` returns `()`, settles exactly like this promise. A rejection
    /// is passed through. If this promise is already resolved, `f` runs before `then`
    /// returns.
    ///
    /// The returned promise holds this one. Once it settles, that hold is dropped on the
    /// next tick of [`executor::current`], so with the default [`EventLoop::main`] this
    /// promise stays alive until the loop is pumped.
    ///
    /// [`EventLoop::main`]: crate::executor::EventLoop::main
    pub fn then<F, R>(&self, f: F) -> Promise
    where
        F: Fn(&Value) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.then_with(Handlers::new().on_resolved(f))
    }

    /// Runs `f` when this promise rejects. Returning a value recovers from the failure.
    pub fn fail<F, R>(&self, f: F) -> Promise
    where
        F: Fn(&Value) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.then_with(Handlers::new().on_rejected(f))
    }

    /// Runs `f` on every notification while this promise is pending.
    pub fn progress<F, R>(&self, f: F) -> Promise
    where
        F: Fn(&Value) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.then_with(Handlers::new().on_notified(f))
    }

    /// Runs `f` when this promise settles either way.
    pub fn always<F, R>(&self, f: F) -> Promise
    where
        F: Fn(&Value) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        let f = handler(f);
        self.then_with(Handlers {
            resolved: Some(f.clone()),
            rejected: Some(f),
            notified: None,
        })
    }

    /// Derives a new promise from this one through any subset of the three handlers.
    ///
    /// Keeps this promise alive like [`then`](Promise::then) does.
    pub fn then_with(&self, handlers: Handlers) -> Promise {
        let source = &self.inner.deferred;
        let guard = source.hold();
        let state = source.state();
        if state.is_settled() {
            let value = source.value();
            drop(guard);
            let handler = match state {
                State::Rejected => handlers.rejected,
                State::Resolved | State::Pending => handlers.resolved,
            };
            return match handler.map(|f| f(&value)) {
                None | Some(CallbackOutcome::Passthrough) => Promise::create(source.clone()),
                Some(CallbackOutcome::Value(value)) => Promise::create_resolved(value),
                Some(CallbackOutcome::Chained(nested)) => nested,
            };
        }

        let child = ChildDeferred::create(source.clone());
        let weak = child.downgrade();
        child.connect_parent(
            source,
            ParentSlots::new()
                .on_resolved(settle_slot(weak.clone(), State::Resolved, handlers.resolved))
                .on_rejected(settle_slot(weak.clone(), State::Rejected, handlers.rejected))
                .on_notified(notify_slot(weak, handlers.notified)),
        );
        drop(guard);
        Promise::create(child.into_deferred())
    }

    /// Resolves with the values of all `promises`, in input order, once all resolved.
    /// Rejects as soon as one of them rejects, with its reason.
    ///
    /// An empty input resolves immediately with an empty list.
    ///
    /// Inputs that are already settled are only counted on the next tick of
    /// [`executor::current`], so the result stays pending until that executor runs. The
    /// inputs are released on the tick after the result settles.
    pub fn all<I>(promises: I) -> Promise
    where
        I: IntoIterator,
        I::Item: Borrow<Promise>,
    {
        let parents = deferreds(promises);
        if parents.is_empty() {
            return Promise::create_resolved(Value::list(Vec::new()));
        }
        let child = ChildDeferred::create_many(parents, false);
        let weak = child.downgrade();
        child.on_parents_resolved(move |values| {
            if let Some(child) = weak.upgrade() {
                child.resolve(Value::list(values.to_vec()));
            }
        });
        let weak = child.downgrade();
        child.on_parent_rejected(move |reason| {
            if let Some(child) = weak.upgrade() {
                child.reject(reason.clone());
            }
        });
        child.set_track_parent_results(true);
        Promise::create(child.into_deferred())
    }

    /// Resolves with the value of the first of `promises` to resolve. Rejects with the
    /// reasons of all of them, in input order, once all rejected.
    ///
    /// An empty input rejects immediately with an empty list.
    ///
    /// Already settled inputs are counted on the next tick, as for [`all`](Promise::all).
    pub fn any<I>(promises: I) -> Promise
    where
        I: IntoIterator,
        I::Item: Borrow<Promise>,
    {
        let parents = deferreds(promises);
        if parents.is_empty() {
            return Promise::create_rejected(Value::list(Vec::new()));
        }
        let child = ChildDeferred::create_many(parents, false);
        let weak = child.downgrade();
        child.on_parent_resolved(move |value| {
            if let Some(child) = weak.upgrade() {
                child.resolve(value.clone());
            }
        });
        let weak = child.downgrade();
        child.on_parents_rejected(move |reasons| {
            if let Some(child) = weak.upgrade() {
                child.reject(Value::list(reasons.to_vec()));
            }
        });
        child.set_track_parent_results(true);
        Promise::create(child.into_deferred())
    }

    /// Runs `f` with the value when the promise resolves. Does not run for a promise that
    /// is already resolved; use [`then`](Self::then) for that.
    pub fn on_resolved<F>(&self, f: F) -> Connection
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.deferred.on_resolved(f)
    }

    pub fn on_rejected<F>(&self, f: F) -> Connection
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.deferred.on_rejected(f)
    }

    pub fn on_notified<F>(&self, f: F) -> Connection
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.deferred.on_notified(f)
    }

    /// A future completing with the value, or with [`Error::Rejected`](crate::Error::Rejected).
    pub fn wait(&self) -> PromiseFuture {
        PromiseFuture::new(self.clone())
    }
}

impl PartialEq for Promise {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Promise {}

impl Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.id())
            .field("deferred", &self.inner.deferred.id())
            .field("state", &self.state())
            .field("value", &self.value())
            .finish()
    }
}

impl From<Deferred> for Promise {
    fn from(deferred: Deferred) -> Self {
        Self::create(deferred)
    }
}

impl IntoFuture for Promise {
    type Output = Result<Value, Error>;
    type IntoFuture = PromiseFuture;

    fn into_future(self) -> PromiseFuture {
        PromiseFuture::new(self)
    }
}

impl IntoFuture for &Promise {
    type Output = Result<Value, Error>;
    type IntoFuture = PromiseFuture;

    fn into_future(self) -> PromiseFuture {
        self.wait()
    }
}

fn deferreds<I>(promises: I) -> Vec<Deferred>
where
    I: IntoIterator,
    I::Item: Borrow<Promise>,
{
    promises
        .into_iter()
        .map(|promise| promise.borrow().deferred().clone())
        .collect()
}

fn settle(deferred: &Deferred, state: State, value: Value) -> bool {
    match state {
        State::Rejected => deferred.reject(value),
        State::Resolved | State::Pending => deferred.resolve(value),
    }
}

/// Wrapper run when the source of a `then` settles with `state`.
fn settle_slot(
    child: WeakChild,
    state: State,
    handler: Option<Handler>,
) -> impl Fn(&Value) + Send + Sync + 'static {
    move |value: &Value| {
        let Some(child) = child.upgrade() else {
            return;
        };
        match handler.as_ref().map(|f| f(value)) {
            None | Some(CallbackOutcome::Passthrough) => {
                settle(&child, state, value.clone());
            }
            Some(CallbackOutcome::Value(value)) => {
                child.resolve(value);
            }
            Some(CallbackOutcome::Chained(nested)) => follow(&child, &nested),
        }
    }
}

/// Makes `child` settle like `nested`, and forward its progress.
fn follow(child: &ChildDeferred, nested: &Promise) {
    let source = nested.deferred();
    let guard = source.hold();
    let state = source.state();
    if state.is_settled() {
        let value = source.value();
        drop(guard);
        settle(child, state, value);
        return;
    }
    // Still inside a notification of the current parent: release it on the next tick.
    child.remove_parents(true);
    child.set_parent(source.clone());
    let weak = child.downgrade();
    child.connect_parent(
        source,
        ParentSlots::new()
            .on_resolved(settle_slot(weak.clone(), State::Resolved, None))
            .on_rejected(settle_slot(weak.clone(), State::Rejected, None))
            .on_notified(notify_slot(weak, None)),
    );
}

/// Wrapper run when the source of a `then` notifies.
fn notify_slot(child: WeakChild, handler: Option<Handler>) -> impl Fn(&Value) + Send + Sync + 'static {
    move |progress: &Value| {
        let Some(child) = child.upgrade() else {
            return;
        };
        match handler.as_ref().map(|f| f(progress)) {
            None | Some(CallbackOutcome::Passthrough) => {
                child.notify(progress.clone());
            }
            Some(CallbackOutcome::Value(value)) => {
                child.notify(value);
            }
            Some(CallbackOutcome::Chained(nested)) => notify_from(&child, &nested),
        }
    }
}

/// Notifies `child` with the progress and the resolve value of `nested`. Its rejection
/// is not forwarded.
fn notify_from(child: &ChildDeferred, nested: &Promise) {
    let source = nested.deferred();
    let guard = source.hold();
    match source.state() {
        State::Resolved => {
            let value = source.value();
            drop(guard);
            child.notify(value);
        }
        State::Rejected => {}
        State::Pending => {
            child.add_parent(source.clone());
            let forward = |child: WeakChild| {
                move |value: &Value| {
                    if let Some(child) = child.upgrade() {
                        child.notify(value.clone());
                    }
                }
            };
            child.connect_parent(
                source,
                ParentSlots::new()
                    .on_resolved(forward(child.downgrade()))
                    .on_notified(forward(child.downgrade())),
            );
        }
    }
}
