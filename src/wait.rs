use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::signal::Connection;
use crate::{Error, Promise, State, Value};

/// Awaits the outcome of a [`Promise`].
///
/// Completes with the resolve value, or with [`Error::Rejected`] carrying the reason.
/// Several futures may wait on the same promise, from any thread.
///
/// # Examples
///
/// ```
/// use deferred_promise::{Deferred, Error, Value};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let (deferred, promise) = Deferred::with_promise();
/// let waiter = promise.clone();
/// let task = thread::spawn(move || block_on(async { waiter.await }));
/// deferred.reject("💥");
/// assert_eq!(
///     task.join().expect("The waiting thread has panicked"),
///     Err(Error::Rejected(Value::from("💥")))
/// );
/// assert!(block_on(promise.wait()).is_err());
/// ```
pub struct PromiseFuture {
    // Keeps the deferred alive while waiting.
    promise: Promise,
    shared: Arc<Mutex<Waiting>>,
    connections: Vec<Connection>,
}

#[derive(Default)]
struct Waiting {
    outcome: Option<Result<Value, Error>>,
    wakers: Vec<Waker>,
}

impl Waiting {
    fn complete(&mut self, outcome: Result<Value, Error>) {
        self.outcome = Some(outcome);
        for waker in self.wakers.drain(..) {
            waker.wake()
        }
    }
}

fn outcome(state: State, value: Value) -> Result<Value, Error> {
    match state {
        State::Rejected => Err(Error::Rejected(value)),
        State::Resolved | State::Pending => Ok(value),
    }
}

impl PromiseFuture {
    pub(crate) fn new(promise: Promise) -> Self {
        let shared = Arc::new(Mutex::new(Waiting::default()));
        let deferred = promise.deferred();
        let guard = deferred.hold();
        let state = deferred.state();
        let connections = if state.is_settled() {
            shared.lock().outcome = Some(outcome(state, deferred.value()));
            Vec::new()
        } else {
            [State::Resolved, State::Rejected]
                .into_iter()
                .map(|state| {
                    let shared = shared.clone();
                    let slot = move |value: &Value| shared.lock().complete(outcome(state, value.clone()));
                    match state {
                        State::Rejected => deferred.on_rejected(slot),
                        State::Resolved | State::Pending => deferred.on_resolved(slot),
                    }
                })
                .collect()
        };
        drop(guard);
        Self {
            promise,
            shared,
            connections,
        }
    }
}

impl Future for PromiseFuture {
    type Output = Result<Value, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = self.shared.lock();
        let waiting = &mut *guard;
        match &waiting.outcome {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => {
                if !waiting.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    waiting.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for PromiseFuture {
    fn drop(&mut self) {
        for connection in &self.connections {
            connection.disconnect();
        }
    }
}

impl Debug for PromiseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseFuture")
            .field("promise", &self.promise.id())
            .field("ready", &self.shared.lock().outcome.is_some())
            .finish()
    }
}
