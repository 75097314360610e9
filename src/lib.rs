//! Thread-safe deferreds and promises with chaining, aggregation and progress.
//!
//! A producer creates a [`Deferred`] and hands a [`Promise`] over it to a consumer. The
//! producer later calls [`resolve`](Deferred::resolve), [`reject`](Deferred::reject) or
//! [`notify`](Deferred::notify); observers run synchronously on the producer's thread.
//! The consumer derives new promises with [`then`](Promise::then),
//! [`always`](Promise::always), [`all`](Promise::all) and [`any`](Promise::any), which
//! never block.
//!
//! Chained promises keep their sources alive, so only the tail of a chain has to be held.
//! Use a [`PromiseSitter`] to hold tails nobody else holds.
//!
//! Some cleanup happens "on the next tick" through an [`executor::Executor`]. Unless
//! another one is installed, or a tokio runtime is running with the `tokio` feature on,
//! that is [`executor::EventLoop::main`], which the application pumps. Until then the
//! sources of settled chains stay alive; see [`executor::current`].
//!
//! # Examples
//!
//! ```
//! use deferred_promise::{Deferred, Promise, State, Value};
//!
//! let (a, first) = Deferred::with_promise();
//! let (b, second) = Deferred::with_promise();
//! let both = Promise::all([&first, &second]);
//!
//! b.resolve("🍓");
//! a.resolve(1);
//! assert_eq!(both.state(), State::Resolved);
//! assert_eq!(both.value(), Value::list(vec![Value::from(1), Value::from("🍓")]));
//! ```
mod child;
mod deferred;
pub mod executor;
mod promise;
mod signal;
mod sitter;
mod value;
mod wait;

pub use child::{ChildDeferred, ParentSlots, WeakChild};
pub use deferred::{Deferred, DeferredId, State};
pub use promise::{CallbackOutcome, Handlers, IntoOutcome, Promise, PromiseId};
pub use signal::Connection;
pub use sitter::{ContextToken, PromiseSitter};
pub use value::Value;
pub use wait::PromiseFuture;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The awaited promise was rejected with this reason.
    #[error("promise rejected: {0:?}")]
    Rejected(Value),
    #[error("value holds {found}, not {expected}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("a default executor is already in use")]
    ExecutorAlreadyInstalled,
}
