//! The opaque payload carried by `resolve`, `reject` and `notify`.
//!
//! A [`Value`] can hold any `'static` type that is `Send + Sync + Debug + PartialEq`,
//! can be empty ("null") and can hold an ordered list of other values, which is what
//! [`Promise::all`](crate::Promise::all) and [`Promise::any`](crate::Promise::any)
//! produce.
//!
//! # Examples
//!
//! ```
//! use deferred_promise::Value;
//!
//! let value = Value::from("🍓");
//! assert_eq!(value.get::<String>(), Some("🍓".to_string()));
//! assert!(value.get::<i32>().is_none());
//!
//! let list = Value::list(vec![Value::from(1), Value::from(2)]);
//! assert_eq!(list.as_list().map(<[Value]>::len), Some(2));
//! ```
use std::any::{self, Any};
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::Error;

trait Payload: Any + Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
    fn eq_payload(&self, other: &dyn Payload) -> bool;
    fn type_name(&self) -> &'static str;
}

impl<T> Payload for T
where
    T: Any + Send + Sync + Debug + PartialEq,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_payload(&self, other: &dyn Payload) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn type_name(&self) -> &'static str {
        any::type_name::<T>()
    }
}

/// A type-erased, cheaply clonable value.
#[derive(Clone, Default)]
pub struct Value(Option<Arc<dyn Payload>>);

impl Value {
    /// An empty value. This is what a pending deferred reports.
    pub fn null() -> Self {
        Self(None)
    }

    /// Wraps any concrete value.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync + Debug + PartialEq,
    {
        Self(Some(Arc::new(value)))
    }

    /// Wraps an ordered list of values.
    pub fn list(values: Vec<Value>) -> Self {
        Self::new(values)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// `true` if the value holds a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|payload| payload.as_any().downcast_ref::<T>())
    }

    /// Returns a copy of the held `T`, or `None` if the value holds something else.
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// Like [`get`](Self::get) but reports what was found instead.
    pub fn try_get<T: Any + Clone>(&self) -> Result<T, Error> {
        self.get::<T>().ok_or_else(|| Error::TypeMismatch {
            expected: any::type_name::<T>(),
            found: self.type_name().unwrap_or("null"),
        })
    }

    /// The list held by this value, if it holds one.
    pub fn as_list(&self) -> Option<&[Value]> {
        self.downcast_ref::<Vec<Value>>().map(Vec::as_slice)
    }

    /// Name of the held type, `None` for null.
    pub fn type_name(&self) -> Option<&'static str> {
        self.0.as_deref().map(Payload::type_name)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self.0.as_deref(), other.0.as_deref()) {
            (None, None) => true,
            (Some(lhs), Some(rhs)) => lhs.eq_payload(rhs),
            _ => false,
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_deref() {
            None => f.write_str("Value(null)"),
            Some(payload) => write!(f, "Value({payload:?})"),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Self::null()
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::list(values)
    }
}

impl From<Error> for Value {
    fn from(error: Error) -> Self {
        Self::new(error)
    }
}

macro_rules! value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::new(value)
                }
            }
        )*
    };
}

value_from!(bool, char, i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64, String);
