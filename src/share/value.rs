//! Dynamically typed values and their shareability.

use super::{SharedDict, SharedSet};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Static shareability flag for user-defined types stored in a [`Value`].
///
/// The flag is fixed when the type is defined, the way a class would be
/// declared shareable once rather than per instance.
pub trait ObjectType: Any + Send + Sync {
    /// Whether instances may be stored in shared containers.
    const SHAREABLE: bool;

    /// Name used in diagnostics.
    fn type_name(&self) -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

/// Object-safe view of an [`ObjectType`].
pub trait DynObject: Send + Sync {
    /// Returns the type's shareability flag.
    fn shareable(&self) -> bool;
    /// Returns the type name used in diagnostics.
    fn name(&self) -> &'static str;
    /// Returns `self` as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: ObjectType> DynObject for T {
    fn shareable(&self) -> bool {
        T::SHAREABLE
    }

    fn name(&self) -> &'static str {
        self.type_name()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A dynamically typed value.
///
/// Scalars, strings, bytes and tuples are immutable. `List` is the one mutable
/// built-in container and is never shareable.
#[derive(Clone)]
pub enum Value {
    /// The absent value.
    None,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// An immutable string.
    Str(Arc<str>),
    /// Immutable bytes.
    Bytes(Arc<[u8]>),
    /// An immutable sequence; shareable when every element is.
    Tuple(Arc<[Value]>),
    /// A mutable sequence.
    List(Arc<Mutex<Vec<Value>>>),
    /// A shared set (elements checked on insertion).
    Set(Arc<SharedSet>),
    /// A shared dict (values checked on insertion).
    Dict(Arc<SharedDict>),
    /// A user-defined object.
    Object(Arc<dyn DynObject>),
}

impl Value {
    /// Builds a tuple from the given elements.
    #[must_use]
    pub fn tuple(items: impl IntoIterator<Item = Self>) -> Self {
        Self::Tuple(items.into_iter().collect())
    }

    /// Builds a list from the given elements.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Self>) -> Self {
        Self::List(Arc::new(Mutex::new(items.into_iter().collect())))
    }

    /// Wraps a user-defined object.
    #[must_use]
    pub fn object<T: ObjectType>(object: T) -> Self {
        Self::Object(Arc::new(object))
    }

    /// Wraps an already shared user-defined object.
    #[must_use]
    pub fn object_arc<T: ObjectType>(object: Arc<T>) -> Self {
        Self::Object(object)
    }

    /// Returns the object as `T` if this is an `Object` of that type.
    #[must_use]
    pub fn downcast_ref<T: ObjectType>(&self) -> Option<&T> {
        match self {
            Self::Object(obj) => obj.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Returns the type name used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Set(_) => "sharedset",
            Self::Dict(_) => "shareddict",
            Self::Object(obj) => obj.name(),
        }
    }

    /// Returns true if this value may be shared between threads.
    #[must_use]
    pub fn is_shareable(&self) -> bool {
        is_shareable(self)
    }
}

/// Returns true if `value` may cross a thread boundary without copying.
///
/// Side-effect free. Tuples are classified over their elements; shared
/// containers are shareable because their contents were checked on insertion.
#[must_use]
pub fn is_shareable(value: &Value) -> bool {
    match value {
        Value::None
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::Str(_)
        | Value::Bytes(_)
        | Value::Set(_)
        | Value::Dict(_) => true,
        Value::Tuple(items) => items.iter().all(is_shareable),
        Value::List(_) => false,
        Value::Object(obj) => obj.shareable(),
    }
}

fn same_allocation<T: ?Sized, U: ?Sized>(a: &Arc<T>, b: &Arc<U>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Immutable values compare by content, mutable containers and objects by
/// identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b),
            (Self::Set(a), Self::Set(b)) => Arc::ptr_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => same_allocation(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "b{b:?}"),
            Self::Tuple(items) => {
                let mut tuple = f.debug_tuple("");
                for item in items.iter() {
                    tuple.field(item);
                }
                tuple.finish()
            }
            Self::List(items) => f.debug_list().entries(items.lock().iter()).finish(),
            Self::Set(set) => write!(f, "{set:?}"),
            Self::Dict(dict) => write!(f, "{dict:?}"),
            Self::Object(obj) => write!(f, "<{} object>", obj.name()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(Arc::from(v))
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(Arc::from(v))
    }
}

impl From<SharedSet> for Value {
    fn from(v: SharedSet) -> Self {
        Self::Set(Arc::new(v))
    }
}

impl From<SharedDict> for Value {
    fn from(v: SharedDict) -> Self {
        Self::Dict(Arc::new(v))
    }
}
