//! Runtime values and heap objects.

use super::class::RuntimeClass;
use crate::errors::SandboxError;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type ObjectRef = Arc<Object>;

/// A stack or local-variable value. Every value occupies one slot.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Ref(ObjectRef),
}

impl Value {
    pub fn as_int(&self) -> Result<i32, SandboxError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(SandboxError::verification(format!("expected int, found {:?}", other))),
        }
    }

    pub fn as_long(&self) -> Result<i64, SandboxError> {
        match self {
            Value::Long(v) => Ok(*v),
            other => Err(SandboxError::verification(format!("expected long, found {:?}", other))),
        }
    }

    /// The referenced object, `None` for null. Primitives are a verification error.
    pub fn as_reference(&self) -> Result<Option<&ObjectRef>, SandboxError> {
        match self {
            Value::Null => Ok(None),
            Value::Ref(obj) => Ok(Some(obj)),
            other => Err(SandboxError::verification(format!(
                "expected reference, found {:?}",
                other
            ))),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Reference identity for objects, value equality for primitives.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Ref(a), Value::Ref(b)) => Arc::ptr_eq(a, b),
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Ref(obj)
    }
}

impl From<Option<ObjectRef>> for Value {
    fn from(obj: Option<ObjectRef>) -> Self {
        obj.map_or(Value::Null, Value::Ref)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}L", v),
            Value::Float(v) => write!(f, "{}F", v),
            Value::Double(v) => write!(f, "{}D", v),
            Value::Ref(obj) => write!(f, "{:?}", obj),
        }
    }
}

/// The payload of a boxed primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Boolean(bool),
    Char(char),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

#[derive(Debug, Default)]
pub struct ThrowableState {
    /// A string object of the throwable's own world, or null.
    pub message: Value,
    pub cause: Option<ObjectRef>,
    /// For shadow exceptions and the throwable wrapper: the object carried
    /// across the boundary.
    pub carried: Option<ObjectRef>,
}

#[derive(Debug)]
pub enum ObjectBody {
    Instance,
    Str(String),
    Boxed(Primitive),
    Array(Mutex<Vec<Value>>),
    List(Mutex<Vec<Value>>),
    Enum { name: String, ordinal: usize },
    Throwable(Mutex<ThrowableState>),
}

pub struct Object {
    class: Arc<RuntimeClass>,
    body: ObjectBody,
    fields: Mutex<HashMap<String, Value>>,
}

impl Object {
    pub fn new(class: Arc<RuntimeClass>, body: ObjectBody) -> ObjectRef {
        let fields = class.instance_field_defaults();
        Arc::new(Self {
            class,
            body,
            fields: Mutex::new(fields),
        })
    }

    pub fn class(&self) -> &Arc<RuntimeClass> {
        &self.class
    }

    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    pub fn body(&self) -> &ObjectBody {
        &self.body
    }

    pub fn is_instance_of(&self, type_name: &str) -> bool {
        self.class.is_subtype_of(type_name)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.body {
            ObjectBody::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn throwable(&self) -> Option<MutexGuard<'_, ThrowableState>> {
        match &self.body {
            ObjectBody::Throwable(state) => Some(state.lock()),
            _ => None,
        }
    }

    /// The message text of a throwable, whichever world its string lives in.
    pub fn throwable_message(&self) -> Option<String> {
        let state = self.throwable()?;
        match &state.message {
            Value::Ref(msg) => msg.as_str().map(str::to_string),
            _ => None,
        }
    }

    pub fn elements(&self) -> Option<MutexGuard<'_, Vec<Value>>> {
        match &self.body {
            ObjectBody::Array(items) | ObjectBody::List(items) => Some(items.lock()),
            _ => None,
        }
    }

    pub fn get_field(&self, name: &str) -> Value {
        self.fields.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn set_field(&self, name: &str, value: Value) {
        self.fields.lock().insert(name.to_string(), value);
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            ObjectBody::Str(s) => write!(f, "{}({:?})", self.class_name(), s),
            ObjectBody::Boxed(p) => write!(f, "{}({:?})", self.class_name(), p),
            ObjectBody::Enum { name, .. } => write!(f, "{}.{}", self.class_name(), name),
            _ => write!(f, "{}@{:p}", self.class_name(), self as *const Object),
        }
    }
}
