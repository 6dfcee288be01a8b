//! # Remote-Callable Objects
//!
//! `RemoteObject` is what gets exported: anything that can name its
//! interface and answer an invocation. Application types implement it by
//! matching on the method name; `Stub` implements it by forwarding over a
//! connection, so a stub can be passed along or re-exported like any other
//! object.

use std::fmt;
use std::sync::Arc;

use riperpc::Fault;
use riperpc::FaultKind;
use riperpc::Value;

use crate::connection::Connection;
use crate::interface::Interface;
use crate::interface::Method;

pub type ObjectRef = Arc<dyn RemoteObject>;

#[async_trait::async_trait]
pub trait RemoteObject: Send + Sync + 'static {
    fn interface(&self) -> Arc<Interface>;

    async fn invoke(&self, invocation: Invocation) -> Result<Arg, Fault>;
}

/// A top-level argument or return slot.
#[derive(Clone)]
pub enum Arg {
    Data(Value),
    Object(ObjectRef),
}

impl Arg {
    pub fn unit() -> Self {
        Self::Data(Value::Unit)
    }

    pub fn object<T: RemoteObject>(object: Arc<T>) -> Self {
        Self::Object(object)
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Self::Data(v) => Some(v),
            Self::Object(_) => None,
        }
    }

    pub fn into_data(self) -> Option<Value> {
        match self {
            Self::Data(v) => Some(v),
            Self::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            Self::Data(_) => None,
        }
    }

    pub fn into_object(self) -> Option<ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            Self::Data(_) => None,
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(v) => f.debug_tuple("Data").field(v).finish(),
            Self::Object(o) => write!(f, "Object({})", o.interface().name()),
        }
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self { Self::Data(v) }
}

impl From<ObjectRef> for Arg {
    fn from(o: ObjectRef) -> Self { Self::Object(o) }
}

/// One method call handed to a `RemoteObject`.
pub struct Invocation {
    method: Arc<Method>,
    args: Vec<Arg>,
    connection: Option<Connection>,
}

impl Invocation {
    pub fn new(method: Arc<Method>, args: Vec<Arg>, connection: Option<Connection>) -> Self {
        Self { method, args, connection }
    }

    pub fn method(&self) -> &Arc<Method> {
        &self.method
    }

    /// Shorthand for `method().name()`.
    pub fn name(&self) -> &str {
        self.method.name()
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    pub fn into_args(self) -> Vec<Arg> {
        self.args
    }

    /// The connection the call arrived on; `None` for in-process calls.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// Data argument at `index`, or a `BadArguments` fault.
    pub fn data(&self, index: usize) -> Result<&Value, Fault> {
        self.args
            .get(index)
            .and_then(Arg::as_data)
            .ok_or_else(|| self.bad_argument(index, "a value"))
    }

    /// Object argument at `index`, or a `BadArguments` fault.
    pub fn object(&self, index: usize) -> Result<ObjectRef, Fault> {
        self.args
            .get(index)
            .and_then(Arg::as_object)
            .cloned()
            .ok_or_else(|| self.bad_argument(index, "an object"))
    }

    pub fn s32(&self, index: usize) -> Result<i32, Fault> {
        self.data(index)?
            .as_s32()
            .ok_or_else(|| self.bad_argument(index, "an s32"))
    }

    pub fn str(&self, index: usize) -> Result<&str, Fault> {
        self.data(index)?
            .as_str()
            .ok_or_else(|| self.bad_argument(index, "a string"))
    }

    fn bad_argument(&self, index: usize, expected: &str) -> Fault {
        Fault::new(
            FaultKind::BadArguments,
            format!("{}: argument {} is not {}", self.method.signature(), index, expected),
        )
    }

    /// A fault for a method the object's interface declares but the object
    /// does not handle.
    pub fn unhandled(&self) -> Fault {
        Fault::new(FaultKind::NoSuchMethod, self.method.signature())
    }
}

/// Calls `method` on `object` by name, whether it is local or a stub.
pub async fn invoke_method(object: &ObjectRef, method: &str, args: Vec<Arg>) -> Result<Arg, Fault> {
    let iface = object.interface();
    let method = iface
        .method(method)
        .cloned()
        .ok_or_else(|| Fault::new(FaultKind::NoSuchMethod, format!("{}.{}", iface.name(), method)))?;
    if method.params().len() != args.len() {
        return Err(Fault::new(
            FaultKind::BadArguments,
            format!("{} takes {} arguments, got {}", method.signature(), method.params().len(), args.len()),
        ));
    }
    object.invoke(Invocation::new(method, args, None)).await
}
