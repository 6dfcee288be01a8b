//! # Export Registry
//!
//! The table of objects this process lets peers call, and the delegator that
//! turns an inbound Call into an invocation on one of them.
//!
//! A registry is shared by every connection it is handed to. Handles are
//! handed out on export and never revoked.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use tracing::debug;
use tracing::trace;

use riperpc::Fault;
use riperpc::FaultKind;
use riperpc::RemoteInstance;
use riperpc::Return;
use riperpc::Value;

use crate::connection::Connection;
use crate::interface::Interface;
use crate::interface::Type;
use crate::object::Arg;
use crate::object::Invocation;
use crate::object::ObjectRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The object's own interface differs from the one it was exported as.
    NotAssignable { declared: String, actual: String },
    /// A live object sat in a slot that is not interface-typed.
    Unexportable { slot: String },
    UnknownInterface(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAssignable { declared, actual } => {
                write!(f, "Object implements {}, cannot be exported as {}", actual, declared)
            }
            Self::Unexportable { slot } => {
                write!(f, "Object passed in non-interface slot of type {}", slot)
            }
            Self::UnknownInterface(name) => write!(f, "Interface {} was never declared", name),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// An inbound call whose handle arguments were already turned into stubs.
#[derive(Debug)]
pub struct InboundCall {
    pub call_id: u64,
    pub target: RemoteInstance,
    pub signature: Option<String>,
    pub method_key: u64,
    pub args: Vec<Arg>,
}

#[derive(Default)]
pub struct Registry {
    exported: DashMap<RemoteInstance, ObjectRef>,
    interfaces: DashMap<String, Arc<Interface>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `iface` known so stubs can be built for handles of it.
    pub fn declare(&self, iface: Arc<Interface>) {
        self.interfaces.entry(iface.name().to_string()).or_insert(iface);
    }

    pub fn interface(&self, name: &str) -> Option<Arc<Interface>> {
        self.interfaces.get(name).map(|i| i.clone())
    }

    /// Exports `object` under a fresh handle, or returns the handle it
    /// already has under `iface`.
    pub fn export(&self, iface: &Arc<Interface>, object: ObjectRef) -> Result<RemoteInstance> {
        check_assignable(iface, &object)?;
        if let Some(handle) = self.lookup_handle_for(&object) {
            if handle.interface_name() == iface.name() {
                return Ok(handle);
            }
        }
        self.declare(iface.clone());
        let handle = RemoteInstance::random(iface.name());
        debug!(%handle, "exported object");
        self.exported.insert(handle.clone(), object);
        Ok(handle)
    }

    /// Exports `object` as the well-known singleton of `iface`, replacing
    /// any earlier one.
    pub fn register_global(&self, iface: &Arc<Interface>, object: ObjectRef) -> Result<RemoteInstance> {
        check_assignable(iface, &object)?;
        self.declare(iface.clone());
        let handle = RemoteInstance::global(iface.name());
        debug!(%handle, "registered global");
        self.exported.insert(handle.clone(), object);
        Ok(handle)
    }

    pub fn lookup(&self, handle: &RemoteInstance) -> Option<ObjectRef> {
        self.exported.get(handle).map(|o| o.clone())
    }

    /// Handle under which `object` itself (not an equal object) is exported.
    pub fn lookup_handle_for(&self, object: &ObjectRef) -> Option<RemoteInstance> {
        self.exported
            .iter()
            .find(|entry| same_object(entry.value(), object))
            .map(|entry| entry.key().clone())
    }

    pub fn exported_count(&self) -> usize {
        self.exported.len()
    }

    /// Turns one outbound slot into a wire value. Objects in interface slots
    /// are exported; already exported objects are replaced by their handle.
    pub fn to_wire(&self, arg: Arg, declared: &Type) -> Result<Value> {
        let object = match arg {
            Arg::Data(value) => return Ok(value),
            Arg::Object(object) => object,
        };
        if let Some(name) = declared.as_interface() {
            let iface = match self.interface(name) {
                Some(iface) => iface,
                None => object.interface(),
            };
            return self.export(&iface, object).map(Value::Remote);
        }
        match self.lookup_handle_for(&object) {
            Some(handle) => Ok(Value::Remote(handle)),
            None => Err(Error::Unexportable { slot: declared.to_string() }),
        }
    }

    /// Runs `call` against the exported object it targets.
    ///
    /// Never fails: every problem becomes a fault Return for the caller.
    pub async fn delegate(&self, call: InboundCall, connection: &Connection) -> Return {
        let call_id = call.call_id;
        match self.delegate_inner(call, connection).await {
            Ok(value) => Return::value(call_id, value),
            Err(fault) => {
                debug!(call_id, %fault, "call faulted");
                Return::fault(call_id, fault)
            }
        }
    }

    async fn delegate_inner(&self, call: InboundCall, connection: &Connection) -> std::result::Result<Value, Fault> {
        let target = self.lookup(&call.target).ok_or_else(|| {
            Fault::new(FaultKind::NoImplementation, format!("no object exported as {}", call.target))
        })?;

        let cache = connection.cache();
        let class = cache.class_name(&call.target);

        let signature = cache
            .signature(&class, call.signature.as_deref(), call.method_key)
            .ok_or_else(|| {
                Fault::new(
                    FaultKind::Protocol,
                    format!("method key {:#018x} of {} was never announced", call.method_key, class),
                )
            })?;

        let method = match cache.method(&class, call.method_key) {
            Some(cached) => cached,
            None => {
                let schema = target.interface();
                let resolved = schema
                    .by_signature(&signature)
                    .or_else(|| schema.by_key(call.method_key))
                    .cloned();
                cache.store_method(&class, call.method_key, resolved.clone());
                resolved
            }
        };
        let method = method.ok_or_else(|| {
            Fault::new(FaultKind::NoSuchMethod, format!("{} has no method {}", class, signature))
        })?;

        if method.params().len() != call.args.len() {
            return Err(Fault::new(
                FaultKind::BadArguments,
                format!(
                    "{} takes {} arguments, got {}",
                    method.signature(),
                    method.params().len(),
                    call.args.len()
                ),
            ));
        }

        trace!(call_id = call.call_id, method = method.signature(), "invoking");
        let invocation = Invocation::new(method.clone(), call.args, Some(connection.clone()));
        let returned = match AssertUnwindSafe(target.invoke(invocation)).catch_unwind().await {
            Ok(result) => result?,
            Err(panic) => {
                return Err(Fault::new(
                    FaultKind::Panicked,
                    format!("{} panicked: {}", method.signature(), panic_message(&*panic)),
                ));
            }
        };

        self.to_wire(returned, method.returns())
            .map_err(|e| Fault::new(FaultKind::Unexportable, e.to_string()))
    }
}

fn check_assignable(iface: &Interface, object: &ObjectRef) -> Result<()> {
    let actual = object.interface();
    if actual.name() != iface.name() {
        return Err(Error::NotAssignable {
            declared: iface.name().to_string(),
            actual: actual.name().to_string(),
        });
    }
    Ok(())
}

/// Identity comparison that ignores vtable pointers.
fn same_object(a: &ObjectRef, b: &ObjectRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
