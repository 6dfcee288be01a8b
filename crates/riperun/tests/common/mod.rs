//! Shared fixtures: a service with callbacks and sub-objects, and typed
//! client wrappers over stubs.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use anyhow::Context;
use anyhow::anyhow;
use riperun::Arg;
use riperun::Config;
use riperun::Connection;
use riperun::Fault;
use riperun::Interface;
use riperun::Invocation;
use riperun::ObjectRef;
use riperun::Registry;
use riperun::RemoteObject;
use riperun::StreamTransport;
use riperun::Stub;
use riperun::Type;
use riperun::Value;
use riperun::invoke_method;

pub const CALLBACK_ROUNDS: usize = 10;

pub struct Schemas {
    pub service: Arc<Interface>,
    pub sub_service: Arc<Interface>,
    pub callback: Arc<Interface>,
    pub input: Arc<Interface>,
}

impl Schemas {
    pub fn new() -> Self {
        let service = Interface::builder("test.Service")
            .method("addCallback", [Type::interface("test.Callback")], Type::Record)
            .method("test", [Type::S32], Type::S32)
            .method("getSubService", [], Type::interface("test.SubService"))
            .method("r", [], Type::Record)
            .build()
            .unwrap();
        let sub_service = Interface::builder("test.SubService")
            .method("yo", [], Type::S32)
            .build()
            .unwrap();
        let callback = Interface::builder("test.Callback")
            .method("doSomething", [Type::interface("test.Input")], Type::Record)
            .build()
            .unwrap();
        let input = Interface::builder("test.Input")
            .method("getString", [], Type::String)
            .method("getArea", [], Type::Record)
            .build()
            .unwrap();
        Self { service, sub_service, callback, input }
    }

    pub fn declare(&self, registry: &Registry) {
        for iface in [&self.service, &self.sub_service, &self.callback, &self.input] {
            registry.declare(iface.clone());
        }
    }
}

pub fn rectangle(x: i32, y: i32, width: i32, height: i32) -> Value {
    Value::record([
        ("x", Value::S32(x)),
        ("y", Value::S32(y)),
        ("width", Value::S32(width)),
        ("height", Value::S32(height)),
    ])
}

pub fn dimension(width: i32, height: i32) -> Value {
    Value::record([("width", Value::S32(width)), ("height", Value::S32(height))])
}

/// `"0123...999"`, the text every `test.Input` hands out.
pub fn long_string() -> String {
    (0..1000).map(|i| i.to_string()).collect()
}

// ============================================================================
//  SERVER SIDE
// ============================================================================

pub struct ServiceImpl {
    schemas: Arc<Schemas>,
    pub callbacks_made: AtomicUsize,
}

impl ServiceImpl {
    pub fn new(schemas: Arc<Schemas>) -> Self {
        Self { schemas, callbacks_made: AtomicUsize::new(0) }
    }

    async fn add_callback(&self, invocation: &Invocation) -> Result<Arg, Fault> {
        let Some(callback) = invocation.args()[0].as_object() else {
            return Ok(rectangle(0, 0, 0, 0).into());
        };
        let input: ObjectRef = Arc::new(InputImpl(self.schemas.input.clone()));
        for _ in 0..CALLBACK_ROUNDS {
            invoke_method(callback, "doSomething", vec![Arg::Object(input.clone())]).await?;
            self.callbacks_made.fetch_add(1, Ordering::SeqCst);
        }
        Ok(rectangle(1, 2, 3, 4).into())
    }
}

#[async_trait::async_trait]
impl RemoteObject for ServiceImpl {
    fn interface(&self) -> Arc<Interface> {
        self.schemas.service.clone()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Arg, Fault> {
        match invocation.name() {
            "addCallback" => self.add_callback(&invocation).await,
            "test" => Ok(Value::S32(invocation.s32(0)? * 2 + 1).into()),
            "getSubService" => Ok(Arg::object(Arc::new(SubServiceImpl(self.schemas.sub_service.clone())))),
            "r" => Ok(rectangle(3, 4, 5, 6).into()),
            _ => Err(invocation.unhandled()),
        }
    }
}

struct SubServiceImpl(Arc<Interface>);

#[async_trait::async_trait]
impl RemoteObject for SubServiceImpl {
    fn interface(&self) -> Arc<Interface> {
        self.0.clone()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Arg, Fault> {
        match invocation.name() {
            "yo" => Ok(Value::S32(1234).into()),
            _ => Err(invocation.unhandled()),
        }
    }
}

struct InputImpl(Arc<Interface>);

#[async_trait::async_trait]
impl RemoteObject for InputImpl {
    fn interface(&self) -> Arc<Interface> {
        self.0.clone()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Arg, Fault> {
        match invocation.name() {
            "getString" => Ok(Value::String(long_string()).into()),
            "getArea" => Ok(Value::record([("x", Value::S32(22)), ("y", Value::S32(33))]).into()),
            _ => Err(invocation.unhandled()),
        }
    }
}

// ============================================================================
//  CLIENT SIDE
// ============================================================================

/// Calls back into the `test.Input` it is handed.
pub struct CallbackImpl {
    iface: Arc<Interface>,
    pub calls: AtomicUsize,
    pub last_len: AtomicUsize,
}

impl CallbackImpl {
    pub fn new(schemas: &Schemas) -> Self {
        Self { iface: schemas.callback.clone(), calls: AtomicUsize::new(0), last_len: AtomicUsize::new(0) }
    }
}

#[async_trait::async_trait]
impl RemoteObject for CallbackImpl {
    fn interface(&self) -> Arc<Interface> {
        self.iface.clone()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Arg, Fault> {
        match invocation.name() {
            "doSomething" => {
                let input = invocation.object(0)?;
                let text = invoke_method(&input, "getString", vec![]).await?;
                let len = text.as_data().and_then(Value::as_str).map_or(0, str::len);
                self.last_len.store(len, Ordering::SeqCst);
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(dimension(22, 22).into())
            }
            _ => Err(invocation.unhandled()),
        }
    }
}

/// Typed view of the peer's global `test.Service`.
pub struct ServiceClient {
    stub: Arc<Stub>,
}

impl ServiceClient {
    pub fn new(conn: &Connection, schemas: &Schemas) -> anyhow::Result<Self> {
        Ok(Self { stub: conn.global_stub(&schemas.service)? })
    }

    pub async fn test(&self, y: i32) -> anyhow::Result<i32> {
        let out = self.stub.call("test", vec![Value::S32(y).into()]).await?;
        out.as_data()
            .and_then(Value::as_s32)
            .ok_or_else(|| anyhow!("test returned {:?}", out))
    }

    pub async fn add_callback(&self, callback: Option<Arc<CallbackImpl>>) -> anyhow::Result<Value> {
        let arg = match callback {
            Some(cb) => Arg::object(cb),
            None => Arg::unit(),
        };
        let out = self.stub.call("addCallback", vec![arg]).await?;
        out.into_data().context("addCallback returned an object")
    }

    pub async fn get_sub_service(&self) -> anyhow::Result<ObjectRef> {
        let out = self.stub.call("getSubService", vec![]).await?;
        out.into_object().context("getSubService returned data")
    }

    pub async fn r(&self) -> anyhow::Result<Value> {
        let out = self.stub.call("r", vec![]).await?;
        out.into_data().context("r returned an object")
    }
}

pub async fn yo(sub_service: &ObjectRef) -> anyhow::Result<i32> {
    let out = invoke_method(sub_service, "yo", vec![]).await?;
    out.as_data()
        .and_then(Value::as_s32)
        .ok_or_else(|| anyhow!("yo returned {:?}", out))
}

// ============================================================================
//  SETUP
// ============================================================================

pub struct Linked {
    pub schemas: Arc<Schemas>,
    pub service: Arc<ServiceImpl>,
    pub server: Connection,
    pub client: Connection,
}

pub fn server_registry(schemas: &Arc<Schemas>) -> (Arc<Registry>, Arc<ServiceImpl>) {
    let registry = Arc::new(Registry::new());
    schemas.declare(&registry);
    let service = Arc::new(ServiceImpl::new(schemas.clone()));
    registry.register_global(&schemas.service, service.clone()).unwrap();
    (registry, service)
}

pub fn client_registry(schemas: &Schemas) -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    schemas.declare(&registry);
    registry
}

/// A server and a client joined by an in-memory stream.
pub async fn linked(config: Config) -> anyhow::Result<Linked> {
    let schemas = Arc::new(Schemas::new());
    let (server_registry, service) = server_registry(&schemas);
    let (a, b) = StreamTransport::pair();
    let server = Connection::open("server", a, server_registry, config.clone()).await?;
    let client = Connection::open("client", b, client_registry(&schemas), config).await?;
    Ok(Linked { schemas, service, server, client })
}
