//! # Connection Engine
//!
//! One `Connection` per byte stream. It is symmetric: either side may call
//! the other at any time, including from inside a call it is serving.
//!
//! ## Tasks
//!
//! - A single reader task decodes frames in wire order. Returns complete the
//!   waiting caller directly; Calls are handed to a fresh worker task so the
//!   reader never waits on application code.
//! - Callers (`invoke_remote`) register a oneshot slot keyed by call id,
//!   write their Call under the send lock, then wait on the slot.
//!
//! ## Shutdown
//!
//! Stream end, a transport or protocol error, or `close()` all funnel into
//! one shutdown that runs exactly once: every waiting caller is woken with
//! `Completion::Aborted`, the transport is closed, and listeners are told.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::sync::Semaphore;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tracing::Instrument;
use tracing::debug;
use tracing::debug_span;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing::trace;
use tracing::warn;

use riperpc::Beacon;
use riperpc::Call;
use riperpc::Fault;
use riperpc::FaultKind;
use riperpc::Filter;
use riperpc::HANDSHAKE_BEACONS;
use riperpc::Message;
use riperpc::PackFilter;
use riperpc::RemoteInstance;
use riperpc::Return;
use riperpc::Value;

use crate::cache::IdentifierCache;
use crate::config::Config;
use crate::interface::Interface;
use crate::interface::Method;
use crate::object::Arg;
use crate::registry;
use crate::registry::InboundCall;
use crate::registry::Registry;
use crate::stub::Stub;
use crate::transport;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub enum Error {
    Transport(transport::Error),
    Rpc(riperpc::Error),
    Registry(registry::Error),
    /// The remote method ran and failed.
    Remote(Fault),
    /// The connection ended before a Return arrived.
    ConnectionClosed(String),
    Timeout,
    UnknownMethod { interface: String, method: String },
    BadArity { method: String, expected: usize, got: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Rpc(e) => write!(f, "RPC error: {}", e),
            Self::Registry(e) => write!(f, "Registry error: {}", e),
            Self::Remote(fault) => write!(f, "Remote failure: {}", fault),
            Self::ConnectionClosed(reason) => write!(f, "Connection closed: {}", reason),
            Self::Timeout => write!(f, "Request timed out"),
            Self::UnknownMethod { interface, method } => {
                write!(f, "Interface {} has no method {}", interface, method)
            }
            Self::BadArity { method, expected, got } => {
                write!(f, "{} takes {} arguments, got {}", method, expected, got)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<riperpc::Error> for Error {
    fn from(e: riperpc::Error) -> Self {
        Self::Rpc(e)
    }
}

impl From<registry::Error> for Error {
    fn from(e: registry::Error) -> Self {
        Self::Registry(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Connecting = 0,
    Handshaking = 1,
    Open = 2,
    Closed = 3,
}

impl State {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Handshaking,
            2 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// What a waiting caller is woken with.
#[derive(Debug)]
pub enum Completion {
    Delivered(Return),
    Aborted(String),
}

/// Told once when a connection closes, whatever the cause.
pub trait ConnectionListener: Send + Sync + 'static {
    fn connection_closed(&self, connection: &str);
}

impl<F> ConnectionListener for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn connection_closed(&self, connection: &str) {
        self(connection)
    }
}

struct Inner {
    name: String,
    peer_addr: Option<SocketAddr>,
    transport: Box<dyn Transport>,
    filter: Arc<dyn Filter>,
    registry: Arc<Registry>,
    config: Config,
    cache: IdentifierCache,
    pending: DashMap<u64, oneshot::Sender<Completion>>,
    next_call_id: AtomicU64,
    send_lock: Mutex<()>,
    stubs: DashMap<RemoteInstance, Arc<Stub>>,
    state: AtomicU8,
    /// `Some(reason)` once closed.
    closed: watch::Sender<Option<String>>,
    listeners: std::sync::Mutex<Vec<Arc<dyn ConnectionListener>>>,
    workers: Option<Arc<Semaphore>>,
    span: tracing::Span,
}

/// A live peer-to-peer link. Cheap to clone; all clones share one link.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// Non-owning handle held by stubs.
#[derive(Clone)]
pub(crate) struct WeakConnection(Weak<Inner>);

impl WeakConnection {
    pub(crate) fn upgrade(&self) -> Option<Connection> {
        self.0.upgrade().map(|inner| Connection { inner })
    }
}

pub struct ConnectionBuilder {
    name: String,
    transport: Box<dyn Transport>,
    registry: Arc<Registry>,
    filter: Arc<dyn Filter>,
    config: Config,
    peer_addr: Option<SocketAddr>,
}

impl ConnectionBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Sends the handshake beacons and starts the reader task.
    pub async fn open(self) -> Result<Connection> {
        let (closed, _) = watch::channel(None);
        let span = info_span!("connection", name = %self.name);
        let workers = self
            .config
            .max_concurrent_calls
            .map(|limit| Arc::new(Semaphore::new(limit)));

        let conn = Connection {
            inner: Arc::new(Inner {
                name: self.name,
                peer_addr: self.peer_addr,
                transport: self.transport,
                filter: self.filter,
                registry: self.registry,
                config: self.config,
                cache: IdentifierCache::new(),
                pending: DashMap::new(),
                next_call_id: AtomicU64::new(1),
                send_lock: Mutex::new(()),
                stubs: DashMap::new(),
                state: AtomicU8::new(State::Connecting as u8),
                closed,
                listeners: std::sync::Mutex::new(Vec::new()),
                workers,
                span: span.clone(),
            }),
        };

        conn.inner.state.store(State::Handshaking as u8, Ordering::SeqCst);
        for id in HANDSHAKE_BEACONS {
            if let Err(e) = conn.send(&Message::Beacon(Beacon { id })).await {
                conn.shutdown(format!("handshake failed: {}", e)).await;
                return Err(e);
            }
        }

        let opened = conn.inner.state.compare_exchange(
            State::Handshaking as u8,
            State::Open as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if opened.is_err() {
            return Err(conn.closed_error());
        }
        info!(parent: &span, peer = ?conn.inner.peer_addr, "connection open");

        tokio::spawn(conn.clone().read_loop().instrument(span));
        Ok(conn)
    }
}

impl Connection {
    pub fn builder(transport: impl Transport, registry: Arc<Registry>) -> ConnectionBuilder {
        ConnectionBuilder {
            name: "connection".to_string(),
            transport: Box::new(transport),
            registry,
            filter: Arc::new(PackFilter),
            config: Config::default(),
            peer_addr: None,
        }
    }

    pub async fn open(
        name: impl Into<String>,
        transport: impl Transport,
        registry: Arc<Registry>,
        config: Config,
    ) -> Result<Self> {
        Self::builder(transport, registry).name(name).config(config).open().await
    }

    pub async fn with_filter(
        name: impl Into<String>,
        transport: impl Transport,
        registry: Arc<Registry>,
        filter: Arc<dyn Filter>,
        config: Config,
    ) -> Result<Self> {
        Self::builder(transport, registry)
            .name(name)
            .filter(filter)
            .config(config)
            .open()
            .await
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    pub fn state(&self) -> State {
        State::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn cache(&self) -> &IdentifierCache {
        &self.inner.cache
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Number of outbound calls still waiting for their Return.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    pub(crate) fn downgrade(&self) -> WeakConnection {
        WeakConnection(Arc::downgrade(&self.inner))
    }

    /// Encodes `msg` and writes it as one frame.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        let frame = self.encode(msg)?;
        self.send_frame(msg.kind(), frame).await
    }

    /// Frames over `max_frame_len` fail here, before anything is written.
    fn encode(&self, msg: &Message) -> Result<Vec<u8>> {
        let frame = self.inner.filter.encode(msg)?;
        check_frame_len(frame.len(), self.inner.config.max_frame_len)?;
        Ok(frame)
    }

    async fn send_frame(&self, kind: &'static str, frame: Vec<u8>) -> Result<()> {
        if self.state() == State::Closed {
            return Err(self.closed_error());
        }
        debug!(parent: &self.inner.span, kind, len = frame.len(), "send");
        let written = {
            let _guard = self.inner.send_lock.lock().await;
            self.inner.transport.send(&frame).await
        };
        self.after_write(written).await
    }

    /// Sends `ret`, or a fault under the same call id when `ret` itself
    /// cannot be framed, so the caller is always answered.
    async fn send_return(&self, ret: Return) -> Result<()> {
        let call_id = ret.call_id;
        let refused = match self.encode(&Message::Return(ret)) {
            Ok(frame) => match self.send_frame("Return", frame).await {
                Err(e @ Error::Transport(transport::Error::FrameTooLarge { .. })) => e,
                sent => return sent,
            },
            Err(e) => e,
        };
        warn!(call_id, error = %refused, "return not sendable, answering with a fault");
        let fault = Fault::new(FaultKind::Unexportable, format!("return value could not be sent: {}", refused));
        let frame = self.encode(&Message::Return(Return::fault(call_id, fault)))?;
        self.send_frame("Return", frame).await
    }

    /// Writes a Call, announcing the signature only if this connection has
    /// not announced it before.
    async fn send_call(
        &self,
        call_id: u64,
        target: &RemoteInstance,
        method: &Method,
        args: Vec<Value>,
    ) -> Result<()> {
        let class = target.interface_name();
        // decided and recorded under the send lock so a key-only Call can
        // never reach the wire ahead of the Call that announces its signature
        let guard = self.inner.send_lock.lock().await;
        let announced = self.inner.cache.has_signature(class, method.key());
        let signature = (!announced).then(|| method.signature().to_string());

        let msg = Message::Call(Call::new(call_id, target.clone(), signature, method.key(), args));
        let frame = self.encode(&msg)?;
        debug!(parent: &self.inner.span, call_id, %target, announce = !announced, "send Call");

        let written = self.inner.transport.send(&frame).await;
        if written.is_ok() && !announced {
            self.inner.cache.record_signature(class, method.key(), method.signature());
        }
        drop(guard);
        self.after_write(written).await
    }

    /// A refused frame fails only its own message; any other write error
    /// leaves the stream in an unknown state and closes the connection.
    async fn after_write(&self, written: transport::Result<()>) -> Result<()> {
        match written {
            Ok(()) => Ok(()),
            Err(e @ transport::Error::FrameTooLarge { .. }) => Err(e.into()),
            Err(e) => {
                self.shutdown(format!("write failed: {}", e)).await;
                Err(e.into())
            }
        }
    }

    /// Calls `method` on the peer's object `target` and waits for its Return.
    pub async fn invoke_remote(
        &self,
        target: &RemoteInstance,
        method: &Method,
        args: Vec<Arg>,
    ) -> Result<Arg> {
        if args.len() != method.params().len() {
            return Err(Error::BadArity {
                method: method.signature().to_string(),
                expected: method.params().len(),
                got: args.len(),
            });
        }

        let call_id = self.inner.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(call_id, tx);
        let _slot = PendingSlot { pending: &self.inner.pending, call_id };

        // shutdown flips the state before draining, so either it sees our
        // slot or we see the closed state
        if self.state() == State::Closed {
            return Err(self.closed_error());
        }

        let values = args
            .into_iter()
            .zip(method.params())
            .map(|(arg, declared)| self.inner.registry.to_wire(arg, declared))
            .collect::<registry::Result<Vec<_>>>()?;

        self.send_call(call_id, target, method, values).await?;

        let completion = match self.inner.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| Error::Timeout)?,
            None => rx.await,
        };

        match completion {
            Ok(Completion::Delivered(ret)) => self.accept_return(ret),
            Ok(Completion::Aborted(reason)) => Err(Error::ConnectionClosed(reason)),
            Err(_) => Err(self.closed_error()),
        }
    }

    fn accept_return(&self, ret: Return) -> Result<Arg> {
        match ret.into_result() {
            Err(fault) => Err(Error::Remote(fault)),
            Ok(Value::Remote(handle)) => Ok(Arg::object(self.stub_for(handle)?)),
            Ok(value) => Ok(Arg::Data(value)),
        }
    }

    /// The stub for `handle` on this connection, created on first use.
    pub fn stub_for(&self, handle: RemoteInstance) -> Result<Arc<Stub>> {
        if self.state() == State::Closed {
            return Err(self.closed_error());
        }
        if let Some(stub) = self.inner.stubs.get(&handle) {
            return Ok(stub.clone());
        }
        let iface = self
            .inner
            .registry
            .interface(handle.interface_name())
            .ok_or_else(|| registry::Error::UnknownInterface(handle.interface_name().to_string()))?;
        let stub = self
            .inner
            .stubs
            .entry(handle.clone())
            .or_insert_with(|| Arc::new(Stub::new(handle, iface, self.downgrade(), self.name())))
            .clone();
        Ok(stub)
    }

    /// Stub for the peer's global singleton of `iface`.
    pub fn global_stub(&self, iface: &Arc<Interface>) -> Result<Arc<Stub>> {
        self.inner.registry.declare(iface.clone());
        self.stub_for(RemoteInstance::global(iface.name()))
    }

    /// Registers `listener`, or tells it at once if already closed.
    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        {
            // shutdown flips the state before taking the list under this lock
            let mut listeners = lock(&self.inner.listeners);
            if self.state() != State::Closed {
                listeners.push(listener);
                return;
            }
        }
        listener.connection_closed(&self.inner.name);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionListener>) {
        lock(&self.inner.listeners).retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
    }

    pub async fn close(&self) {
        self.shutdown("closed locally".to_string()).await;
    }

    /// Resolves once the connection is closed, with the reason.
    pub async fn closed(&self) -> String {
        let mut rx = self.inner.closed.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).clone(),
            Err(_) => None,
        };
        reason.unwrap_or_default()
    }

    fn closed_error(&self) -> Error {
        let reason: Option<String> = (*self.inner.closed.borrow()).clone();
        Error::ConnectionClosed(reason.unwrap_or_else(|| "connection closed".to_string()))
    }

    async fn read_loop(self) {
        let mut closed = self.inner.closed.subscribe();
        let reason = loop {
            let received = tokio::select! {
                received = self.inner.transport.recv() => received,
                _ = closed.wait_for(Option::is_some) => return,
            };
            match received {
                Ok(Some(frame)) if frame.len() > self.inner.config.max_frame_len => {
                    warn!(len = frame.len(), "oversized frame");
                    break format!(
                        "protocol error: frame of {} bytes exceeds limit of {}",
                        frame.len(),
                        self.inner.config.max_frame_len
                    );
                }
                Ok(Some(frame)) => match self.inner.filter.decode(&frame) {
                    Ok(msg) => self.dispatch(msg),
                    Err(e) => {
                        warn!(error = %e, "undecodable frame");
                        break format!("protocol error: {}", e);
                    }
                },
                Ok(None) => break "stream closed by peer".to_string(),
                Err(e) => break format!("transport error: {}", e),
            }
        };
        self.shutdown(reason).await;
    }

    fn dispatch(&self, msg: Message) {
        match msg {
            Message::Call(call) => self.accept_call(call),
            Message::Return(ret) => {
                debug!(call_id = ret.call_id, fault = ret.is_fault(), "recv Return");
                match self.inner.pending.remove(&ret.call_id) {
                    Some((_, tx)) => {
                        // receiver may have timed out
                        let _ = tx.send(Completion::Delivered(ret));
                    }
                    None => debug!(call_id = ret.call_id, "dropping return for unknown call"),
                }
            }
            Message::Beacon(beacon) => trace!(id = beacon.id, "recv Beacon"),
        }
    }

    fn accept_call(&self, call: Call) {
        let Call { call_id, target, signature, method_key, args } = call;
        debug!(call_id, %target, "recv Call");

        // recorded in wire order; workers run out of order
        if let Some(sig) = &signature {
            self.inner.cache.record_signature(target.interface_name(), method_key, sig);
        }
        let args = self.resolve_args(args);

        let conn = self.clone();
        let worker = async move {
            let _permit = match &conn.inner.workers {
                Some(workers) => workers.clone().acquire_owned().await.ok(),
                None => None,
            };
            let ret = match args {
                Ok(args) => {
                    let call = InboundCall { call_id, target, signature, method_key, args };
                    conn.inner.registry.delegate(call, &conn).await
                }
                Err(fault) => Return::fault(call_id, fault),
            };
            if let Err(e) = conn.send_return(ret).await {
                error!(call_id, error = %e, "failed to send return");
            }
        };
        tokio::spawn(worker.instrument(debug_span!("call", call_id)));
    }

    fn resolve_args(&self, args: Vec<Value>) -> std::result::Result<Vec<Arg>, Fault> {
        args.into_iter()
            .map(|value| match value {
                Value::Remote(handle) => self
                    .stub_for(handle)
                    .map(Arg::object)
                    .map_err(|e| Fault::new(FaultKind::BadArguments, e.to_string())),
                other => Ok(Arg::Data(other)),
            })
            .collect()
    }

    async fn shutdown(&self, reason: String) {
        let prev = self.inner.state.swap(State::Closed as u8, Ordering::SeqCst);
        if prev == State::Closed as u8 {
            return;
        }
        info!(parent: &self.inner.span, %reason, "connection closed");
        self.inner.closed.send_replace(Some(reason.clone()));

        let ids: Vec<u64> = self.inner.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.inner.pending.remove(&id) {
                let _ = tx.send(Completion::Aborted(reason.clone()));
            }
        }
        self.inner.stubs.clear();

        if let Err(e) = self.inner.transport.close().await {
            debug!(parent: &self.inner.span, error = %e, "transport close failed");
        }

        let listeners = std::mem::take(&mut *lock(&self.inner.listeners));
        for listener in listeners {
            listener.connection_closed(&self.inner.name);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

/// Removes a caller's pending slot on every exit path.
struct PendingSlot<'a> {
    pending: &'a DashMap<u64, oneshot::Sender<Completion>>,
    call_id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.call_id);
    }
}

fn check_frame_len(len: usize, max: usize) -> transport::Result<()> {
    if len > max {
        return Err(transport::Error::FrameTooLarge { len, max });
    }
    Ok(())
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
