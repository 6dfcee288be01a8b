//! # riperun
//!
//! Runtime for ripermi: peer-to-peer remote method invocation over one
//! long-lived byte stream.
//!
//! ## Architecture
//!
//! - `interface`: method tables that stand in for reflection.
//! - `object` / `stub`: the `RemoteObject` capability, implemented by
//!   application objects and by stubs that forward to a peer.
//! - `registry`: exported objects and the delegator that runs inbound calls.
//! - `connection`: the symmetric engine (reader task, call correlation,
//!   workers, shutdown).
//! - `transport` / `net`: framing over byte streams, and TCP endpoints.
//!
//! ## Example
//!
//! ```no_run
//! # async fn demo(iface: std::sync::Arc<riperun::Interface>) -> Result<(), riperun::Error> {
//! use std::sync::Arc;
//! use riperun::{Config, Registry, Value};
//!
//! let registry = Arc::new(Registry::new());
//! let conn = riperun::connect("127.0.0.1:4455", registry, Config::default()).await?;
//! let service = conn.global_stub(&iface)?;
//! let _answer = service.call("test", vec![Value::S32(34).into()]).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod interface;
pub mod logging;
pub mod net;
pub mod object;
pub mod registry;
pub mod stub;
pub mod transport;

pub use config::Config;
pub use connection::Completion;
pub use connection::Connection;
pub use connection::ConnectionBuilder;
pub use connection::ConnectionListener;
pub use connection::Error;
pub use connection::Result;
pub use connection::State;
pub use interface::Interface;
pub use interface::Method;
pub use interface::Type;
pub use net::Server;
pub use net::connect;
pub use object::Arg;
pub use object::Invocation;
pub use object::ObjectRef;
pub use object::RemoteObject;
pub use object::invoke_method;
pub use registry::Registry;
pub use stub::Stub;
pub use transport::ChannelTransport;
pub use transport::StreamTransport;
pub use transport::Transport;

pub use riperpc::Fault;
pub use riperpc::FaultKind;
pub use riperpc::RemoteInstance;
pub use riperpc::Value;
