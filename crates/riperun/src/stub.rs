//! # Stubs
//!
//! Local stand-ins for objects living on the other side of a connection.
//! Every method call on a stub becomes a Call on the wire; formatting a stub
//! is answered locally.

use std::fmt;
use std::sync::Arc;

use riperpc::Fault;
use riperpc::FaultKind;
use riperpc::RemoteInstance;

use crate::connection;
use crate::connection::Connection;
use crate::connection::WeakConnection;
use crate::interface::Interface;
use crate::interface::Method;
use crate::object::Arg;
use crate::object::Invocation;
use crate::object::RemoteObject;

pub struct Stub {
    handle: RemoteInstance,
    interface: Arc<Interface>,
    connection: WeakConnection,
    connection_name: String,
}

impl Stub {
    pub(crate) fn new(
        handle: RemoteInstance,
        interface: Arc<Interface>,
        connection: WeakConnection,
        connection_name: &str,
    ) -> Self {
        Self { handle, interface, connection, connection_name: connection_name.to_string() }
    }

    pub fn handle(&self) -> &RemoteInstance {
        &self.handle
    }

    pub fn schema(&self) -> &Arc<Interface> {
        &self.interface
    }

    /// The connection calls travel over, while it is alive.
    pub fn connection(&self) -> Option<Connection> {
        self.connection.upgrade()
    }

    /// Calls the first method named `method`.
    pub async fn call(&self, method: &str, args: Vec<Arg>) -> connection::Result<Arg> {
        let method = self
            .interface
            .method(method)
            .cloned()
            .ok_or_else(|| connection::Error::UnknownMethod {
                interface: self.interface.name().to_string(),
                method: method.to_string(),
            })?;
        self.call_method(&method, args).await
    }

    /// Calls `method`, which must belong to this stub's interface.
    pub async fn call_method(&self, method: &Method, args: Vec<Arg>) -> connection::Result<Arg> {
        let conn = self.connection().ok_or_else(|| {
            connection::Error::ConnectionClosed(format!("{} is gone", self.connection_name))
        })?;
        conn.invoke_remote(&self.handle, method, args).await
    }
}

#[async_trait::async_trait]
impl RemoteObject for Stub {
    fn interface(&self) -> Arc<Interface> {
        self.interface.clone()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Arg, Fault> {
        let method = invocation.method().clone();
        self.call_method(&method, invocation.into_args())
            .await
            .map_err(|e| match e {
                connection::Error::Remote(fault) => fault,
                other => Fault::new(
                    FaultKind::Application,
                    format!("forwarding to {} failed: {}", self.handle, other),
                ),
            })
    }
}

impl fmt::Display for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stub[{}] via {}", self.handle, self.connection_name)
    }
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("handle", &self.handle)
            .field("connection", &self.connection_name)
            .finish()
    }
}
