//! TCP endpoints. After the socket is up there is no client/server
//! distinction: both ends get the same `Connection`.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::Stream;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::ToSocketAddrs;
use tracing::info;

use crate::config::Config;
use crate::connection::Connection;
use crate::connection::Result;
use crate::registry::Registry;
use crate::transport;
use crate::transport::StreamTransport;

/// Dials `addr` and opens a connection over the socket.
pub async fn connect(addr: impl ToSocketAddrs, registry: Arc<Registry>, config: Config) -> Result<Connection> {
    let stream = TcpStream::connect(addr).await.map_err(transport::Error::from)?;
    open_stream(stream, "client", registry, config).await
}

async fn open_stream(
    stream: TcpStream,
    role: &str,
    registry: Arc<Registry>,
    config: Config,
) -> Result<Connection> {
    stream.set_nodelay(config.nodelay).map_err(transport::Error::from)?;
    let peer = stream.peer_addr().ok();
    let name = match peer {
        Some(addr) => format!("{} {}", role, addr),
        None => role.to_string(),
    };

    let (reader, writer) = stream.into_split();
    let transport = StreamTransport::from_halves(reader, writer).with_max_frame_len(config.max_frame_len);

    let mut builder = Connection::builder(transport, registry).name(name).config(config);
    if let Some(addr) = peer {
        builder = builder.peer_addr(addr);
    }
    builder.open().await
}

/// Accepts connections that all share one registry.
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: Config,
}

impl Server {
    pub async fn bind(addr: impl ToSocketAddrs, registry: Arc<Registry>, config: Config) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(transport::Error::from)?;
        if let Ok(local) = listener.local_addr() {
            info!(%local, "listening");
        }
        Ok(Self { listener, registry, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|e| transport::Error::from(e).into())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Waits for the next peer and opens a connection to it.
    pub async fn accept(&self) -> Result<Connection> {
        let (stream, _) = self.listener.accept().await.map_err(transport::Error::from)?;
        open_stream(stream, "server", self.registry.clone(), self.config.clone()).await
    }

    /// Accepted connections, forever.
    pub fn incoming(self) -> impl Stream<Item = Result<Connection>> {
        futures::stream::unfold(self, |server| async move {
            let next = server.accept().await;
            Some((next, server))
        })
    }
}
