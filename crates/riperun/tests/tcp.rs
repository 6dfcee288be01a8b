//! Client and server over loopback TCP.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::StreamExt;
use riperun::Config;
use riperun::Server;

use common::CALLBACK_ROUNDS;
use common::CallbackImpl;
use common::Schemas;
use common::ServiceClient;
use common::client_registry;
use common::rectangle;
use common::server_registry;

#[tokio::test]
async fn test_sample_session_over_tcp() -> anyhow::Result<()> {
    riperun::logging::init_with("riperun=debug");

    let schemas = Arc::new(Schemas::new());
    let (registry, service_impl) = server_registry(&schemas);
    let server = Server::bind("127.0.0.1:0", registry, Config::default()).await?;
    let addr = server.local_addr()?;

    let (accepted_tx, accepted_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let mut incoming = Box::pin(server.incoming());
        if let Some(Ok(conn)) = incoming.next().await {
            let _ = accepted_tx.send(conn);
        }
    });

    let client = riperun::connect(addr, client_registry(&schemas), Config::default()).await?;
    assert_eq!(client.peer_addr(), Some(addr));
    let service = ServiceClient::new(&client, &schemas)?;

    let callback = Arc::new(CallbackImpl::new(&schemas));
    let rect = tokio::time::timeout(Duration::from_secs(10), service.add_callback(Some(callback.clone()))).await??;
    assert_eq!(rect, rectangle(1, 2, 3, 4));
    assert_eq!(callback.calls.load(Ordering::SeqCst), CALLBACK_ROUNDS);

    assert_eq!(service.r().await?, rectangle(3, 4, 5, 6));
    let sub = service.get_sub_service().await?;
    assert_eq!(common::yo(&sub).await?, 1234);
    assert_eq!(service.test(34).await?, 69);
    assert_eq!(service_impl.callbacks_made.load(Ordering::SeqCst), CALLBACK_ROUNDS);

    let server_side = accepted_rx.await?;
    assert!(server_side.name().starts_with("server"));

    client.close().await;
    let reason = tokio::time::timeout(Duration::from_secs(5), server_side.closed()).await?;
    assert_eq!(reason, "stream closed by peer");
    Ok(())
}

#[tokio::test]
async fn test_connect_to_nothing_fails() {
    let schemas = Schemas::new();
    // bind then drop to get a port nobody listens on
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let result = riperun::connect(addr, client_registry(&schemas), Config::default()).await;
    assert!(matches!(result, Err(riperun::Error::Transport(_))));
}
