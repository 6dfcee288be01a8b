//! The sample service exercised end to end over an in-memory stream.

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use riperpc::Filter;
use riperpc::Message;
use riperpc::PackFilter;
use riperun::Config;
use riperun::Connection;
use riperun::Error;
use riperun::FaultKind;
use riperun::State;
use riperun::StreamTransport;
use riperun::Stub;
use riperun::Value;

use common::CALLBACK_ROUNDS;
use common::CallbackImpl;
use common::ServiceClient;
use common::linked;
use common::long_string;
use common::rectangle;

#[tokio::test]
async fn test_global_service_answers() -> anyhow::Result<()> {
    let link = linked(Config::default()).await?;
    let service = ServiceClient::new(&link.client, &link.schemas)?;
    assert_eq!(service.test(34).await?, 69);
    assert_eq!(service.test(-1).await?, -1);
    Ok(())
}

#[tokio::test]
async fn test_callbacks_run_while_call_is_open() -> anyhow::Result<()> {
    let link = linked(Config::default()).await?;
    let service = ServiceClient::new(&link.client, &link.schemas)?;
    let callback = Arc::new(CallbackImpl::new(&link.schemas));

    let rect = tokio::time::timeout(
        Duration::from_secs(10),
        service.add_callback(Some(callback.clone())),
    )
    .await??;

    assert_eq!(rect, rectangle(1, 2, 3, 4));
    assert_eq!(callback.calls.load(Ordering::SeqCst), CALLBACK_ROUNDS);
    assert_eq!(callback.last_len.load(Ordering::SeqCst), long_string().len());
    assert_eq!(link.service.callbacks_made.load(Ordering::SeqCst), CALLBACK_ROUNDS);

    // the callback was exported once on the client, the input once on the server
    assert_eq!(link.client.registry().exported_count(), 1);
    assert_eq!(link.server.registry().exported_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_missing_callback_is_data() -> anyhow::Result<()> {
    let link = linked(Config::default()).await?;
    let service = ServiceClient::new(&link.client, &link.schemas)?;
    assert_eq!(service.add_callback(None).await?, rectangle(0, 0, 0, 0));
    assert_eq!(link.service.callbacks_made.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_returned_object_arrives_as_stub() -> anyhow::Result<()> {
    let link = linked(Config::default()).await?;
    let service = ServiceClient::new(&link.client, &link.schemas)?;

    let sub = service.get_sub_service().await?;
    assert_eq!(common::yo(&sub).await?, 1234);
    assert_eq!(sub.interface().name(), "test.SubService");

    // the client holds a stub; the object itself stays exported on the server
    assert!(link.client.registry().lookup_handle_for(&sub).is_none());
    assert_eq!(link.server.registry().exported_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_record_return() -> anyhow::Result<()> {
    let link = linked(Config::default()).await?;
    let service = ServiceClient::new(&link.client, &link.schemas)?;
    let rect = service.r().await?;
    assert_eq!(rect, rectangle(3, 4, 5, 6));
    assert_eq!(rect.field("width"), Some(&Value::S32(5)));
    Ok(())
}

#[tokio::test]
async fn test_stub_formats_locally() -> anyhow::Result<()> {
    let link = linked(Config::default()).await?;
    let stub: Arc<Stub> = link.client.global_stub(&link.schemas.service)?;
    link.server.close().await;
    link.client.closed().await;

    // no round trip: works on a dead connection
    let text = stub.to_string();
    assert!(text.contains("test.Service"), "{}", text);
    assert!(text.contains("client"), "{}", text);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_calls_get_their_own_returns() -> anyhow::Result<()> {
    let link = linked(Config::default()).await?;
    let service = Arc::new(ServiceClient::new(&link.client, &link.schemas)?);

    let mut tasks = Vec::new();
    for y in 0..64 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move { (y, service.test(y).await) }));
    }
    for task in tasks {
        let (y, result) = task.await?;
        assert_eq!(result?, y * 2 + 1);
    }
    assert_eq!(link.client.pending_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_calls_in_both_directions_at_once() -> anyhow::Result<()> {
    let link = linked(Config::default()).await?;
    let service = Arc::new(ServiceClient::new(&link.client, &link.schemas)?);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let service = service.clone();
        let callback = Arc::new(CallbackImpl::new(&link.schemas));
        tasks.push(tokio::spawn(async move { service.add_callback(Some(callback)).await }));
    }
    for y in 0..16 {
        assert_eq!(service.test(y).await?, y * 2 + 1);
    }
    for task in tasks {
        assert_eq!(task.await??, rectangle(1, 2, 3, 4));
    }
    assert_eq!(link.service.callbacks_made.load(Ordering::SeqCst), 4 * CALLBACK_ROUNDS);
    Ok(())
}

#[tokio::test]
async fn test_unexported_target_is_a_fault_not_a_disconnect() -> anyhow::Result<()> {
    let link = linked(Config::default()).await?;
    let stranger = link
        .client
        .stub_for(riperun::RemoteInstance::new(77, "test.SubService"))?;

    match stranger.call("yo", vec![]).await {
        Err(Error::Remote(fault)) => assert_eq!(fault.kind, FaultKind::NoImplementation),
        other => panic!("expected NoImplementation, got {:?}", other),
    }

    let service = ServiceClient::new(&link.client, &link.schemas)?;
    assert_eq!(service.test(34).await?, 69);
    Ok(())
}

#[tokio::test]
async fn test_close_reaches_the_peer() -> anyhow::Result<()> {
    let link = linked(Config::default()).await?;
    let service = ServiceClient::new(&link.client, &link.schemas)?;
    let notified = Arc::new(AtomicUsize::new(0));
    let seen = notified.clone();
    link.server.add_listener(Arc::new(move |_: &str| {
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    link.client.close().await;
    let reason = tokio::time::timeout(Duration::from_secs(5), link.server.closed()).await?;
    assert_eq!(reason, "stream closed by peer");
    assert_eq!(link.server.state(), State::Closed);
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    assert!(service.test(1).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_bounded_workers_still_serve_everyone() -> anyhow::Result<()> {
    let link = linked(Config::default().with_max_concurrent_calls(2)).await?;
    let service = Arc::new(ServiceClient::new(&link.client, &link.schemas)?);

    let mut tasks = Vec::new();
    for y in 0..20 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move { service.test(y).await }));
    }
    for (y, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await??, y as i32 * 2 + 1);
    }
    Ok(())
}

/// Counts frames on their way through the default format.
#[derive(Default)]
struct CountingFilter {
    encoded: AtomicUsize,
    decoded: AtomicUsize,
}

impl Filter for CountingFilter {
    fn encode(&self, msg: &Message) -> riperpc::Result<Vec<u8>> {
        self.encoded.fetch_add(1, Ordering::SeqCst);
        PackFilter.encode(msg)
    }

    fn decode(&self, frame: &[u8]) -> riperpc::Result<Message> {
        self.decoded.fetch_add(1, Ordering::SeqCst);
        PackFilter.decode(frame)
    }
}

#[tokio::test]
async fn test_custom_filter_sees_every_frame() -> anyhow::Result<()> {
    let schemas = Arc::new(common::Schemas::new());
    let (server_registry, _service) = common::server_registry(&schemas);
    let filter = Arc::new(CountingFilter::default());

    let (a, b) = StreamTransport::pair();
    let _server = Connection::with_filter("server", a, server_registry, filter.clone(), Config::default()).await?;
    let client = Connection::open("client", b, common::client_registry(&schemas), Config::default()).await?;

    let service = ServiceClient::new(&client, &schemas)?;
    assert_eq!(service.test(34).await?, 69);

    // three beacons and a Return out; three beacons and a Call in
    assert_eq!(filter.encoded.load(Ordering::SeqCst), 4);
    assert_eq!(filter.decoded.load(Ordering::SeqCst), 4);
    Ok(())
}
