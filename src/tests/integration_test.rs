use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;

use crate::auth::{CredentialRecord, MemoryAuthenticator, compute_proof};
use crate::broker::Registry;
use crate::client::{Client, Delivery};
use crate::config::BrokerSettings;
use crate::metrics::BrokerCounters;
use crate::protocol::{FrameCodec, Message};
use crate::transport::{Server, ShutdownHandle};
use crate::utils::{BrokerError, ClientError};

const WAIT: Duration = Duration::from_secs(5);

struct Broker {
    addr: SocketAddr,
    server: Arc<Server>,
    counters: Arc<BrokerCounters>,
    shutdown: ShutdownHandle,
    running: JoinHandle<Result<(), BrokerError>>,
}

impl Broker {
    fn registry(&self) -> &Arc<Registry> {
        self.server.registry()
    }

    async fn stop(self) {
        timeout(WAIT, self.shutdown.shutdown())
            .await
            .expect("shutdown did not drain");
        assert!(self.server.registry().is_empty());
        timeout(WAIT, self.running)
            .await
            .expect("broker did not drain")
            .expect("broker task panicked")
            .expect("serve_forever failed");
    }
}

fn authenticator() -> MemoryAuthenticator {
    MemoryAuthenticator::new()
        .with_record(
            CredentialRecord::new("test", "secret")
                .with_pubchans(["test-chan", "secret-chan"])
                .with_subchans(["test-chan"]),
        )
        .with_record(CredentialRecord::new("observer", "observer-secret").with_subchans(["test-chan"]))
}

async fn start_broker() -> Broker {
    let counters = Arc::new(BrokerCounters::new());
    let server = Server::bind(
        "127.0.0.1:0",
        Arc::new(authenticator()),
        BrokerSettings::default(),
    )
    .await
    .expect("bind")
    .with_metrics(counters.clone());

    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let server = Arc::new(server);
    let running = tokio::spawn({
        let server = server.clone();
        async move { server.serve_forever().await }
    });

    Broker {
        addr,
        server,
        counters,
        shutdown,
        running,
    }
}

/// Poll `condition` until it holds or the wait budget runs out.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn read(client: &mut Client) -> Delivery {
    timeout(WAIT, client.read())
        .await
        .expect("no delivery in time")
        .expect("read failed")
}

/// A raw framed socket that has already consumed the broker's `Info`.
async fn raw_connect(addr: SocketAddr) -> (Framed<TcpStream, FrameCodec>, Bytes) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, FrameCodec::default());
    match timeout(WAIT, framed.next()).await.unwrap() {
        Some(Ok(Message::Info { nonce, .. })) => (framed, nonce),
        other => panic!("expected Info, got {other:?}"),
    }
}

/// The broker closes without sending anything further.
async fn assert_closed(framed: &mut Framed<TcpStream, FrameCodec>) {
    let next = timeout(WAIT, framed.next())
        .await
        .expect("connection not closed in time");
    assert!(
        matches!(next, None | Some(Err(_))),
        "expected close, got {next:?}"
    );
}

#[tokio::test]
async fn test_single_client_loopback_and_metrics() {
    let broker = start_broker().await;

    let mut client = Client::connect(broker.addr, "test", "secret").await.unwrap();
    assert_eq!(client.broker_name(), "feedbroker");
    client.subscribe("test-chan").await.unwrap();
    client.publish("test-chan", "hello").await.unwrap();

    assert_eq!(
        read(&mut client).await,
        Delivery {
            identity: "test".to_string(),
            channel: "test-chan".to_string(),
            payload: Bytes::from_static(b"hello"),
        }
    );
    assert_eq!(broker.counters.snapshot().connections_ready("test"), 1);

    let counters = broker.counters.clone();
    broker.stop().await;

    let snapshot = counters.snapshot();
    assert_eq!(snapshot.client_connections, 0);
    assert_eq!(snapshot.connections_lost("test"), 1);
    assert_eq!(snapshot.messages_published, 1);
    assert_eq!(snapshot.messages_delivered, 1);
}

#[tokio::test]
async fn test_subscription_window_controls_delivery() {
    let broker = start_broker().await;
    let mut client = Client::connect(broker.addr, "test", "secret").await.unwrap();
    let mut observer = Client::connect(broker.addr, "observer", "observer-secret")
        .await
        .unwrap();
    observer.subscribe("test-chan").await.unwrap();
    wait_until(|| broker.registry().subscribers("test-chan").len() == 1).await;

    // Frames on one connection are handled in order, so "early" is routed
    // before the subscribe takes effect.
    client.publish("test-chan", "early").await.unwrap();
    client.subscribe("test-chan").await.unwrap();
    client.publish("test-chan", "late").await.unwrap();
    assert_eq!(read(&mut client).await.payload, "late");

    client.unsubscribe("test-chan").await.unwrap();
    client.publish("test-chan", "after").await.unwrap();

    assert_eq!(read(&mut observer).await.payload, "early");
    assert_eq!(read(&mut observer).await.payload, "late");
    assert_eq!(read(&mut observer).await.payload, "after");

    // Resubscribe and publish a marker: it must be the next thing delivered.
    client.subscribe("test-chan").await.unwrap();
    client.publish("test-chan", "marker").await.unwrap();
    assert_eq!(read(&mut client).await.payload, "marker");

    broker.stop().await;
}

#[tokio::test]
async fn test_disconnect_cleans_up_registry() {
    let broker = start_broker().await;

    let mut first = Client::connect(broker.addr, "test", "secret").await.unwrap();
    let mut second = Client::connect(broker.addr, "observer", "observer-secret")
        .await
        .unwrap();
    first.subscribe("test-chan").await.unwrap();
    second.subscribe("test-chan").await.unwrap();
    wait_until(|| broker.registry().subscribers("test-chan").len() == 2).await;
    assert_eq!(broker.server.connections(), 2);

    drop(first);
    second.close().await.unwrap();

    wait_until(|| broker.registry().is_empty()).await;
    assert!(broker.registry().subscribers("test-chan").is_empty());
    assert_eq!(broker.registry().channel_count(), 0);

    broker.stop().await;
}

#[tokio::test]
async fn test_bad_proof_gets_error_then_close() {
    let broker = start_broker().await;
    let (mut framed, nonce) = raw_connect(broker.addr).await;

    framed
        .send(Message::Auth {
            identity: "test".to_string(),
            proof: Bytes::copy_from_slice(&compute_proof(&nonce, "wrong")),
        })
        .await
        .unwrap();

    match timeout(WAIT, framed.next()).await.unwrap() {
        Some(Ok(Message::Error { reason })) => assert_eq!(reason, "authentication failed"),
        other => panic!("expected Error, got {other:?}"),
    }
    assert_closed(&mut framed).await;
    assert!(broker.registry().is_empty());
    assert_eq!(broker.counters.snapshot().auth_failures, 1);

    broker.stop().await;
}

#[tokio::test]
async fn test_client_rejected_with_wrong_secret() {
    let broker = start_broker().await;

    let mut client = Client::connect(broker.addr, "test", "wrong").await.unwrap();
    let err = timeout(WAIT, client.read()).await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Broker(reason) if reason == "authentication failed"));

    broker.stop().await;
}

#[tokio::test]
async fn test_message_before_auth_is_dropped() {
    let broker = start_broker().await;
    let (mut framed, _nonce) = raw_connect(broker.addr).await;

    framed
        .send(Message::Subscribe {
            channel: "test-chan".to_string(),
        })
        .await
        .unwrap();

    assert_closed(&mut framed).await;
    assert!(broker.registry().subscribers("test-chan").is_empty());

    broker.stop().await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let broker = start_broker().await;
    let (mut framed, _nonce) = raw_connect(broker.addr).await;

    let mut header = BytesMut::new();
    header.put_u32(2 * 1024 * 1024);
    header.put_u8(3);
    framed.get_mut().write_all(&header).await.unwrap();

    assert_closed(&mut framed).await;

    broker.stop().await;
}

#[tokio::test]
async fn test_unauthorized_subscribe_has_no_effect() {
    let broker = start_broker().await;

    let mut observer = Client::connect(broker.addr, "observer", "observer-secret")
        .await
        .unwrap();
    observer.subscribe("secret-chan").await.unwrap();
    observer.subscribe("test-chan").await.unwrap();
    wait_until(|| broker.registry().subscribers("test-chan").len() == 1).await;
    assert!(broker.registry().subscribers("secret-chan").is_empty());

    let mut publisher = Client::connect(broker.addr, "test", "secret").await.unwrap();
    publisher.publish("secret-chan", "hidden").await.unwrap();
    publisher.publish("test-chan", "visible").await.unwrap();

    let delivery = read(&mut observer).await;
    assert_eq!(delivery.channel, "test-chan");
    assert_eq!(delivery.payload, "visible");

    broker.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_live_clients() {
    let broker = start_broker().await;

    let mut first = Client::connect(broker.addr, "test", "secret").await.unwrap();
    let mut second = Client::connect(broker.addr, "observer", "observer-secret")
        .await
        .unwrap();
    first.subscribe("test-chan").await.unwrap();
    second.subscribe("test-chan").await.unwrap();
    wait_until(|| broker.registry().subscribers("test-chan").len() == 2).await;

    let registry = broker.registry().clone();
    broker.stop().await;
    assert!(registry.is_empty());

    for client in [&mut first, &mut second] {
        let result = timeout(WAIT, client.read()).await.unwrap();
        assert!(matches!(
            result,
            Err(ClientError::Closed | ClientError::Io(_) | ClientError::Framing(_))
        ));
    }
}

#[tokio::test]
async fn test_shutdown_returns_after_connections_deregister() {
    let broker = start_broker().await;

    let mut client = Client::connect(broker.addr, "test", "secret").await.unwrap();
    client.subscribe("test-chan").await.unwrap();
    wait_until(|| broker.registry().subscribers("test-chan").len() == 1).await;

    timeout(WAIT, broker.shutdown.shutdown())
        .await
        .expect("shutdown did not drain");

    // No polling: the drain is complete once shutdown returns.
    assert!(broker.registry().is_empty());
    assert_eq!(broker.registry().channel_count(), 0);
    assert_eq!(broker.counters.snapshot().client_connections, 0);

    timeout(WAIT, broker.running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_aborting_serve_forever_closes_connections() {
    let broker = start_broker().await;

    let mut client = Client::connect(broker.addr, "test", "secret").await.unwrap();
    client.subscribe("test-chan").await.unwrap();
    wait_until(|| broker.registry().subscribers("test-chan").len() == 1).await;

    broker.running.abort();
    assert!(broker.running.await.unwrap_err().is_cancelled());
    assert!(broker.shutdown.is_shutdown());

    timeout(WAIT, broker.shutdown.shutdown())
        .await
        .expect("shutdown did not drain");
    assert!(broker.server.registry().is_empty());
}
