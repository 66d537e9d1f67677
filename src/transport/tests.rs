use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use super::Server;
use crate::auth::MemoryAuthenticator;
use crate::config::BrokerSettings;
use crate::protocol::{FrameCodec, Message};

const WAIT: Duration = Duration::from_secs(5);

async fn bind(settings: BrokerSettings) -> Server {
    Server::bind("127.0.0.1:0", Arc::new(MemoryAuthenticator::new()), settings)
        .await
        .expect("bind")
}

#[tokio::test]
async fn test_bind_ephemeral_port() {
    let server = bind(BrokerSettings::default()).await;
    let addr = server.local_addr().unwrap();
    assert_ne!(addr.port(), 0);
    assert_eq!(server.connections(), 0);
}

#[tokio::test]
async fn test_from_std_listener() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let expected = listener.local_addr().unwrap();
    let server = Server::from_std(
        listener,
        Arc::new(MemoryAuthenticator::new()),
        BrokerSettings::default(),
    )
    .unwrap();
    assert_eq!(server.local_addr().unwrap(), expected);
}

#[tokio::test]
async fn test_shutdown_before_serving_returns() {
    let server = bind(BrokerSettings::default()).await;
    let handle = server.shutdown_handle();
    assert!(!handle.is_shutdown());
    handle.shutdown().await;
    assert!(handle.is_shutdown());

    timeout(WAIT, server.serve_forever())
        .await
        .expect("serve_forever did not return")
        .unwrap();
}

#[tokio::test]
async fn test_accepted_socket_receives_greeting() {
    let settings = BrokerSettings {
        name: "test-broker".to_string(),
        ..BrokerSettings::default()
    };
    let server = Arc::new(bind(settings).await);
    let addr = server.local_addr().unwrap();
    let handle = server.shutdown_handle();
    let running = tokio::spawn({
        let server = server.clone();
        async move { server.serve_forever().await }
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, FrameCodec::default());
    match timeout(WAIT, framed.next()).await.unwrap() {
        Some(Ok(Message::Info { banner, nonce })) => {
            assert_eq!(banner, "test-broker");
            assert_eq!(nonce.len(), 4);
        }
        other => panic!("expected Info, got {other:?}"),
    }

    timeout(WAIT, handle.shutdown()).await.unwrap();
    assert!(server.registry().is_empty());
    timeout(WAIT, running).await.unwrap().unwrap().unwrap();

    // The open socket is closed by the broker on shutdown.
    let next = timeout(WAIT, framed.next()).await.unwrap();
    assert!(next.is_none() || matches!(next, Some(Err(_))));
}

#[tokio::test]
async fn test_connection_limit_refuses_extra_sockets() {
    let settings = BrokerSettings {
        max_connections: 1,
        ..BrokerSettings::default()
    };
    let server = Arc::new(bind(settings).await);
    let addr = server.local_addr().unwrap();
    let handle = server.shutdown_handle();
    let running = tokio::spawn({
        let server = server.clone();
        async move { server.serve_forever().await }
    });

    let first = TcpStream::connect(addr).await.unwrap();
    let mut first = Framed::new(first, FrameCodec::default());
    assert!(matches!(
        timeout(WAIT, first.next()).await.unwrap(),
        Some(Ok(Message::Info { .. }))
    ));

    let second = TcpStream::connect(addr).await.unwrap();
    let mut second = Framed::new(second, FrameCodec::default());
    let refused = timeout(WAIT, second.next()).await.unwrap();
    assert!(refused.is_none() || matches!(refused, Some(Err(_))));

    timeout(WAIT, handle.shutdown()).await.unwrap();
    assert!(server.registry().is_empty());
    timeout(WAIT, running).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_cancel_stops_accept_loop() {
    let server = Arc::new(bind(BrokerSettings::default()).await);
    let handle = server.shutdown_handle();
    let running = tokio::spawn({
        let server = server.clone();
        async move { server.serve_forever().await }
    });

    handle.cancel();
    assert!(handle.is_shutdown());
    timeout(WAIT, running).await.unwrap().unwrap().unwrap();
}
