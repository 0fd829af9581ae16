//! Integration tests for TCP transport

use std::time::Duration;

use bytes::Bytes;
use reflux_transport::{Listener, Transport, TransportError};
use reflux_transport_tcp::TcpTransport;
use tokio::time::timeout;
use tracing::info;
use url::Url;

#[tokio::test]
async fn test_tcp_echo() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpTransport::default().bind().await.unwrap();
    let addr = listener.local_addr();
    info!("Listening on {addr}");

    let server = tokio::spawn(async move {
        let conn = listener.accept().await.unwrap();
        while let Ok(frame) = conn.recv().await {
            if conn.send(frame).await.is_err() {
                break;
            }
        }
    });

    let url = Url::parse(&format!("tcp://{addr}")).unwrap();
    let client = TcpTransport::default().connect(&url).await.unwrap();

    let messages = [
        Bytes::from_static(b"one"),
        Bytes::new(),
        Bytes::from(vec![7u8; 70_000]),
    ];

    for msg in &messages {
        client.send(msg.clone()).await.unwrap();
    }

    // Frames come back with their boundaries intact
    for msg in &messages {
        let echoed = timeout(Duration::from_secs(5), client.recv())
            .await
            .expect("Timeout waiting for echo")
            .unwrap();
        assert_eq!(&echoed, msg);
    }

    client.close().await.unwrap();
    timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not observe close")
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_send_and_recv() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpTransport::default().bind().await.unwrap();
    let url = Url::parse(&format!("tcp://{}", listener.local_addr())).unwrap();

    let client = TcpTransport::default().connect(&url).await.unwrap();
    let server = listener.accept().await.unwrap();

    // A pending recv must not block sends on the same connection
    let (client, server) = (std::sync::Arc::new(client), std::sync::Arc::new(server));
    let reader = {
        let client = client.clone();
        tokio::spawn(async move { client.recv().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    client.send(Bytes::from_static(b"ping")).await.unwrap();
    assert_eq!(server.recv().await.unwrap(), Bytes::from_static(b"ping"));

    server.send(Bytes::from_static(b"pong")).await.unwrap();
    assert_eq!(reader.await.unwrap().unwrap(), Bytes::from_static(b"pong"));
}

#[tokio::test]
async fn test_connect_refused() {
    let _ = tracing_subscriber::fmt::try_init();

    // Bind then drop to find a port nobody listens on
    let addr = {
        let listener = TcpTransport::default().bind().await.unwrap();
        let addr = listener.local_addr();
        listener.close().await.unwrap();
        addr
    };

    let url = Url::parse(&format!("tcp://{addr}")).unwrap();
    let result = TcpTransport::default().connect(&url).await;

    assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
}
