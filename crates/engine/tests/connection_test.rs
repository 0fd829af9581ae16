//! Connection setup, keep-alive and termination.

mod common;
use common::{Event, Recorder, connect};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reflux_engine::error::{ConnectionError, Error, ProtocolError, Result};
use reflux_engine::frame::{Body, Frame, Setup};
use reflux_engine::{Connector, ErrorCode, Outcome, Payload, Responder, Server, SetupConfig};
use reflux_transport::{Connection, Transport};
use reflux_transport_memory::MemoryTransport;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

struct Stall;

#[async_trait]
impl Responder for Stall {
    async fn request_response(&self, _payload: Payload) -> Result<Payload> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Payload::default())
    }
}

struct Ping;

#[async_trait]
impl Responder for Ping {
    async fn request_response(&self, _payload: Payload) -> Result<Payload> {
        Ok(Payload::from_data("pong"))
    }
}

async fn next_frame(connection: &dyn Connection) -> Frame {
    let bytes = timeout(Duration::from_secs(2), connection.recv())
        .await
        .expect("frame in time")
        .expect("connection open");
    Frame::decode(bytes).unwrap().expect("known frame")
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_setup_frame_carries_config() {
    let (client, server) = MemoryTransport::pair();

    let setup = SetupConfig {
        keep_alive: Duration::from_secs(5),
        lifetime: Duration::from_secs(30),
        payload: Payload::from_metadata("hello"),
        ..SetupConfig::default()
    };
    let _socket = Connector::new().setup(setup).start(client).await.unwrap();

    let frame = next_frame(&*server).await;
    assert_eq!(frame.stream_id, 0);
    let Body::Setup(setup) = frame.body else {
        panic!("expected SETUP, got {frame:?}");
    };
    assert_eq!(setup.keep_alive, 5000);
    assert_eq!(setup.lifetime, 30_000);
    assert_eq!(setup.data_mime_type, "application/json");
    assert_eq!(setup.payload.metadata().map(Bytes::as_ref), Some(&b"hello"[..]));
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_acceptor_rejection_reaches_client() {
    let (client, server) = MemoryTransport::pair();
    let socket = Connector::new().start(client).await.unwrap();

    let acceptor = |setup: &SetupConfig| -> Result<Arc<dyn Responder>> {
        Err(Error::rejected(format!("{} not welcome", setup.data_mime_type)))
    };
    let result = Server::new(acceptor).establish(server).await;
    assert!(matches!(
        result,
        Err(Error::Connection(ConnectionError::Rejected {
            code: ErrorCode::REJECTED_SETUP,
            ..
        }))
    ));

    let reason = timeout(Duration::from_secs(2), socket.closed()).await.unwrap();
    assert_eq!(
        reason,
        Error::Connection(ConnectionError::Rejected {
            code: ErrorCode::REJECTED_SETUP,
            message: "application/json not welcome".to_string(),
        })
    );
    assert!(socket.is_closed());
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_first_frame_must_be_setup() {
    let (client, server) = MemoryTransport::pair();

    let keep_alive = Frame::new(
        0,
        Body::KeepAlive {
            respond: true,
            last_received_position: 0,
            data: None,
        },
    );
    client.send(keep_alive.encode().unwrap()).await.unwrap();

    let acceptor = |_: &SetupConfig| -> Result<Arc<dyn Responder>> { Ok(Arc::new(Ping)) };
    let result = Server::new(acceptor).establish(server).await;
    assert!(matches!(
        result,
        Err(Error::Connection(ConnectionError::Rejected {
            code: ErrorCode::INVALID_SETUP,
            ..
        }))
    ));

    let frame = next_frame(&*client).await;
    assert!(matches!(
        frame.body,
        Body::Error {
            code: ErrorCode::INVALID_SETUP,
            ..
        }
    ));
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_unsupported_version_is_refused() {
    let (client, server) = MemoryTransport::pair();

    let config = SetupConfig::default();
    let mut frame = Frame::new(0, Body::Setup(Setup {
        major_version: 2,
        minor_version: 0,
        keep_alive: 1000,
        lifetime: 1000,
        resume_token: None,
        lease: false,
        metadata_mime_type: config.metadata_mime_type.clone(),
        data_mime_type: config.data_mime_type.clone(),
        payload: Payload::default(),
    }));
    client.send(frame.encode().unwrap()).await.unwrap();

    let acceptor = |_: &SetupConfig| -> Result<Arc<dyn Responder>> { Ok(Arc::new(Ping)) };
    let result = Server::new(acceptor).establish(server).await;
    assert!(matches!(
        result,
        Err(Error::Connection(ConnectionError::Rejected {
            code: ErrorCode::UNSUPPORTED_SETUP,
            ..
        }))
    ));

    // Lease is refused the same way
    let (client, server) = MemoryTransport::pair();
    if let Body::Setup(setup) = &mut frame.body {
        setup.major_version = 1;
        setup.lease = true;
    }
    client.send(frame.encode().unwrap()).await.unwrap();
    let result = Server::new(acceptor).establish(server).await;
    assert!(matches!(
        result,
        Err(Error::Connection(ConnectionError::Rejected {
            code: ErrorCode::UNSUPPORTED_SETUP,
            ..
        }))
    ));
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_close_fails_live_interactions() {
    let (client, server) = connect(Stall).await;
    let recorder = Recorder::default();

    let handle = client
        .request_response(Payload::from_data("[1]"), recorder.clone())
        .unwrap();

    client.close();

    let closed = Error::Connection(ConnectionError::Closed);
    assert_eq!(handle.closed().await, Outcome::Errored(closed.clone()));
    assert_eq!(recorder.events(), vec![Event::Error(closed.clone())]);

    // Nothing new starts on a closed connection
    assert_eq!(
        client
            .request_response(Payload::default(), Recorder::default())
            .unwrap_err(),
        closed
    );

    // The peer notices the transport going away
    let reason = timeout(Duration::from_secs(2), server.closed()).await.unwrap();
    assert_eq!(reason, closed);
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_keepalive_is_answered() {
    let (client, raw) = MemoryTransport::pair();
    let socket = Connector::new().start(client).await.unwrap();
    assert!(matches!(next_frame(&*raw).await.body, Body::Setup(_)));

    let ping = Frame::new(
        0,
        Body::KeepAlive {
            respond: true,
            last_received_position: 0,
            data: Some(Bytes::from_static(b"ping")),
        },
    );
    raw.send(ping.encode().unwrap()).await.unwrap();

    let frame = next_frame(&*raw).await;
    assert_eq!(
        frame.body,
        Body::KeepAlive {
            respond: false,
            last_received_position: 0,
            data: Some(Bytes::from_static(b"ping")),
        }
    );
    assert!(!socket.is_closed());
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_silent_peer_times_out() {
    let (client, raw) = MemoryTransport::pair();
    let setup = SetupConfig {
        keep_alive: Duration::from_millis(10),
        lifetime: Duration::from_millis(60),
        ..SetupConfig::default()
    };
    let socket = Connector::new().setup(setup).start(client).await.unwrap();

    assert!(matches!(next_frame(&*raw).await.body, Body::Setup(_)));
    assert!(matches!(
        next_frame(&*raw).await.body,
        Body::KeepAlive { respond: true, .. }
    ));

    let reason = timeout(Duration::from_secs(2), socket.closed()).await.unwrap();
    assert_eq!(
        reason,
        Error::Connection(ConnectionError::KeepAliveTimeout(Duration::from_millis(60)))
    );
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_malformed_frame_terminates_connection() {
    let (client, raw) = MemoryTransport::pair();
    let socket = Connector::new().start(client).await.unwrap();
    assert!(matches!(next_frame(&*raw).await.body, Body::Setup(_)));

    // Frame type 0x30 is undefined and the ignore flag is clear
    raw.send(Bytes::from_static(&[0, 0, 0, 1, 0xC0, 0x00]))
        .await
        .unwrap();

    let reason = timeout(Duration::from_secs(2), socket.closed()).await.unwrap();
    assert_eq!(
        reason,
        Error::Protocol(ProtocolError::UnknownFrameType(0x30))
    );

    let frame = next_frame(&*raw).await;
    assert_eq!(frame.stream_id, 0);
    assert!(matches!(
        frame.body,
        Body::Error {
            code: ErrorCode::CONNECTION_ERROR,
            ..
        }
    ));
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_server_serves_listener_until_shutdown() {
    let name = "engine-server-test";
    let listener = MemoryTransport::listening_on(name).listen().await.unwrap();

    let acceptor = |_: &SetupConfig| -> Result<Arc<dyn Responder>> { Ok(Arc::new(Ping)) };
    let shutdown = CancellationToken::new();
    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { Server::new(acceptor).serve(listener, shutdown).await }
    });

    let url = format!("memory://{name}").parse().unwrap();
    let socket = Connector::new()
        .connect(&MemoryTransport::default(), &url)
        .await
        .unwrap();

    let recorder = Recorder::default();
    let handle = socket
        .request_response(Payload::from_data("ping"), recorder.clone())
        .unwrap();
    assert_eq!(handle.closed().await, Outcome::Completed);
    assert_eq!(recorder.received(), vec!["pong"]);

    shutdown.cancel();
    timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // Shutting down closes served connections too
    let reason = timeout(Duration::from_secs(2), socket.closed()).await.unwrap();
    assert_eq!(reason, Error::Connection(ConnectionError::Closed));
}
