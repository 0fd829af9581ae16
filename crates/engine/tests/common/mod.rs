//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reflux_engine::error::Error;
use reflux_engine::{
    ChannelSubscriber, Connector, Payload, RSocket, Responder, Server, SetupConfig, Subscriber,
};
use reflux_transport_memory::MemoryTransport;

/// What a [`Recorder`] saw, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Next(String, bool),
    Complete,
    Error(Error),
    Request(u32),
    Cancel,
}

/// Subscriber that records every callback.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn received(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Next(data, _) => Some(data),
                _ => None,
            })
            .collect()
    }

    pub async fn wait_for(&self, f: impl Fn(&[Event]) -> bool) {
        eventually(|| f(&self.events.lock())).await;
    }
}

impl Subscriber for Recorder {
    fn on_next(&mut self, payload: Payload, complete: bool) {
        let data = payload.data_utf8().unwrap_or_default();
        self.events.lock().push(Event::Next(data, complete));
    }

    fn on_error(&mut self, error: Error) {
        self.events.lock().push(Event::Error(error));
    }

    fn on_complete(&mut self) {
        self.events.lock().push(Event::Complete);
    }
}

impl ChannelSubscriber for Recorder {
    fn request(&mut self, n: u32) {
        self.events.lock().push(Event::Request(n));
    }

    fn cancel(&mut self) {
        self.events.lock().push(Event::Cancel);
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// A client and server connected over an in-memory pair.
pub async fn connect(responder: impl Responder) -> (RSocket, RSocket) {
    connect_with(Connector::new(), responder).await
}

pub async fn connect_with(connector: Connector, responder: impl Responder) -> (RSocket, RSocket) {
    let (client, server) = MemoryTransport::pair();

    let client = connector.start(client).await.expect("setup sent");

    let responder: Arc<dyn Responder> = Arc::new(responder);
    let server = Server::new(move |_: &SetupConfig| Ok::<_, Error>(Arc::clone(&responder)))
        .establish(server)
        .await
        .expect("setup accepted");

    (client, server)
}
