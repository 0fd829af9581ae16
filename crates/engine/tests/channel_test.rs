//! Request-channel over an in-memory connection.

mod common;
use common::{Event, Recorder, connect, eventually};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reflux_engine::error::{ContractViolation, Error, Result};
use reflux_engine::{
    ChannelRequester, ChannelSubscriber, ErrorCode, Outcome, Payload, Responder, Subscriber,
};
use tokio::time::timeout;

/// Echoes every message back and asks for one more each time.
struct EchoChannel;

struct Echo {
    requester: ChannelRequester,
}

#[async_trait]
impl Responder for EchoChannel {
    async fn request_channel(
        &self,
        payload: Payload,
        complete: bool,
        requester: ChannelRequester,
    ) -> Result<Box<dyn ChannelSubscriber>> {
        requester.on_next(payload, complete)?;
        if !complete {
            requester.request(1)?;
        }
        Ok(Box::new(Echo { requester }))
    }
}

impl Subscriber for Echo {
    fn on_next(&mut self, payload: Payload, complete: bool) {
        self.requester.on_next(payload, complete).unwrap();
        if !complete {
            self.requester.request(1).unwrap();
        }
    }

    fn on_error(&mut self, _error: Error) {}

    fn on_complete(&mut self) {
        self.requester.on_complete().unwrap();
    }
}

impl ChannelSubscriber for Echo {
    fn request(&mut self, _n: u32) {}
}

/// Sends numbered messages as credit arrives and grants one per message.
struct Counter {
    requester: ChannelRequester,
    next: u32,
    total: u32,
    recorder: Recorder,
}

impl Subscriber for Counter {
    fn on_next(&mut self, payload: Payload, complete: bool) {
        self.recorder.on_next(payload, complete);
        if !complete {
            self.requester.request(1).unwrap();
        }
    }

    fn on_error(&mut self, error: Error) {
        self.recorder.on_error(error);
    }

    fn on_complete(&mut self) {
        self.recorder.on_complete();
    }
}

impl ChannelSubscriber for Counter {
    fn request(&mut self, n: u32) {
        self.recorder.request(n);
        for _ in 0..n {
            if self.next >= self.total {
                break;
            }
            let last = self.next + 1 == self.total;
            self.requester
                .on_next(Payload::from_data(self.next.to_string()), last)
                .unwrap();
            self.next += 1;
        }
    }
}

/// Hands the responding side of every channel to the test.
#[derive(Clone, Default)]
struct Hold {
    requesters: Arc<Mutex<Vec<ChannelRequester>>>,
    recorder: Recorder,
}

#[async_trait]
impl Responder for Hold {
    async fn request_channel(
        &self,
        _payload: Payload,
        _complete: bool,
        requester: ChannelRequester,
    ) -> Result<Box<dyn ChannelSubscriber>> {
        self.requesters.lock().push(requester);
        Ok(Box::new(self.recorder.clone()))
    }
}

impl Hold {
    fn requester(&self) -> Option<ChannelRequester> {
        self.requesters.lock().first().cloned()
    }
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_echo_channel_completes_both_sides() {
    let (client, _server) = connect(EchoChannel).await;
    let recorder = Recorder::default();

    let requester = client
        .request_channel(Payload::from_data("start"), 1, false, |requester| Counter {
            requester,
            next: 0,
            total: 3,
            recorder: recorder.clone(),
        })
        .unwrap();

    let outcome = timeout(Duration::from_secs(2), requester.closed()).await.unwrap();
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(recorder.received(), vec!["start", "0", "1", "2"]);
    assert!(recorder.events().contains(&Event::Next("2".to_string(), true)));

    let stats = requester.stats();
    assert_eq!(stats.sent, 3);
    assert!(stats.sent <= stats.granted_outbound);
    assert_eq!(stats.received, 4);
    assert_eq!(stats.queued, 0);
    assert!(requester.is_terminated());
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_sends_wait_for_credit() {
    let hold = Hold::default();
    let (client, _server) = connect(hold.clone()).await;

    let requester = client
        .request_channel(Payload::from_data("open"), 1, false, |_| Recorder::default())
        .unwrap();

    requester.on_next(Payload::from_data("a"), false).unwrap();
    requester.on_next(Payload::from_data("b"), false).unwrap();
    requester.on_next(Payload::from_data("c"), true).unwrap();
    assert_eq!(requester.stats().queued, 3);
    assert_eq!(requester.stats().sent, 0);

    eventually(|| hold.requester().is_some()).await;
    let responding = hold.requester().unwrap();

    // The opening payload goes to the handler; the subscriber starts with credit
    hold.recorder
        .wait_for(|events| events.contains(&Event::Request(1)))
        .await;
    assert_eq!(hold.recorder.events(), vec![Event::Request(1)]);

    responding.request(2).unwrap();
    eventually(|| requester.stats().sent == 2).await;
    assert_eq!(requester.stats().queued, 1);
    hold.recorder
        .wait_for(|events| events.contains(&Event::Next("b".to_string(), false)))
        .await;
    assert_eq!(hold.recorder.received(), vec!["a", "b"]);

    responding.request(1).unwrap();
    hold.recorder
        .wait_for(|events| events.contains(&Event::Next("c".to_string(), true)))
        .await;
    assert_eq!(requester.stats().queued, 0);
    assert!(!requester.is_terminated());

    // Outbound finished, inbound still open until the responder completes
    responding.on_complete().unwrap();
    assert_eq!(requester.closed().await, Outcome::Completed);
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_completion_travels_without_credit() {
    let hold = Hold::default();
    let (client, _server) = connect(hold.clone()).await;

    let requester = client
        .request_channel(Payload::from_data("open"), 1, false, |_| Recorder::default())
        .unwrap();

    requester.on_complete().unwrap();
    assert!(matches!(
        requester.on_next(Payload::from_data("late"), false),
        Err(Error::ContractViolation(ContractViolation::OutboundClosed))
    ));

    hold.recorder
        .wait_for(|events| events.contains(&Event::Complete))
        .await;
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_zero_initial_request_n_is_refused() {
    let (client, _server) = connect(EchoChannel).await;

    let result = client.request_channel(Payload::from_data("x"), 0, false, |_| Recorder::default());
    assert!(matches!(
        result,
        Err(Error::ContractViolation(ContractViolation::ZeroRequestN))
    ));
    assert_eq!(client.active_streams(), 0);
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_request_zero_is_contract_violation() {
    let (client, _server) = connect(Hold::default()).await;

    let requester = client
        .request_channel(Payload::from_data("x"), 1, false, |_| Recorder::default())
        .unwrap();

    assert!(matches!(
        requester.request(0),
        Err(Error::ContractViolation(ContractViolation::ZeroRequestN))
    ));
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_cancel_reaches_responder() {
    let hold = Hold::default();
    let (client, _server) = connect(hold.clone()).await;
    let recorder = Recorder::default();

    let requester = client
        .request_channel(Payload::from_data("x"), 1, false, {
            let recorder = recorder.clone();
            move |_| recorder
        })
        .unwrap();

    eventually(|| hold.requester().is_some()).await;
    hold.recorder
        .wait_for(|events| events.contains(&Event::Request(1)))
        .await;

    requester.cancel();
    assert_eq!(requester.closed().await, Outcome::Canceled);

    hold.recorder
        .wait_for(|events| events.contains(&Event::Cancel))
        .await;
    let responding = hold.requester().unwrap();
    assert_eq!(responding.closed().await, Outcome::Canceled);

    // Nothing reaches the canceled requester
    assert!(recorder.events().is_empty());
    assert!(matches!(
        responding.on_next(Payload::from_data("late"), false),
        Err(Error::ContractViolation(ContractViolation::OutboundClosed))
    ));
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_responder_error_fails_channel() {
    let hold = Hold::default();
    let (client, _server) = connect(hold.clone()).await;
    let recorder = Recorder::default();

    let requester = client
        .request_channel(Payload::from_data("x"), 1, false, {
            let recorder = recorder.clone();
            move |_| recorder
        })
        .unwrap();

    eventually(|| hold.requester().is_some()).await;
    hold.requester().unwrap().on_error("out of users");

    let expected = Error::Application {
        code: ErrorCode::APPLICATION_ERROR,
        message: "out of users".to_string(),
    };
    assert_eq!(requester.closed().await, Outcome::Errored(expected.clone()));
    assert_eq!(recorder.events(), vec![Event::Error(expected)]);
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_unsupported_channel_is_rejected() {
    struct Nothing;
    impl Responder for Nothing {}

    let (client, _server) = connect(Nothing).await;
    let recorder = Recorder::default();

    let requester = client
        .request_channel(Payload::from_data("x"), 1, false, {
            let recorder = recorder.clone();
            move |_| recorder
        })
        .unwrap();

    assert!(matches!(
        requester.closed().await,
        Outcome::Errored(Error::Application {
            code: ErrorCode::REJECTED,
            ..
        })
    ));
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_deferred_work_stops_with_channel() {
    let hold = Hold::default();
    let (client, _server) = connect(hold.clone()).await;

    let requester = client
        .request_channel(Payload::from_data("x"), 1, false, |_| Recorder::default())
        .unwrap();

    let fired = Arc::new(Mutex::new(false));
    let task = requester.spawn_deferred(Duration::from_secs(3600), {
        let fired = Arc::clone(&fired);
        move || *fired.lock() = true
    });

    requester.cancel();
    timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert!(!*fired.lock());
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_deferred_work_due_at_cancel_is_abandoned() {
    let (client, _server) = connect(Hold::default()).await;

    let requester = client
        .request_channel(Payload::from_data("x"), 1, false, |_| Recorder::default())
        .unwrap();

    let fired = Arc::new(Mutex::new(false));
    let task = requester.spawn_deferred(Duration::ZERO, {
        let fired = Arc::clone(&fired);
        move || *fired.lock() = true
    });

    // Timer and cancellation are both ready when the task first runs
    requester.cancel();
    timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert!(!*fired.lock());
}

/// Completes its own direction at once and blocks in the first `request`.
#[derive(Clone, Default)]
struct SlowStart {
    requesters: Arc<Mutex<Vec<ChannelRequester>>>,
    recorder: Recorder,
}

struct Sluggish {
    recorder: Recorder,
}

#[async_trait]
impl Responder for SlowStart {
    async fn request_channel(
        &self,
        _payload: Payload,
        _complete: bool,
        requester: ChannelRequester,
    ) -> Result<Box<dyn ChannelSubscriber>> {
        requester.on_complete()?;
        self.requesters.lock().push(requester);
        Ok(Box::new(Sluggish {
            recorder: self.recorder.clone(),
        }))
    }
}

impl Subscriber for Sluggish {
    fn on_next(&mut self, payload: Payload, complete: bool) {
        self.recorder.on_next(payload, complete);
    }

    fn on_error(&mut self, error: Error) {
        self.recorder.on_error(error);
    }

    fn on_complete(&mut self) {
        self.recorder.on_complete();
    }
}

impl ChannelSubscriber for Sluggish {
    fn request(&mut self, n: u32) {
        std::thread::sleep(Duration::from_millis(300));
        self.recorder.request(n);
    }
}

#[tracing_test::traced_test]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_outcome_waits_for_last_callback() {
    let slow = SlowStart::default();
    let (client, _server) = connect(slow.clone()).await;

    let requester = client
        .request_channel(Payload::from_data("x"), 1, false, |_| Recorder::default())
        .unwrap();

    eventually(|| !slow.requesters.lock().is_empty()).await;
    let responding = slow.requesters.lock()[0].clone();

    // Arrives while the responder's subscriber is still busy in `request`
    requester.on_complete().unwrap();

    let outcome = timeout(Duration::from_secs(2), responding.closed())
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(
        slow.recorder.events(),
        vec![Event::Request(1), Event::Complete]
    );

    assert_eq!(requester.closed().await, Outcome::Completed);
}
