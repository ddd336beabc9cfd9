//! Scripted broker and recording listener shared by the integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use mqtt_toggle::mqtt::config::SessionConfig;
use mqtt_toggle::mqtt::error::ConnectFailure;
use mqtt_toggle::mqtt::listener::SessionListener;
use mqtt_toggle::mqtt::message::InboundMessage;
use mqtt_toggle::mqtt::session::{SessionHandle, SessionStatus};
use mqtt_toggle::mqtt::transport::{
    Generation, TaggedEvent, TransportEndpoint, TransportEvent, TransportLink, TransportRequest,
};
use mqtt_toggle::mqtt::{MessageId, QoS};
use tokio::sync::mpsc::error::TryRecvError;

const WAIT: Duration = Duration::from_secs(2);

/// Stands in for the protocol engine: tests read what the session asked for
/// and answer with whatever the broker should have said. Answers belong to
/// the latest connection attempt unless sent with [`FakeBroker::send_from`].
pub struct FakeBroker {
    endpoint: TransportEndpoint,
    generation: Generation,
}

#[derive(Debug)]
pub struct PublishSeen {
    pub id: Option<MessageId>,
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl FakeBroker {
    pub async fn next_request(&mut self) -> TransportRequest {
        let request = tokio::time::timeout(WAIT, self.endpoint.requests.recv())
            .await
            .expect("timed out waiting for a transport request")
            .expect("session dropped the transport link");
        if let TransportRequest::Connect { generation } = request {
            self.generation = generation;
        }
        request
    }

    /// Asserts the session has not asked for anything since the last read
    pub fn assert_idle(&mut self) {
        match self.endpoint.requests.try_recv() {
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            Ok(request) => panic!("unexpected transport request: {:?}", request),
        }
    }

    pub async fn send(&self, event: TransportEvent) {
        self.send_from(self.generation, event).await;
    }

    /// Sends an event as if it came from the connection of `generation`
    pub async fn send_from(&self, generation: Generation, event: TransportEvent) {
        self.endpoint
            .events
            .send(TaggedEvent::new(generation, event))
            .await
            .expect("session dropped the event channel");
    }

    /// Reads a connect request and returns its generation
    pub async fn expect_connect(&mut self) -> Generation {
        match self.next_request().await {
            TransportRequest::Connect { generation } => generation,
            other => panic!("expected CONNECT, got {:?}", other),
        }
    }

    pub async fn accept_connection(&mut self) {
        self.expect_connect().await;
        self.send(TransportEvent::Connected).await;
    }

    pub async fn refuse_connection(&mut self, code: &str) {
        self.expect_connect().await;
        self.send(TransportEvent::ConnectFailed(ConnectFailure::Refused(
            code.to_string(),
        )))
        .await;
    }

    pub async fn expect_subscribe(&mut self) -> (MessageId, String, QoS) {
        match self.next_request().await {
            TransportRequest::Subscribe { id, topic, qos } => (id, topic, qos),
            other => panic!("expected SUBSCRIBE, got {:?}", other),
        }
    }

    pub async fn expect_publish(&mut self) -> PublishSeen {
        match self.next_request().await {
            TransportRequest::Publish {
                id,
                topic,
                payload,
                qos,
                retain,
            } => PublishSeen {
                id,
                topic,
                payload,
                qos,
                retain,
            },
            other => panic!("expected PUBLISH, got {:?}", other),
        }
    }

    /// Answers the next subscribe with `granted`
    pub async fn grant_subscribe(&mut self, granted: QoS) -> (MessageId, String, QoS) {
        let (id, topic, qos) = self.expect_subscribe().await;
        self.send(TransportEvent::SubAck {
            id,
            granted: Some(granted),
        })
        .await;
        (id, topic, qos)
    }

    pub async fn deliver(&self, id: MessageId) {
        self.send(TransportEvent::Delivered(id)).await;
    }
}

pub fn spawn_session(config: SessionConfig) -> (SessionHandle, FakeBroker) {
    let (link, endpoint) = TransportLink::pair(16);
    let session = SessionHandle::spawn(link, &config);
    let broker = FakeBroker {
        endpoint,
        generation: 0,
    };
    (session, broker)
}

/// Session connected to the fake broker
pub async fn connected_session(config: SessionConfig) -> (SessionHandle, FakeBroker) {
    let (session, mut broker) = spawn_session(config);
    let connect = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    broker.accept_connection().await;
    connect
        .await
        .expect("connect task panicked")
        .expect("connect failed");
    (session, broker)
}

pub async fn wait_for_status(session: &SessionHandle, status: SessionStatus) {
    let mut rx = session.status_watch();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == status))
        .await
        .expect("timed out waiting for status")
        .expect("session stopped");
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recorded {
    Status(SessionStatus),
    Message { topic: String, payload: Bytes },
    Delivered(MessageId),
}

/// Listener that remembers every callback in order
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    /// Polls until `done` holds for the recorded events
    pub async fn wait_until(&self, done: impl Fn(&[Recorded]) -> bool) {
        let poll = async {
            while !done(&self.events()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(WAIT, poll)
            .await
            .expect("timed out waiting for listener events");
    }

    pub fn delivered(&self) -> Vec<MessageId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Delivered(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl SessionListener for RecordingListener {
    fn on_status_changed(&self, status: SessionStatus) {
        self.events.lock().unwrap().push(Recorded::Status(status));
    }

    fn on_message(&self, message: &InboundMessage) {
        self.events.lock().unwrap().push(Recorded::Message {
            topic: message.topic.clone(),
            payload: message.payload.clone(),
        });
    }

    fn on_delivered(&self, id: MessageId) {
        self.events.lock().unwrap().push(Recorded::Delivered(id));
    }
}
