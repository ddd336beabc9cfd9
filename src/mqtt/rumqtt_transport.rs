//! Transport backed by rumqttc
//!
//! Two tasks serve one [`TransportEndpoint`]:
//!
//! 1. **Request task**: owns the `AsyncClient` and turns each
//!    [`TransportRequest`] into a client call. A `Connect` builds a fresh
//!    client/event-loop pair and hands the event loop to the poll task.
//! 2. **Poll task**: drives the current event loop and translates rumqttc
//!    events into [`TransportEvent`]s. It stops polling on the first error,
//!    so rumqttc never reconnects behind the session's back.
//!
//! rumqttc picks its own wire packet ids. The session's ids are mapped onto
//! them in submission order: requests reach the event loop through a single
//! queue, so the n-th `Outgoing::Publish` belongs to the n-th publish sent.
//!
//! A new `Connect` cancels the poll loop of the previous connection before
//! its event loop is handed over, and every event leaves tagged with the
//! generation of the connection that produced it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet,
    SubscribeReasonCode,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::error::ConnectFailure;
use super::message::InboundMessage;
use super::transport::{
    Generation, TaggedEvent, TransportEndpoint, TransportEvent, TransportLink, TransportRequest,
};
use super::MessageId;

/// Maps session packet ids to the ids rumqttc put on the wire
#[derive(Default, Debug)]
struct Correlation {
    // Session ids in submission order, `None` for QoS 0 publishes
    queued_publishes: VecDeque<Option<MessageId>>,
    queued_subscribes: VecDeque<MessageId>,
    // Wire id -> session id, for packets that are on the wire
    publishes: HashMap<u16, MessageId>,
    subscribes: HashMap<u16, MessageId>,
}

impl Correlation {
    fn bind_publish(&mut self, wire: u16) {
        match self.queued_publishes.pop_front() {
            Some(Some(id)) => {
                self.publishes.insert(wire, id);
            }
            Some(None) => {}
            None => warn!("Outgoing publish {} without a queued request", wire),
        }
    }

    fn bind_subscribe(&mut self, wire: u16) {
        match self.queued_subscribes.pop_front() {
            Some(id) => {
                self.subscribes.insert(wire, id);
            }
            None => warn!("Outgoing subscribe {} without a queued request", wire),
        }
    }

    fn delivered(&mut self, wire: u16) -> Option<MessageId> {
        self.publishes.remove(&wire)
    }

    fn subscribed(&mut self, wire: u16) -> Option<MessageId> {
        self.subscribes.remove(&wire)
    }
}

/// An event loop handed from the request task to the poll task
struct Connection {
    generation: Generation,
    event_loop: EventLoop,
    // Child of the transport token, cancelled when a newer connect arrives
    cancel: CancellationToken,
}

/// Running rumqttc transport. Dropping it leaves the tasks running until the
/// session side of the link goes away; call [`RumqttTransport::shutdown`] to
/// stop them right away.
pub struct RumqttTransport {
    cancel: CancellationToken,
    request_task: JoinHandle<()>,
    poll_task: JoinHandle<()>,
}

impl RumqttTransport {
    /// Starts the transport tasks and returns the session side of the link.
    pub fn spawn(config: &SessionConfig) -> (Self, TransportLink) {
        let (link, endpoint) = TransportLink::pair(config.capacity());
        let TransportEndpoint { requests, events } = endpoint;

        let correlation = Arc::new(Mutex::new(Correlation::default()));
        let (loop_tx, loop_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let request_task = tokio::spawn(forward_requests(
            config.clone(),
            requests,
            events.clone(),
            loop_tx,
            correlation.clone(),
            cancel.clone(),
        ));
        let poll_task = tokio::spawn(drive_event_loops(
            loop_rx,
            events,
            correlation,
            cancel.clone(),
        ));

        info!("rumqttc transport ready for {}:{}", config.host, config.port);
        (
            RumqttTransport {
                cancel,
                request_task,
                poll_task,
            },
            link,
        )
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.request_task.abort();
        if let Err(e) = self.poll_task.await {
            if !e.is_cancelled() {
                error!("rumqttc poll task failed: {}", e);
            }
        }
        debug!("rumqttc transport stopped");
    }
}

async fn forward_requests(
    config: SessionConfig,
    mut requests: mpsc::Receiver<TransportRequest>,
    events: mpsc::Sender<TaggedEvent>,
    loops: mpsc::Sender<Connection>,
    correlation: Arc<Mutex<Correlation>>,
    cancel: CancellationToken,
) {
    let mut client: Option<AsyncClient> = None;
    let mut generation: Generation = 0;
    let mut current: Option<CancellationToken> = None;

    while let Some(request) = requests.recv().await {
        match request {
            TransportRequest::Connect { generation: next } => {
                if let Some(previous) = current.take() {
                    debug!("Abandoning connection {}", generation);
                    previous.cancel();
                }
                generation = next;
                debug!(
                    "Opening connection {} to {}:{}",
                    generation, config.host, config.port
                );

                let (new_client, event_loop) =
                    AsyncClient::new(config.mqtt_options(), config.capacity());
                client = Some(new_client);
                let connection = Connection {
                    generation,
                    event_loop,
                    cancel: cancel.child_token(),
                };
                current = Some(connection.cancel.clone());

                if loops.send(connection).await.is_err() {
                    error!("Poll task is gone, cannot connect");
                    let failure = ConnectFailure::Network("transport stopped".to_string());
                    let event = TransportEvent::ConnectFailed(failure);
                    let _ = events.send(TaggedEvent::new(generation, event)).await;
                }
            }
            TransportRequest::Subscribe { id, topic, qos } => {
                let Some(client) = &client else {
                    reject(&events, generation, id, "no connection").await;
                    continue;
                };
                correlation.lock().await.queued_subscribes.push_back(id);
                if let Err(e) = client.subscribe(topic, qos).await {
                    correlation.lock().await.queued_subscribes.pop_back();
                    reject(&events, generation, id, &e.to_string()).await;
                }
            }
            TransportRequest::Publish {
                id,
                topic,
                payload,
                qos,
                retain,
            } => {
                let Some(client) = &client else {
                    if let Some(id) = id {
                        reject(&events, generation, id, "no connection").await;
                    }
                    continue;
                };
                correlation.lock().await.queued_publishes.push_back(id);
                if let Err(e) = client.publish_bytes(topic, qos, retain, payload).await {
                    correlation.lock().await.queued_publishes.pop_back();
                    match id {
                        Some(id) => reject(&events, generation, id, &e.to_string()).await,
                        None => warn!("QoS 0 publish dropped: {}", e),
                    }
                }
            }
            TransportRequest::Disconnect => {
                if let Some(client) = client.take() {
                    if let Err(e) = client.disconnect().await {
                        debug!("DISCONNECT not sent: {}", e);
                    }
                }
            }
        }
    }
    debug!("Session dropped its request channel, request task exiting");
}

async fn reject(
    events: &mpsc::Sender<TaggedEvent>,
    generation: Generation,
    id: MessageId,
    reason: &str,
) {
    let event = TransportEvent::Rejected {
        id,
        reason: reason.to_string(),
    };
    let _ = events.send(TaggedEvent::new(generation, event)).await;
}

async fn drive_event_loops(
    mut loops: mpsc::Receiver<Connection>,
    events: mpsc::Sender<TaggedEvent>,
    correlation: Arc<Mutex<Correlation>>,
    cancel: CancellationToken,
) {
    loop {
        let connection = tokio::select! {
            _ = cancel.cancelled() => break,
            next = loops.recv() => match next {
                Some(connection) => connection,
                None => break,
            },
        };
        *correlation.lock().await = Correlation::default();
        drive(connection, &events, &correlation).await;
    }
    debug!("Poll task exiting");
}

/// Polls one connection until it ends or a newer connection replaces it.
async fn drive(
    connection: Connection,
    events: &mpsc::Sender<TaggedEvent>,
    correlation: &Mutex<Correlation>,
) {
    let Connection {
        generation,
        mut event_loop,
        cancel,
    } = connection;
    let tag = |event| TaggedEvent::new(generation, event);
    let mut connected = false;

    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Connection {} abandoned", generation);
                return;
            }
            polled = event_loop.poll() => polled,
        };

        let event = match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    connected = true;
                    Some(TransportEvent::Connected)
                } else {
                    let failure = ConnectFailure::Refused(format!("{:?}", ack.code));
                    let _ = events
                        .send(tag(TransportEvent::ConnectFailed(failure)))
                        .await;
                    return;
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                match correlation.lock().await.subscribed(ack.pkid) {
                    Some(id) => {
                        let granted = match ack.return_codes.first() {
                            Some(SubscribeReasonCode::Success(qos)) => Some(*qos),
                            _ => None,
                        };
                        Some(TransportEvent::SubAck { id, granted })
                    }
                    None => {
                        warn!("SUBACK for unknown wire packet {}", ack.pkid);
                        None
                    }
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => correlation
                .lock()
                .await
                .delivered(ack.pkid)
                .map(TransportEvent::Delivered),
            Ok(Event::Incoming(Packet::PubComp(comp))) => correlation
                .lock()
                .await
                .delivered(comp.pkid)
                .map(TransportEvent::Delivered),
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message_id = (publish.pkid != 0).then_some(publish.pkid);
                Some(TransportEvent::Message(InboundMessage::new(
                    publish.topic,
                    publish.payload,
                    publish.qos,
                    publish.retain,
                    message_id,
                )))
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                let event = TransportEvent::Disconnected {
                    reason: "broker sent DISCONNECT".to_string(),
                };
                let _ = events.send(tag(event)).await;
                return;
            }
            Ok(Event::Outgoing(Outgoing::Publish(wire))) => {
                correlation.lock().await.bind_publish(wire);
                None
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(wire))) => {
                correlation.lock().await.bind_subscribe(wire);
                None
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                // Requested by the session, which already knows
                debug!("DISCONNECT sent, closing connection {}", generation);
                return;
            }
            Ok(other) => {
                debug!("rumqttc event: {:?}", other);
                None
            }
            Err(e) => {
                let event = if connected {
                    connection_lost(&e)
                } else {
                    TransportEvent::ConnectFailed(classify(&e))
                };
                warn!("rumqttc event loop {} ended: {}", generation, e);
                let _ = events.send(tag(event)).await;
                return;
            }
        };

        if let Some(event) = event {
            if events.send(tag(event)).await.is_err() {
                debug!("Session dropped its event channel");
                return;
            }
        }
    }
}

fn classify(error: &ConnectionError) -> ConnectFailure {
    match error {
        ConnectionError::ConnectionRefused(code) => ConnectFailure::Refused(format!("{:?}", code)),
        ConnectionError::MqttState(state) => ConnectFailure::Protocol(state.to_string()),
        ConnectionError::NotConnAck(packet) => {
            ConnectFailure::Protocol(format!("expected CONNACK, got {:?}", packet))
        }
        other => ConnectFailure::Network(other.to_string()),
    }
}

fn connection_lost(error: &ConnectionError) -> TransportEvent {
    match error {
        ConnectionError::MqttState(state) => TransportEvent::ProtocolError(state.to_string()),
        other => TransportEvent::Disconnected {
            reason: other.to_string(),
        },
    }
}
