//! Session worker and handle
//!
//! [`SessionHandle::spawn`] starts a worker task that owns the connection
//! status, the packet id space, the pending acknowledgements and the
//! listener. Handles are cheap to clone and only send actions to the worker,
//! each carrying a oneshot for the reply.
//!
//! # Status machine
//!
//! ```text
//! Created ──connect──► Connecting ──CONNACK ok──► Connected ──link lost──► Disconnected
//!                          │                          │     └─protocol──► Error
//!                          ├──refused──► ConnectionRefused
//!                          ├──network──► ConnectionError
//!                          └──protocol─► ProtocolError
//! ```
//!
//! Every failure status, Disconnected and Error can only be left through a
//! new `connect()`. Nothing reconnects on its own.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rumqttc::QoS;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::error::{ConnectFailure, Operation, SessionError};
use super::inflight::{DeliveryReply, Inflight, SubscribeReply};
use super::listener::SessionListener;
use super::transport::{Generation, TaggedEvent, TransportEvent, TransportLink, TransportRequest};
use super::MessageId;

/// Connection status as seen by the session
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    #[default]
    Created,
    Connecting,
    Connected,
    ConnectionRefused,
    ProtocolError,
    ConnectionError,
    Disconnected,
    Error,
}

impl SessionStatus {
    pub fn is_connected(self) -> bool {
        self == SessionStatus::Connected
    }

    /// Still on the way to a first connection
    pub fn is_pending(self) -> bool {
        matches!(self, SessionStatus::Created | SessionStatus::Connecting)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SessionStatus::Created => "created",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::ConnectionRefused => "connection refused",
            SessionStatus::ProtocolError => "protocol error",
            SessionStatus::ConnectionError => "connection error",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Broker answer to a subscribe.
///
/// The broker may grant a lower QoS than requested. That is still a
/// successful subscription, so it is reported here rather than as an error;
/// check [`SubscribeGrant::is_downgraded`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeGrant {
    pub topic: String,
    pub requested: QoS,
    pub granted: QoS,
}

impl SubscribeGrant {
    pub fn is_downgraded(&self) -> bool {
        (self.granted as u8) < (self.requested as u8)
    }
}

/// QoS levels whose publish ends in a broker acknowledgement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmedQoS {
    AtLeastOnce,
    ExactlyOnce,
}

impl From<ConfirmedQoS> for QoS {
    fn from(qos: ConfirmedQoS) -> Self {
        match qos {
            ConfirmedQoS::AtLeastOnce => QoS::AtLeastOnce,
            ConfirmedQoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// A QoS 1/2 publish waiting for the broker handshake.
///
/// Resolves `Ok(())` in the same worker step that fires
/// [`SessionListener::on_delivered`] for [`PendingDelivery::id`]. Timeout,
/// connection loss and close resolve it with the matching error.
#[derive(Debug)]
pub struct PendingDelivery {
    id: MessageId,
    receipt: oneshot::Receiver<Result<(), SessionError>>,
}

impl PendingDelivery {
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub async fn confirmed(self) -> Result<(), SessionError> {
        self.receipt.await.unwrap_or(Err(SessionError::Closed))
    }
}

// Requests from handles to the worker
enum SessionAction {
    Connect {
        response_tx: oneshot::Sender<Result<(), SessionError>>,
    },
    Subscribe {
        topic: String,
        qos: QoS,
        response_tx: SubscribeReply,
    },
    Publish {
        topic: String,
        payload: Bytes,
        qos: ConfirmedQoS,
        retain: bool,
        response_tx: oneshot::Sender<Result<PendingDelivery, SessionError>>,
    },
    PublishAtMostOnce {
        topic: String,
        payload: Bytes,
        retain: bool,
        response_tx: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        response_tx: oneshot::Sender<Result<(), SessionError>>,
    },
    SetListener {
        listener: Option<Arc<dyn SessionListener>>,
    },
    Close {
        response_tx: oneshot::Sender<()>,
    },
}

/// Handle to a running session.
///
/// All operations return as soon as the worker has taken them on; those that
/// need a broker answer then wait on that answer. Dropping every handle
/// closes the session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    actions: mpsc::Sender<SessionAction>,
    status: watch::Receiver<SessionStatus>,
}

impl fmt::Debug for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionAction::Connect { .. } => write!(f, "Connect"),
            SessionAction::Subscribe { topic, qos, .. } => {
                write!(f, "Subscribe({}, {:?})", topic, qos)
            }
            SessionAction::Publish {
                topic,
                payload,
                qos,
                ..
            } => write!(f, "Publish({}, {} bytes, {:?})", topic, payload.len(), qos),
            SessionAction::PublishAtMostOnce { topic, payload, .. } => {
                write!(f, "Publish({}, {} bytes, AtMostOnce)", topic, payload.len())
            }
            SessionAction::Disconnect { .. } => write!(f, "Disconnect"),
            SessionAction::SetListener { listener } => {
                write!(f, "SetListener(present: {})", listener.is_some())
            }
            SessionAction::Close { .. } => write!(f, "Close"),
        }
    }
}

impl SessionHandle {
    /// Spawns the session worker on the current tokio runtime.
    ///
    /// The session starts in [`SessionStatus::Created`]; nothing touches the
    /// network until [`SessionHandle::connect`].
    pub fn spawn(link: TransportLink, config: &SessionConfig) -> Self {
        info!(
            "Spawning MQTT session for {}:{} (ack timeout: {:?})",
            config.host,
            config.port,
            config.ack_timeout()
        );

        let (action_tx, action_rx) = mpsc::channel(config.capacity());
        let (status_tx, status_rx) = watch::channel(SessionStatus::Created);

        let worker = SessionWorker {
            status: SessionStatus::Created,
            status_tx,
            listener: None,
            requests: link.requests,
            events: link.events,
            transport_open: true,
            generation: 0,
            inflight: Inflight::new(config.ack_timeout()),
            pending_connect: None,
            ack_timeout: config.ack_timeout(),
        };
        tokio::spawn(worker.run(action_rx));

        SessionHandle {
            actions: action_tx,
            status: status_rx,
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change
    pub fn status_watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Connects to the broker.
    ///
    /// Resolves once CONNACK arrives or the attempt fails. Calling it again
    /// while connected is a no-op; calling it while an attempt is running
    /// fails with [`SessionError::ConnectInProgress`].
    pub async fn connect(&self) -> Result<(), SessionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.dispatch(SessionAction::Connect { response_tx }).await?;
        response_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Subscribes to a single filter and waits for the SUBACK.
    pub async fn subscribe(
        &self,
        topic: impl Into<String>,
        qos: QoS,
    ) -> Result<SubscribeGrant, SessionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.dispatch(SessionAction::Subscribe {
            topic: topic.into(),
            qos,
            response_tx,
        })
        .await?;
        response_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Publishes `payload` on `topic`.
    ///
    /// For QoS 1/2 the packet id is allocated before the request leaves the
    /// session and is returned right away inside a [`PendingDelivery`]; the
    /// call does not wait for the broker. QoS 0 is fire-and-forget and
    /// returns `None`.
    pub async fn publish(
        &self,
        payload: impl Into<Bytes>,
        topic: impl Into<String>,
        qos: QoS,
        retain: bool,
    ) -> Result<Option<PendingDelivery>, SessionError> {
        let confirmed = match qos {
            QoS::AtMostOnce => {
                let (response_tx, response_rx) = oneshot::channel();
                self.dispatch(SessionAction::PublishAtMostOnce {
                    topic: topic.into(),
                    payload: payload.into(),
                    retain,
                    response_tx,
                })
                .await?;
                response_rx.await.map_err(|_| SessionError::Closed)??;
                return Ok(None);
            }
            QoS::AtLeastOnce => ConfirmedQoS::AtLeastOnce,
            QoS::ExactlyOnce => ConfirmedQoS::ExactlyOnce,
        };
        self.publish_confirmed(payload, topic, confirmed, retain)
            .await
            .map(Some)
    }

    /// Publishes at QoS 1 or 2, which always yields a [`PendingDelivery`].
    pub async fn publish_confirmed(
        &self,
        payload: impl Into<Bytes>,
        topic: impl Into<String>,
        qos: ConfirmedQoS,
        retain: bool,
    ) -> Result<PendingDelivery, SessionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.dispatch(SessionAction::Publish {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
            response_tx,
        })
        .await?;
        response_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Sends DISCONNECT. Pending operations fail with [`SessionError::Closed`].
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.dispatch(SessionAction::Disconnect { response_tx }).await?;
        response_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Registers the listener, replacing any previous one.
    pub async fn set_listener(
        &self,
        listener: Arc<dyn SessionListener>,
    ) -> Result<(), SessionError> {
        self.dispatch(SessionAction::SetListener {
            listener: Some(listener),
        })
        .await
    }

    pub async fn clear_listener(&self) -> Result<(), SessionError> {
        self.dispatch(SessionAction::SetListener { listener: None })
            .await
    }

    /// Disconnects if needed, fails everything still pending and stops the
    /// worker. Every later call on any handle returns [`SessionError::Closed`].
    pub async fn close(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .dispatch(SessionAction::Close { response_tx })
            .await
            .is_ok()
        {
            let _ = response_rx.await;
        }
    }

    async fn dispatch(&self, action: SessionAction) -> Result<(), SessionError> {
        debug!("Dispatching session action: {:?}", action);
        self.actions
            .send(action)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

/// Owns all session state. Runs until closed or every handle is dropped.
struct SessionWorker {
    status: SessionStatus,
    status_tx: watch::Sender<SessionStatus>,
    listener: Option<Arc<dyn SessionListener>>,
    requests: mpsc::Sender<TransportRequest>,
    events: mpsc::Receiver<TaggedEvent>,
    transport_open: bool,
    // Generation of the latest connection attempt; older events are dropped
    generation: Generation,
    inflight: Inflight,
    pending_connect: Option<(oneshot::Sender<Result<(), SessionError>>, Option<Instant>)>,
    ack_timeout: Option<Duration>,
}

impl SessionWorker {
    async fn run(mut self, mut actions: mpsc::Receiver<SessionAction>) {
        debug!("Session worker started");
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                action = actions.recv() => match action {
                    Some(action) => {
                        if let ControlFlow::Break(()) = self.handle_action(action).await {
                            break;
                        }
                    }
                    None => {
                        info!("All session handles dropped, closing session");
                        self.shutdown().await;
                        break;
                    }
                },
                event = self.events.recv(), if self.transport_open => match event {
                    Some(tagged) if tagged.generation == self.generation => {
                        self.handle_event(tagged.event).await
                    }
                    Some(stale) => debug!(
                        "Dropping event from connection {} (current {}): {:?}",
                        stale.generation, self.generation, stale.event
                    ),
                    None => self.transport_gone(),
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire_overdue().await;
                }
            }
        }
        info!("Session worker stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        let connect = self.pending_connect.as_ref().and_then(|(_, d)| *d);
        match (connect, self.inflight.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status == status {
            return;
        }
        info!("Session status: {} -> {}", self.status, status);
        self.status = status;
        self.status_tx.send_replace(status);
        if let Some(listener) = &self.listener {
            listener.on_status_changed(status);
        }
    }

    async fn send_request(&mut self, request: TransportRequest) -> Result<(), SessionError> {
        if !self.transport_open {
            return Err(SessionError::Transport("transport closed".to_string()));
        }
        self.requests.send(request).await.map_err(|e| {
            error!("Transport request channel closed: {}", e);
            SessionError::Transport("transport closed".to_string())
        })
    }

    async fn handle_action(&mut self, action: SessionAction) -> ControlFlow<()> {
        match action {
            SessionAction::Connect { response_tx } => self.connect(response_tx).await,
            SessionAction::Subscribe {
                topic,
                qos,
                response_tx,
            } => self.subscribe(topic, qos, response_tx).await,
            SessionAction::Publish {
                topic,
                payload,
                qos,
                retain,
                response_tx,
            } => {
                let result = self.publish(topic, payload, qos, retain).await;
                let _ = response_tx.send(result);
            }
            SessionAction::PublishAtMostOnce {
                topic,
                payload,
                retain,
                response_tx,
            } => {
                let result = self.publish_at_most_once(topic, payload, retain).await;
                let _ = response_tx.send(result);
            }
            SessionAction::Disconnect { response_tx } => {
                self.disconnect().await;
                let _ = response_tx.send(Ok(()));
            }
            SessionAction::SetListener { listener } => {
                debug!("Listener registered: {}", listener.is_some());
                self.listener = listener;
            }
            SessionAction::Close { response_tx } => {
                info!("Closing session");
                self.shutdown().await;
                let _ = response_tx.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn connect(&mut self, response_tx: oneshot::Sender<Result<(), SessionError>>) {
        match self.status {
            SessionStatus::Connected => {
                debug!("connect() while connected, nothing to do");
                let _ = response_tx.send(Ok(()));
            }
            SessionStatus::Connecting => {
                warn!("connect() while a connection attempt is running");
                let _ = response_tx.send(Err(SessionError::ConnectInProgress));
            }
            _ => {
                self.set_status(SessionStatus::Connecting);
                self.generation += 1;
                let request = TransportRequest::Connect {
                    generation: self.generation,
                };
                match self.send_request(request).await {
                    Ok(()) => {
                        let deadline = self.ack_timeout.map(|t| Instant::now() + t);
                        self.pending_connect = Some((response_tx, deadline));
                    }
                    Err(e) => {
                        self.set_status(SessionStatus::ConnectionError);
                        let _ = response_tx.send(Err(e));
                    }
                }
            }
        }
    }

    fn require_connected(&self) -> Result<(), SessionError> {
        if self.status.is_connected() {
            Ok(())
        } else {
            Err(SessionError::NotConnected {
                status: self.status,
            })
        }
    }

    async fn subscribe(&mut self, topic: String, qos: QoS, response_tx: SubscribeReply) {
        let id = match self
            .require_connected()
            .and_then(|_| validate_filter(&topic))
            .and_then(|_| self.inflight.next_id())
        {
            Ok(id) => id,
            Err(e) => {
                warn!("Rejecting subscribe to '{}': {}", topic, e);
                let _ = response_tx.send(Err(e));
                return;
            }
        };

        info!("Subscribing to '{}' at {:?} (packet {})", topic, qos, id);
        self.inflight.insert_subscribe(id, topic.clone(), qos, response_tx);
        let request = TransportRequest::Subscribe { id, topic, qos };
        if let Err(e) = self.send_request(request).await {
            self.inflight.fail(id, e);
        }
    }

    async fn publish_at_most_once(
        &mut self,
        topic: String,
        payload: Bytes,
        retain: bool,
    ) -> Result<(), SessionError> {
        self.require_connected()?;
        validate_topic(&topic)?;

        debug!("Publishing {} bytes to '{}' at QoS 0", payload.len(), topic);
        self.send_request(TransportRequest::Publish {
            id: None,
            topic,
            payload,
            qos: QoS::AtMostOnce,
            retain,
        })
        .await
    }

    async fn publish(
        &mut self,
        topic: String,
        payload: Bytes,
        qos: ConfirmedQoS,
        retain: bool,
    ) -> Result<PendingDelivery, SessionError> {
        self.require_connected()?;
        validate_topic(&topic)?;

        let id = self.inflight.next_id()?;
        let (reply, receipt): (DeliveryReply, _) = oneshot::channel();
        self.inflight.insert_publish(id, reply);
        debug!(
            "Publishing {} bytes to '{}' at {:?} (packet {})",
            payload.len(),
            topic,
            qos,
            id
        );

        let request = TransportRequest::Publish {
            id: Some(id),
            topic,
            payload,
            qos: qos.into(),
            retain,
        };
        if let Err(e) = self.send_request(request).await {
            self.inflight.fail(id, e.clone());
            return Err(e);
        }
        Ok(PendingDelivery { id, receipt })
    }

    async fn disconnect(&mut self) {
        if !matches!(
            self.status,
            SessionStatus::Connected | SessionStatus::Connecting
        ) {
            debug!("disconnect() while {}, nothing to do", self.status);
            return;
        }
        info!("Disconnecting from broker");
        if let Err(e) = self.send_request(TransportRequest::Disconnect).await {
            warn!("Could not send DISCONNECT: {}", e);
        }
        if let Some((response_tx, _)) = self.pending_connect.take() {
            let _ = response_tx.send(Err(SessionError::Closed));
        }
        self.fail_inflight(SessionError::Closed);
        self.set_status(SessionStatus::Disconnected);
    }

    async fn shutdown(&mut self) {
        self.disconnect().await;
        if let Some((response_tx, _)) = self.pending_connect.take() {
            let _ = response_tx.send(Err(SessionError::Closed));
        }
        self.fail_inflight(SessionError::Closed);
        self.listener = None;
    }

    fn fail_inflight(&mut self, error: SessionError) {
        let failed = self.inflight.fail_all(error.clone());
        if failed > 0 {
            warn!("Failed {} pending operations: {}", failed, error);
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected().await,
            TransportEvent::ConnectFailed(reason) => self.on_connect_failed(reason),
            TransportEvent::SubAck { id, granted } => {
                match self.inflight.complete_subscribe(id, granted) {
                    Some(Ok(grant)) if grant.is_downgraded() => warn!(
                        "Subscription to '{}' downgraded from {:?} to {:?}",
                        grant.topic, grant.requested, grant.granted
                    ),
                    Some(Ok(grant)) => {
                        info!("Subscribed to '{}' at {:?}", grant.topic, grant.granted)
                    }
                    Some(Err(e)) => warn!("{}", e),
                    None => debug!("SUBACK for unknown packet {}", id),
                }
            }
            TransportEvent::Delivered(id) => {
                if self.inflight.complete_publish(id) {
                    debug!("Delivery confirmed for packet {}", id);
                    if let Some(listener) = &self.listener {
                        listener.on_delivered(id);
                    }
                } else {
                    debug!("Ignoring acknowledgement for unknown packet {}", id);
                }
            }
            TransportEvent::Message(message) => {
                debug!("Inbound message: {}", message);
                if let Some(listener) = &self.listener {
                    listener.on_message(&message);
                }
            }
            TransportEvent::Rejected { id, reason } => {
                warn!("Transport rejected packet {}: {}", id, reason);
                self.inflight.fail(id, SessionError::Transport(reason));
            }
            TransportEvent::Disconnected { reason } => {
                self.on_connection_lost(SessionStatus::Disconnected, &reason)
            }
            TransportEvent::ProtocolError(reason) => {
                self.on_connection_lost(SessionStatus::Error, &reason)
            }
        }
    }

    async fn on_connected(&mut self) {
        match self.status {
            SessionStatus::Connecting => {
                self.set_status(SessionStatus::Connected);
                if let Some((response_tx, _)) = self.pending_connect.take() {
                    let _ = response_tx.send(Ok(()));
                }
            }
            SessionStatus::Connected => debug!("Repeated CONNACK ignored"),
            _ => {
                // The attempt timed out before CONNACK; status already says so
                warn!("Late CONNACK while {}, dropping connection", self.status);
                if let Err(e) = self.send_request(TransportRequest::Disconnect).await {
                    warn!("Could not send DISCONNECT: {}", e);
                }
            }
        }
    }

    fn on_connect_failed(&mut self, reason: ConnectFailure) {
        if self.status != SessionStatus::Connecting {
            debug!("Connect failure while {}: {}", self.status, reason);
            return;
        }
        error!("Connection attempt failed: {}", reason);
        let status = match &reason {
            ConnectFailure::Refused(_) => SessionStatus::ConnectionRefused,
            ConnectFailure::Network(_) => SessionStatus::ConnectionError,
            ConnectFailure::Protocol(_) => SessionStatus::ProtocolError,
        };
        self.set_status(status);
        if let Some((response_tx, _)) = self.pending_connect.take() {
            let _ = response_tx.send(Err(SessionError::ConnectFailed { reason }));
        }
    }

    fn on_connection_lost(&mut self, status: SessionStatus, reason: &str) {
        match self.status {
            SessionStatus::Connected => {
                error!("Connection lost: {}", reason);
                self.fail_inflight(SessionError::ConnectionLost);
                self.set_status(status);
            }
            SessionStatus::Connecting => {
                // Dropped before CONNACK: this is a failed attempt
                let reason = reason.to_string();
                self.on_connect_failed(match status {
                    SessionStatus::Error => ConnectFailure::Protocol(reason),
                    _ => ConnectFailure::Network(reason),
                });
            }
            _ => debug!("Transport loss while {}: {}", self.status, reason),
        }
    }

    fn transport_gone(&mut self) {
        error!("Transport event channel closed");
        self.transport_open = false;
        match self.status {
            SessionStatus::Connected => {
                self.on_connection_lost(SessionStatus::Error, "transport stopped")
            }
            SessionStatus::Connecting => {
                self.on_connect_failed(ConnectFailure::Network("transport stopped".to_string()))
            }
            _ => self.fail_inflight(SessionError::ConnectionLost),
        }
    }

    async fn expire_overdue(&mut self) {
        let now = Instant::now();

        let connect_due = self
            .pending_connect
            .as_ref()
            .and_then(|(_, d)| *d)
            .is_some_and(|d| d <= now);
        if connect_due {
            if let Some((response_tx, _)) = self.pending_connect.take() {
                error!("Timed out waiting for CONNACK");
                if let Err(e) = self.send_request(TransportRequest::Disconnect).await {
                    warn!("Could not abort connection attempt: {}", e);
                }
                self.set_status(SessionStatus::ConnectionError);
                let _ = response_tx.send(Err(SessionError::Timeout(Operation::Connect)));
            }
        }

        for operation in self.inflight.expire(now) {
            warn!("Timed out waiting for {}", operation);
        }
    }
}

fn validate_topic(topic: &str) -> Result<(), SessionError> {
    if topic.is_empty() || topic.contains(['+', '#']) || topic.contains('\0') {
        return Err(SessionError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

fn validate_filter(filter: &str) -> Result<(), SessionError> {
    if filter.is_empty() || filter.contains('\0') {
        return Err(SessionError::InvalidTopic(filter.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connected_is_connected() {
        let statuses = [
            SessionStatus::Created,
            SessionStatus::Connecting,
            SessionStatus::ConnectionRefused,
            SessionStatus::ProtocolError,
            SessionStatus::ConnectionError,
            SessionStatus::Disconnected,
            SessionStatus::Error,
        ];
        assert!(SessionStatus::Connected.is_connected());
        assert!(statuses.iter().all(|s| !s.is_connected()));
    }

    #[test]
    fn grant_at_requested_qos_is_not_downgraded() {
        let grant = SubscribeGrant {
            topic: "test/message".into(),
            requested: QoS::ExactlyOnce,
            granted: QoS::ExactlyOnce,
        };
        assert!(!grant.is_downgraded());
        let lower = SubscribeGrant {
            granted: QoS::AtMostOnce,
            ..grant
        };
        assert!(lower.is_downgraded());
    }

    #[test]
    fn confirmed_qos_maps_onto_wire_qos() {
        assert_eq!(QoS::from(ConfirmedQoS::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(QoS::from(ConfirmedQoS::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[test]
    fn publish_topics_reject_wildcards() {
        assert!(validate_topic("test/message").is_ok());
        assert_eq!(
            validate_topic("test/#"),
            Err(SessionError::InvalidTopic("test/#".into()))
        );
        assert!(validate_topic("test/+/x").is_err());
        assert!(validate_topic("").is_err());
        assert!(validate_filter("test/#").is_ok());
    }

    #[tokio::test]
    async fn calls_after_close_fail() {
        let (link, _endpoint) = TransportLink::pair(8);
        let session = SessionHandle::spawn(link, &SessionConfig::default());
        session.close().await;

        assert_eq!(session.connect().await, Err(SessionError::Closed));
        assert!(matches!(
            session.publish("on", "test/message", QoS::ExactlyOnce, false).await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn operations_before_connect_are_rejected() {
        let (link, mut endpoint) = TransportLink::pair(8);
        let session = SessionHandle::spawn(link, &SessionConfig::default());

        let err = session
            .subscribe("test/message", QoS::ExactlyOnce)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::NotConnected {
                status: SessionStatus::Created
            }
        );
        assert!(matches!(
            session.publish("on", "test/message", QoS::ExactlyOnce, false).await,
            Err(SessionError::NotConnected { .. })
        ));
        assert!(endpoint.requests.try_recv().is_err());
    }
}
