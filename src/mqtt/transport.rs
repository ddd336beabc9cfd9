//! Channel link between the session worker and the protocol engine
//!
//! The session never talks to a socket. It sends [`TransportRequest`]s down
//! one channel and consumes [`TransportEvent`]s from another, in the order the
//! engine produced them. The production engine is
//! [`RumqttTransport`](super::rumqtt_transport::RumqttTransport); any task
//! holding a [`TransportEndpoint`] can stand in for it.
//!
//! Every `Connect` carries a fresh [`Generation`] and every event is tagged
//! with the generation of the connection that produced it. The session drops
//! events from connections it has already given up on.

use bytes::Bytes;
use rumqttc::QoS;
use tokio::sync::mpsc;

use super::error::ConnectFailure;
use super::message::InboundMessage;
use super::MessageId;

/// Identifies one connection attempt and everything the resulting connection
/// reports. Increases with every `Connect`.
pub type Generation = u64;

/// Work the session asks the transport to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportRequest {
    /// Open the TCP connection and run the CONNECT handshake. Anything still
    /// running for an older generation is abandoned.
    Connect { generation: Generation },

    /// Send SUBSCRIBE for a single filter under the given packet id
    Subscribe {
        id: MessageId,
        topic: String,
        qos: QoS,
    },

    /// Send PUBLISH. `id` is `None` exactly when `qos` is AtMostOnce.
    Publish {
        id: Option<MessageId>,
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    },

    /// Send DISCONNECT and drop the connection
    Disconnect,
}

/// What the transport observed, in wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// CONNACK with a success code
    Connected,

    /// The connection attempt ended before CONNACK success
    ConnectFailed(ConnectFailure),

    /// SUBACK for the subscribe sent under `id`. `granted` is `None` when the
    /// broker returned the failure code.
    SubAck {
        id: MessageId,
        granted: Option<QoS>,
    },

    /// PUBACK (QoS 1) or PUBCOMP (QoS 2) completed the handshake for `id`
    Delivered(MessageId),

    /// Inbound PUBLISH
    Message(InboundMessage),

    /// The request identified by `id` never reached the wire
    Rejected { id: MessageId, reason: String },

    /// An established connection went away
    Disconnected { reason: String },

    /// An established connection broke the protocol
    ProtocolError(String),
}

/// A [`TransportEvent`] and the connection it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub generation: Generation,
    pub event: TransportEvent,
}

impl TaggedEvent {
    pub fn new(generation: Generation, event: TransportEvent) -> Self {
        TaggedEvent { generation, event }
    }
}

/// Session side of the link
#[derive(Debug)]
pub struct TransportLink {
    pub requests: mpsc::Sender<TransportRequest>,
    pub events: mpsc::Receiver<TaggedEvent>,
}

/// Engine side of the link
#[derive(Debug)]
pub struct TransportEndpoint {
    pub requests: mpsc::Receiver<TransportRequest>,
    pub events: mpsc::Sender<TaggedEvent>,
}

impl TransportLink {
    /// Creates both halves of a link with the given queue capacity.
    pub fn pair(capacity: usize) -> (TransportLink, TransportEndpoint) {
        let capacity = capacity.max(1);
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        (
            TransportLink {
                requests: request_tx,
                events: event_rx,
            },
            TransportEndpoint {
                requests: request_rx,
                events: event_tx,
            },
        )
    }
}
