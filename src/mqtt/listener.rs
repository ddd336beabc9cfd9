use super::message::InboundMessage;
use super::session::SessionStatus;
use super::MessageId;

/// Receives session events.
///
/// A session holds at most one listener. Callbacks run on the session worker
/// task in the order the transport reported the underlying events, so they
/// must return quickly and must not block. Anything that drives a UI should
/// hand the event over through a channel.
pub trait SessionListener: Send + Sync {
    /// Fired on every status transition
    fn on_status_changed(&self, _status: SessionStatus) {}

    /// Fired for each publish received on a subscribed topic
    fn on_message(&self, _message: &InboundMessage) {}

    /// Fired once per QoS 1/2 publish when the broker handshake completes
    fn on_delivered(&self, _id: MessageId) {}
}
