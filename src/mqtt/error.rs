//! Error types for the MQTT session

use std::fmt;

use thiserror::Error;

use super::session::SessionStatus;
use super::MessageId;

/// Why a connection attempt did not reach the Connected state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectFailure {
    /// The broker answered CONNECT with a non-success return code
    #[error("broker refused the connection: {0}")]
    Refused(String),

    /// DNS, TCP or I/O failure before the handshake completed
    #[error("network error: {0}")]
    Network(String),

    /// The broker violated the protocol during the handshake
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Operation that was waiting for a broker acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Subscribe(MessageId),
    Publish(MessageId),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::Connect => write!(f, "CONNACK"),
            Operation::Subscribe(id) => write!(f, "SUBACK for packet {}", id),
            Operation::Publish(id) => write!(f, "delivery of packet {}", id),
        }
    }
}

/// Errors reported by session operations
///
/// Every error is returned to the caller of the operation that caused it.
/// None of them stop the session; a failed connect leaves it in a failure
/// status until the next `connect()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The connection attempt failed
    #[error("connect failed: {reason}")]
    ConnectFailed { reason: ConnectFailure },

    /// Subscribe or publish issued while the session is not connected
    #[error("session is not connected (status: {status})")]
    NotConnected { status: SessionStatus },

    /// `connect()` called while an earlier attempt is still running
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,

    /// The broker rejected the subscription
    #[error("subscription to '{topic}' failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// Topic or filter is not usable for the requested operation
    #[error("invalid topic '{0}'")]
    InvalidTopic(String),

    /// Every packet id is held by an unacknowledged operation
    #[error("no free packet identifier, {0} operations in flight")]
    InflightFull(usize),

    /// The broker did not acknowledge in time
    #[error("timed out waiting for {0}")]
    Timeout(Operation),

    /// The connection dropped before the operation was acknowledged
    #[error("connection lost before acknowledgement")]
    ConnectionLost,

    /// The session was disconnected or closed by its owner
    #[error("session closed")]
    Closed,

    /// The transport could not carry the request
    #[error("transport error: {0}")]
    Transport(String),
}
