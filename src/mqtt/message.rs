use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Local};
use rumqttc::QoS;

use super::MessageId;

const PREVIEW_CHARS: usize = 32;

/// A publish received from the broker on a subscribed topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retained: bool,
    /// Packet id, only present for QoS 1 and 2
    pub message_id: Option<MessageId>,
    pub received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retained: bool,
        message_id: Option<MessageId>,
    ) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retained,
            message_id,
            received_at: Local::now(),
        }
    }

    /// Payload as UTF-8, if it is valid UTF-8
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = match self.payload_str() {
            Some(text) => text.chars().take(PREVIEW_CHARS).collect(),
            None => format!("<{} bytes>", self.payload.len()),
        };
        write!(
            f,
            "{} {}: {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            preview
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_text() {
        let body = "x".repeat(100);
        let msg = InboundMessage::new("test/message", body, QoS::AtMostOnce, false, None);
        let rendered = msg.to_string();
        assert!(rendered.ends_with(&"x".repeat(PREVIEW_CHARS)));
        assert!(!rendered.ends_with(&"x".repeat(PREVIEW_CHARS + 1)));
    }

    #[test]
    fn binary_payload_is_summarised() {
        let msg = InboundMessage::new(
            "test/raw",
            vec![0xff, 0xfe, 0x00],
            QoS::AtLeastOnce,
            true,
            Some(7),
        );
        assert_eq!(msg.payload_str(), None);
        assert!(msg.to_string().ends_with("test/raw: <3 bytes>"));
    }
}
