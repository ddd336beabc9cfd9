//! Status presenter
//!
//! Turns session events into the text and trigger state a front end shows.
//! It is registered as the session listener; front ends read its
//! [`PresenterView`] from a watch channel instead of receiving callbacks on
//! the session task.

use chrono::{DateTime, Local};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::mqtt::listener::SessionListener;
use crate::mqtt::message::InboundMessage;
use crate::mqtt::session::SessionStatus;
use crate::mqtt::MessageId;

/// Snapshot of what the front end should display
#[derive(Clone, Debug, PartialEq)]
pub struct PresenterView {
    pub status: SessionStatus,
    pub text: &'static str,
    pub trigger_enabled: bool,
    pub messages_received: usize,
    pub deliveries_confirmed: usize,
    pub last_message: Option<String>,
    pub last_activity: Option<DateTime<Local>>,
}

impl Default for PresenterView {
    fn default() -> Self {
        PresenterView::for_status(SessionStatus::Created)
    }
}

impl PresenterView {
    fn for_status(status: SessionStatus) -> Self {
        PresenterView {
            status,
            text: status_text(status),
            trigger_enabled: status.is_connected(),
            messages_received: 0,
            deliveries_confirmed: 0,
            last_message: None,
            last_activity: None,
        }
    }
}

/// Label for a session status
pub fn status_text(status: SessionStatus) -> &'static str {
    if status.is_connected() {
        "Connected"
    } else if status.is_pending() {
        "Trying to connect..."
    } else {
        "Connection Failed"
    }
}

pub struct StatusPresenter {
    view_tx: watch::Sender<PresenterView>,
}

impl Default for StatusPresenter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPresenter {
    pub fn new() -> Self {
        let (view_tx, _) = watch::channel(PresenterView::default());
        StatusPresenter { view_tx }
    }

    pub fn view(&self) -> PresenterView {
        self.view_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenterView> {
        self.view_tx.subscribe()
    }
}

impl SessionListener for StatusPresenter {
    fn on_status_changed(&self, status: SessionStatus) {
        info!("Status: {}", status_text(status));
        self.view_tx.send_modify(|view| {
            view.status = status;
            view.text = status_text(status);
            view.trigger_enabled = status.is_connected();
            view.last_activity = Some(Local::now());
        });
    }

    fn on_message(&self, message: &InboundMessage) {
        info!("Received {}", message);
        self.view_tx.send_modify(|view| {
            view.messages_received += 1;
            view.last_message = Some(message.to_string());
            view.last_activity = Some(message.received_at);
        });
    }

    fn on_delivered(&self, id: MessageId) {
        debug!("Delivered packet {}", id);
        self.view_tx.send_modify(|view| {
            view.deliveries_confirmed += 1;
            view.last_activity = Some(Local::now());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::QoS;

    #[test]
    fn every_status_maps_to_one_of_three_labels() {
        assert_eq!(status_text(SessionStatus::Created), "Trying to connect...");
        assert_eq!(
            status_text(SessionStatus::Connecting),
            "Trying to connect..."
        );
        assert_eq!(status_text(SessionStatus::Connected), "Connected");
        for status in [
            SessionStatus::ConnectionRefused,
            SessionStatus::ProtocolError,
            SessionStatus::ConnectionError,
            SessionStatus::Disconnected,
            SessionStatus::Error,
        ] {
            assert_eq!(status_text(status), "Connection Failed");
        }
    }

    #[test]
    fn trigger_follows_connection() {
        let presenter = StatusPresenter::new();
        assert!(!presenter.view().trigger_enabled);

        presenter.on_status_changed(SessionStatus::Connected);
        assert!(presenter.view().trigger_enabled);

        presenter.on_status_changed(SessionStatus::Disconnected);
        let view = presenter.view();
        assert!(!view.trigger_enabled);
        assert_eq!(view.text, "Connection Failed");
    }

    #[test]
    fn counts_messages_and_deliveries() {
        let presenter = StatusPresenter::new();
        let message = InboundMessage::new("test/message", "on", QoS::ExactlyOnce, false, Some(1));

        presenter.on_message(&message);
        presenter.on_delivered(1);
        presenter.on_delivered(2);

        let view = presenter.view();
        assert_eq!(view.messages_received, 1);
        assert_eq!(view.deliveries_confirmed, 2);
        let last = view.last_message.expect("last message recorded");
        assert!(last.ends_with("test/message: on"));
    }
}
