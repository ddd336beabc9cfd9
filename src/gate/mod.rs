//! Command Gate - one confirmed toggle at a time
//!
//! Turns a user trigger into exactly one outstanding publish and holds back
//! the visible on/off flip until the broker has confirmed delivery, so the UI
//! never shows a state the broker has not acknowledged.
//!
//! # Trigger protocol
//!
//! ```text
//! trigger ─► status == Connected? ──no──► NotReady
//!                 │ yes
//!                 ▼
//!            awaiting ack? ──yes──► Busy
//!                 │ no
//!                 ▼
//!   desired = !visible, disable trigger, publish "on"/"off" (QoS 2)
//!                 │
//!                 ▼ delivery confirmed for that packet id
//!   visible = desired, re-enable trigger
//! ```
//!
//! UI-facing state lives in two watch channels: the visible state and
//! whether the trigger is enabled. Nothing else in the gate is observable.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::mqtt::error::SessionError;
use crate::mqtt::session::{
    ConfirmedQoS, PendingDelivery, SessionHandle, SessionStatus, SubscribeGrant,
};
use crate::mqtt::MessageId;

/// QoS for the control topic, both directions
pub const COMMAND_QOS: ConfirmedQoS = ConfirmedQoS::ExactlyOnce;

/// Topic and payloads of the toggle command
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct GateConfig {
    pub topic: String,
    pub on_payload: String,
    pub off_payload: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            topic: "test/message".to_string(),
            on_payload: "on".to_string(),
            off_payload: "off".to_string(),
        }
    }
}

impl GateConfig {
    pub fn payload_for(&self, state: bool) -> &str {
        if state {
            &self.on_payload
        } else {
            &self.off_payload
        }
    }
}

/// What happened to a trigger
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The session is not connected; nothing was sent
    NotReady(SessionStatus),
    /// A previous command is still waiting for its acknowledgement
    Busy,
    /// The command was published; `desired` becomes visible once `id` is
    /// confirmed
    Pending { id: MessageId, desired: bool },
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

#[derive(Debug, Default)]
struct GateState {
    visible: bool,
    // Packet id of the command waiting for confirmation
    outstanding: Option<MessageId>,
}

pub struct CommandGate {
    session: SessionHandle,
    config: GateConfig,
    state: Mutex<GateState>,
    visible_tx: watch::Sender<bool>,
    enabled_tx: watch::Sender<bool>,
}

impl CommandGate {
    /// Creates the gate with visible state `off` and starts following the
    /// session status so the trigger is disabled whenever it is not
    /// connected.
    pub fn new(session: SessionHandle, config: GateConfig) -> Arc<Self> {
        let (visible_tx, _) = watch::channel(false);
        let (enabled_tx, _) = watch::channel(session.status().is_connected());
        let status_rx = session.status_watch();

        let gate = Arc::new(CommandGate {
            session,
            config,
            state: Mutex::new(GateState::default()),
            visible_tx,
            enabled_tx,
        });
        tokio::spawn(follow_status(Arc::downgrade(&gate), status_rx));
        gate
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Connects, then subscribes to the command topic.
    ///
    /// The subscribe is only issued after the connect succeeded. A grant
    /// below the requested QoS is returned as-is and logged.
    pub async fn start(&self) -> Result<SubscribeGrant, GateError> {
        info!("Starting command gate on '{}'", self.config.topic);
        self.session.connect().await?;

        let grant = self
            .session
            .subscribe(self.config.topic.clone(), COMMAND_QOS.into())
            .await?;
        if grant.is_downgraded() {
            warn!(
                "Broker granted {:?} instead of {:?} on '{}'",
                grant.granted, grant.requested, grant.topic
            );
        }
        Ok(grant)
    }

    /// Handles one user trigger.
    pub async fn trigger(self: &Arc<Self>) -> Result<TriggerOutcome, GateError> {
        let status = self.session.status();
        if !status.is_connected() {
            warn!("Trigger ignored, session is {}", status);
            self.enabled_tx.send_replace(false);
            return Ok(TriggerOutcome::NotReady(status));
        }

        // Held across the publish so two triggers can never both get past the
        // outstanding check
        let mut state = self.state.lock().await;
        if state.outstanding.is_some() {
            debug!(
                "Trigger rejected, command {:?} still pending",
                state.outstanding
            );
            return Ok(TriggerOutcome::Busy);
        }

        let desired = !state.visible;
        self.enabled_tx.send_replace(false);
        info!("Setting state to {}", self.config.payload_for(desired));

        let published = self
            .session
            .publish_confirmed(
                self.config.payload_for(desired).to_string(),
                self.config.topic.clone(),
                COMMAND_QOS,
                false,
            )
            .await;

        match published {
            Ok(pending) => {
                let id = pending.id();
                state.outstanding = Some(id);
                drop(state);
                tokio::spawn(self.clone().await_confirmation(pending, desired));
                Ok(TriggerOutcome::Pending { id, desired })
            }
            Err(SessionError::NotConnected { status }) => {
                // Lost the connection between the status check and the publish
                self.refresh_trigger(&state);
                Ok(TriggerOutcome::NotReady(status))
            }
            Err(e) => {
                self.refresh_trigger(&state);
                Err(e.into())
            }
        }
    }

    async fn await_confirmation(self: Arc<Self>, pending: PendingDelivery, desired: bool) {
        let id = pending.id();
        let result = pending.confirmed().await;

        let mut state = self.state.lock().await;
        if state.outstanding != Some(id) {
            warn!("Confirmation for stale command {}", id);
            return;
        }
        state.outstanding = None;

        match result {
            Ok(()) => {
                info!(
                    "Command {} confirmed, state is now {}",
                    id,
                    self.config.payload_for(desired)
                );
                state.visible = desired;
                self.visible_tx.send_replace(desired);
            }
            Err(e) => warn!("Command {} not confirmed, state unchanged: {}", id, e),
        }
        self.refresh_trigger(&state);
    }

    fn refresh_trigger(&self, state: &GateState) {
        let enabled = self.session.status().is_connected() && state.outstanding.is_none();
        self.enabled_tx.send_if_modified(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        });
    }

    pub async fn visible_state(&self) -> bool {
        self.state.lock().await.visible
    }

    pub async fn is_awaiting_confirmation(&self) -> bool {
        self.state.lock().await.outstanding.is_some()
    }

    pub fn trigger_enabled(&self) -> bool {
        *self.enabled_tx.borrow()
    }

    /// Changes only when a command is confirmed
    pub fn watch_visible(&self) -> watch::Receiver<bool> {
        self.visible_tx.subscribe()
    }

    pub fn watch_trigger(&self) -> watch::Receiver<bool> {
        self.enabled_tx.subscribe()
    }
}

async fn follow_status(gate: Weak<CommandGate>, mut status_rx: watch::Receiver<SessionStatus>) {
    while status_rx.changed().await.is_ok() {
        let status = *status_rx.borrow_and_update();
        let Some(gate) = gate.upgrade() else {
            break;
        };
        debug!("Gate sees session status {}", status);
        let state = gate.state.lock().await;
        gate.refresh_trigger(&state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::QoS;

    #[test]
    fn payloads_follow_desired_state() {
        let config = GateConfig::default();
        assert_eq!(config.payload_for(true), "on");
        assert_eq!(config.payload_for(false), "off");
        assert_eq!(config.topic, "test/message");
        assert_eq!(QoS::from(COMMAND_QOS), QoS::ExactlyOnce);
    }
}
