//! # mqtt-toggle
//!
//! Minimal MQTT client that flips a remote on/off state and only shows the
//! new state once the broker has confirmed delivery.
//!
//! ```text
//! CommandGate ──► SessionHandle ──► SessionWorker ──► Transport (rumqttc)
//!      ▲                                 │
//!      └──── PendingDelivery ◄───────────┤
//!                                        └──► SessionListener (StatusPresenter)
//! ```
//!
//! - [`mqtt`] - session state machine and the transport it drives
//! - [`gate`] - serializes user triggers behind delivery confirmation
//! - [`presenter`] - status text and trigger state for a front end
//! - [`config`] - TOML configuration

pub mod config;
pub mod gate;
pub mod mqtt;
pub mod presenter;
