//! # MQTT Session Module
//!
//! Provides the MQTT session used by the toggle client: connection lifecycle,
//! the single control subscription, publishing with delivery confirmation and
//! dispatch of inbound traffic to a registered listener.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs            - Broker address and connect parameters
//! ├── error.rs             - Session error taxonomy
//! ├── inflight.rs          - Packet id allocation and pending acknowledgements
//! ├── listener.rs          - Callback interface for session events
//! ├── message.rs           - Inbound message representation
//! ├── rumqtt_transport.rs  - Transport backed by rumqttc's event loop
//! ├── session.rs           - Session worker, status machine and handle
//! └── transport.rs         - Channel link between session and protocol engine
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! SessionHandle ─[SessionAction]→ SessionWorker ─[TransportRequest]→ Transport
//!                                      ↑                                  │
//!                                      └──────────[TransportEvent]────────┘
//!                                      │
//!                                      └─→ SessionListener / PendingDelivery
//! ```
//!
//! The worker owns every piece of session state. Handles only talk to it
//! through channels, so status, the pending-acknowledgement tables and the
//! listener are never touched from two tasks at once.

pub mod config;
pub mod error;
mod inflight;
pub mod listener;
pub mod message;
pub mod rumqtt_transport;
pub mod session;
pub mod transport;

pub use rumqttc::QoS;

/// MQTT packet identifier used to correlate a publish or subscribe with its
/// acknowledgement. Never zero.
pub type MessageId = u16;
