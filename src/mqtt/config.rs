use std::time::Duration;

use rumqttc::MqttOptions;
use serde::{Deserialize, Serialize};

/// Connection parameters for the broker session.
///
/// Fixed once the session is spawned. Every field has a default so a partial
/// TOML table is enough to describe a broker.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Broker host name or IP address
    pub host: String,
    /// Broker TCP port
    pub port: u16,
    /// Client identifier sent in CONNECT
    pub client_id: String,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// How long to wait for CONNACK, SUBACK or the delivery handshake before
    /// failing the operation. `None` waits forever.
    pub ack_timeout_ms: Option<u64>,
    /// Capacity of the request queues between handle, session and transport
    pub request_capacity: usize,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "mqtt-server".to_string(),
            port: 1883,
            client_id: "mqtt-toggle".to_string(),
            keep_alive_secs: 60,
            ack_timeout_ms: Some(10_000),
            request_capacity: 100,
            username: None,
            password: None,
        }
    }
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_ms.map(Duration::from_millis)
    }

    /// Channel capacity, never zero.
    pub fn capacity(&self) -> usize {
        self.request_capacity.max(1)
    }

    /// Builds the rumqttc options for a fresh connection attempt.
    ///
    /// Sessions are always clean: nothing survives a reconnect, so in-flight
    /// state from an earlier connection can never be replayed into a new one.
    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options
            .set_keep_alive(Duration::from_secs(self.keep_alive_secs))
            .set_clean_session(true);

        if let Some(user) = &self.username {
            options.set_credentials(user.clone(), self.password.clone().unwrap_or_default());
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_the_lab_broker() {
        let config = SessionConfig::default();
        assert_eq!(config.host, "mqtt-server");
        assert_eq!(config.port, 1883);
        assert_eq!(config.ack_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn options_carry_address_and_keep_alive() {
        let config = SessionConfig {
            keep_alive_secs: 15,
            ..SessionConfig::new("broker.local", 1884)
        };
        let options = config.mqtt_options();
        assert_eq!(
            options.broker_address(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert!(options.clean_session());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let config = SessionConfig {
            request_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.capacity(), 1);
    }
}
