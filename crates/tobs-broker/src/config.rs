//! Broker tunables

use std::time::Duration;

/// How long to wait for a forwarding session to be confirmed
pub const DEFAULT_TUNNEL_SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Port TimescaleDB listens on inside the pod
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Database used when the caller does not name one
pub const DEFAULT_DATABASE: &str = "postgres";

/// Settings shared by the resolver, tunnel manager and rotation coordinator.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Upper bound on tunnel establishment
    pub tunnel_setup_timeout: Duration,
    /// Connect timeout written into tunneled and direct descriptors
    pub connect_timeout: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            tunnel_setup_timeout: DEFAULT_TUNNEL_SETUP_TIMEOUT,
            connect_timeout: None,
        }
    }
}

impl BrokerConfig {
    /// Override the tunnel setup timeout
    pub fn with_tunnel_setup_timeout(mut self, timeout: Duration) -> Self {
        self.tunnel_setup_timeout = timeout;
        self
    }

    /// Set the connect timeout carried by produced descriptors
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}
