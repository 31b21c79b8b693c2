use std::time::Duration;

use crate::broker::BrokerOptions;

/// Library-level limit for a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Time from start within which the broker must acknowledge the connection.
pub const CONNECT_WATCHDOG: Duration = Duration::from_secs(30);
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Validated settings the scheduler runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub broker_url: String,
    pub topic: String,
    pub client_id: String,
    /// Delay from connection success to the first publish.
    pub initial_delay: Duration,
    /// Delay between consecutive publishes.
    pub value_interval: Duration,
    pub connect_timeout: Duration,
    pub connect_watchdog: Duration,
}

impl SchedulerConfig {
    pub fn new(
        broker_url: impl Into<String>,
        topic: impl Into<String>,
        client_id: impl Into<String>,
        initial_delay: Duration,
        value_interval: Duration,
    ) -> Self {
        Self {
            broker_url: broker_url.into(),
            topic: topic.into(),
            client_id: client_id.into(),
            initial_delay,
            value_interval,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connect_watchdog: CONNECT_WATCHDOG,
        }
    }

    pub fn broker_options(&self) -> BrokerOptions {
        BrokerOptions {
            client_id: self.client_id.clone(),
            connect_timeout: self.connect_timeout,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}
