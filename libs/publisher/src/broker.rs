use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid broker url '{url}': {detail}")]
    InvalidUrl { url: String, detail: String },

    #[error("{operation} request rejected: {detail}")]
    Request { operation: &'static str, detail: String },
}

/// Options for a single broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerOptions {
    pub client_id: String,
    /// Library-level limit for one connection attempt.
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
}

/// Outcome of one connection attempt, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectResult {
    Success,
    Timeout,
    Error(String),
}

/// Asynchronous notifications from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connect(ConnectResult),
    /// Transport error after the connection was acknowledged.
    Error(String),
}

/// Handle to an open (or opening) broker connection. All calls are
/// fire-and-forget: they enqueue the request and return.
pub trait BrokerSession: Send {
    fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError>;

    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Resolves once the disconnect has been handed to the broker (or
    /// could not be).
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;
}

pub struct Connection {
    pub session: Box<dyn BrokerSession>,
    pub events: mpsc::UnboundedReceiver<BrokerEvent>,
}

/// Connect capability. `connect` must not wait for the broker: the
/// result of the attempt arrives later on [`Connection::events`].
pub trait Broker {
    fn connect(&mut self, url: &str, options: &BrokerOptions) -> Result<Connection, BrokerError>;
}
