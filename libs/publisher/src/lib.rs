//! Replays recorded JSON values onto a broker topic at a fixed cadence.
//!
//! [`RecordSequence`] holds the records sorted by `endDate`, [`Scheduler`]
//! connects through a [`Broker`] and publishes one record per tick:
//! the first after `initial_delay`, the rest every `value_interval`.

pub mod broker;
pub mod config;
pub mod error;
pub mod mqtt;
pub mod records;
mod scheduler;

pub use broker::{Broker, BrokerError, BrokerEvent, BrokerOptions, BrokerSession, ConnectResult, Connection};
pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use mqtt::MqttBroker;
pub use records::{LoadError, Record, RecordSequence};
pub use scheduler::{ConnectionState, EXIT_CONNECT_TIMEOUT, EXIT_INTERRUPTED, EXIT_SUCCESS, Outcome, Scheduler};
