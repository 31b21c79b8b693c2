use crate::broker::BrokerError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("record #{index} encoding: {source}")]
    Encode { index: usize, source: serde_json::Error },
}
