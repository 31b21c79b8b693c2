use publisher::{LoadError, SchedulerError};

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_INVALID_CONFIG: i32 = 23;

#[derive(Debug, thiserror::Error)]
pub enum FilePublisherError {
    #[error("the environment is invalid (cause: {0})")]
    Config(String),

    #[error("{0}")]
    Load(#[from] LoadError),

    #[error("{0}")]
    Scheduler(#[from] SchedulerError),
}

impl FilePublisherError {
    pub fn exit_code(&self) -> i32 {
        match self {
            FilePublisherError::Config(_) => EXIT_INVALID_CONFIG,
            FilePublisherError::Load(_) | FilePublisherError::Scheduler(_) => EXIT_FAILURE,
        }
    }
}
