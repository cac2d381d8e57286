use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
/// Batch error
pub enum BatchError {
    /// A line of the input does not match the configured record layout.
    #[error("Malformed record at line {line}: expected {expected} fields, found {found}")]
    MalformedRecord {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("ItemReader from: {0}")]
    ItemReader(String),

    /// Opening, reading from or closing the underlying resource failed.
    #[error("Resource error: {0}")]
    Resource(String),

    #[error("ItemProcessor from: {0}")]
    ItemProcessor(String),

    #[error("ItemWriter from: {0}")]
    ItemWriter(String),

    #[error("Step {0} failed")]
    Step(String),

    #[error("A job execution for this instance is already running: {0}")]
    JobExecutionAlreadyRunning(String),

    #[error("A job instance already exists and is complete: {0}")]
    JobInstanceAlreadyComplete(String),

    #[error("Invalid job parameters: {0}")]
    InvalidJobParameters(String),

    #[error("Illegal status transition: {0}")]
    StatusTransition(String),

    #[error("Listener from: {0}")]
    Listener(String),

    #[error("JobRepository from: {0}")]
    Repository(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BatchError {
    /// Whether the error concerns a single item and may be skipped.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            BatchError::MalformedRecord { .. }
                | BatchError::ItemReader(_)
                | BatchError::ItemProcessor(_)
        )
    }
}
