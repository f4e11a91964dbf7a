use thiserror::Error;

/// Fatal, job-terminating errors (spec §7). Transient per-chunk/per-peer
/// failures never reach this type — they are handled entirely inside the
/// Scheduler as `WorkerEvent`s and only ever show up here if they escalate
/// to one of these terminal conditions.
#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("no group of verified sources met the minimum size: {candidates} candidates digested, largest group {largest}")]
    InsufficientVerifiedSources { candidates: usize, largest: usize },

    #[error("job stuck: {rounds} consecutive rounds made no progress, {missing} chunk(s) still missing")]
    Stuck { rounds: u32, missing: usize },

    #[error("assembly I/O error: {message}")]
    AssemblyIo { message: String },

    #[error("job cancelled")]
    Cancelled,

    #[error("invalid job configuration: {message}")]
    InvalidConfig { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SwarmError>;

impl SwarmError {
    pub fn assembly_io(message: impl Into<String>) -> Self {
        Self::AssemblyIo {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
