pub mod assembler;
pub mod chunk_plan;
pub mod config;
pub mod digest;
pub mod libp2p_transport;
pub mod metrics;
pub mod model;
pub mod oracle;
pub mod queue;
pub mod scheduler;
pub mod transport;
pub mod verification;
pub mod worker;

pub use config::DownloadRequest;
pub use model::{Candidate, Chunk, ChunkResult, SourceRef, VerifiedSource};
pub use oracle::HashOracle;
pub use scheduler::DownloadOutcome;
pub use transport::TransportAdapter;
