pub mod api;
pub mod core;
pub mod utils;

pub use api::{run_download, spawn_download, JobHandle};
pub use core::config::DownloadRequest;
pub use core::model::{Candidate, SourceRef, VerifiedSource};
pub use core::scheduler::DownloadOutcome;
pub use utils::error::{Result, SwarmError};
