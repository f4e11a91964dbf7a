pub mod error;
pub mod logging;

pub use error::{Result, SwarmError};
pub use logging::{init_logging, LoggingConfig};
