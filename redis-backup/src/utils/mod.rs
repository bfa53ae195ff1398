//! Utility modules for the backup tool.

pub mod blocking;
pub mod errors;
pub mod logger;

pub use blocking::run_blocking;
pub use errors::{BackupError, Result};
