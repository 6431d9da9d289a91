pub mod cli;
pub mod config;
pub mod error;
pub mod sync;
pub mod tasks;
pub mod util;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
