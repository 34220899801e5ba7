//! Bucketsync - one-way bucket mirroring across S3-compatible providers
//!
//! Given `SOURCE:DEST` provider pairs, makes sure every source bucket
//! exists on the destination and copies new or changed objects over.
//! Destination objects are never deleted.

pub mod config;
pub mod error;
pub mod report;
pub mod storage;
pub mod sync;
pub mod transfer;
pub mod types;

pub use config::RunConfiguration;
pub use error::{ErrorKind, Result, SyncError};
pub use sync::{BucketReconciler, SyncOrchestrator};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
