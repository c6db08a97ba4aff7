//! # World Backup
//!
//! Snapshots a remote game server's world directory into an S3 bucket.
//!
//! ## Overview
//!
//! A backup run pauses saving on the live server, pulls the world folder over
//! SFTP into a scratch directory, zips it, uploads the archive, keeps at most
//! ten archives in the bucket, and hands back a short-lived download link.
//! Scratch files are removed and the server is resumed whether or not the run
//! succeeds.
//!
//! ```rust,no_run
//! use world_backup::backup::BackupOrchestrator;
//! use world_backup::config::Config;
//!
//! # async fn example() -> world_backup::Result<()> {
//! let config = Config::from_env()?;
//! let orchestrator = BackupOrchestrator::from_config(&config).await?;
//!
//! let result = orchestrator.start_world_backup().await?;
//! println!("{} -> {:?}", result.key, result.url);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`backup`]: run orchestration, scratch workspace and result types
//! - [`transfer`]: remote directory download (SFTP)
//! - [`archive`]: zip compression of a directory tree
//! - [`store`]: object storage, retention and signed links
//! - [`controller`]: game server control panel client
//! - [`config`]: environment configuration and fixed limits
//! - [`clock`]: time source

#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for world backup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Control panel error
    #[error("Controller error: {0}")]
    Controller(#[from] controller::ControllerError),

    /// Backup run or listing failure
    #[error("Backup error: {0}")]
    Backup(#[from] backup::BackupError),

    /// Object store error outside a backup run
    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),
}

/// Backup run orchestration
pub mod backup;

/// Zip archiving
pub mod archive;

/// Remote file transfer
pub mod transfer;

/// Object storage and retention
pub mod store;

/// Game server control
pub mod controller;

/// Configuration
pub mod config;

/// Time source
pub mod clock;

pub use backup::{BackupError, BackupOrchestrator, BackupResult, BackupWarning};
pub use config::Config;
