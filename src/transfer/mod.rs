//! Remote file transfer
//!
//! [`RemoteFileSource`] copies a remote directory tree into a local directory
//! owned by the caller. [`SftpSource`] is the production implementation.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub mod sftp;

pub use sftp::SftpSource;

/// Which part of the session failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    Connect,
    Authenticate,
    Read,
    Write,
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStage::Connect => "connect",
            TransferStage::Authenticate => "authenticate",
            TransferStage::Read => "read",
            TransferStage::Write => "write",
        };
        f.write_str(name)
    }
}

/// Any failure while pulling the remote tree
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Transfer failed during {stage}: {message}")]
pub struct TransferError {
    pub stage: TransferStage,
    pub message: String,
}

impl TransferError {
    pub fn new(stage: TransferStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// What a transfer copied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Copies a remote directory into local storage
#[async_trait]
pub trait RemoteFileSource: Send + Sync {
    /// Copy the tree under `remote_path` into `destination`.
    ///
    /// `destination` must be an existing, empty directory. The session is
    /// closed before this returns, whether or not the copy succeeded.
    async fn fetch_directory(
        &self,
        remote_path: &str,
        destination: &Path,
    ) -> Result<TransferSummary, TransferError>;
}

/// Reject destinations that are missing, not directories, or not empty
pub fn check_destination(destination: &Path) -> Result<(), TransferError> {
    let mut entries = std::fs::read_dir(destination).map_err(|e| {
        TransferError::new(
            TransferStage::Write,
            format!("Destination {} is not readable: {}", destination.display(), e),
        )
    })?;

    if entries.next().is_some() {
        return Err(TransferError::new(
            TransferStage::Write,
            format!("Destination {} is not empty", destination.display()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_destination() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_destination(dir.path()).is_ok());

        std::fs::write(dir.path().join("level.dat"), b"x").unwrap();
        let err = check_destination(dir.path()).unwrap_err();
        assert_eq!(err.stage, TransferStage::Write);

        let missing = dir.path().join("missing");
        assert!(check_destination(&missing).is_err());
    }

    #[test]
    fn test_error_message_names_stage() {
        let err = TransferError::new(TransferStage::Authenticate, "bad password");
        assert_eq!(err.to_string(), "Transfer failed during authenticate: bad password");
    }
}
