// Backup run types - results, warnings and failure kinds

use crate::archive::ArchiveError;
use crate::controller::ControllerError;
use crate::store::StoreError;
use crate::transfer::TransferError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stages of a backup run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupStage {
    CheckingServerState,
    Quiescing,
    Transferring,
    Archiving,
    Uploading,
    Rotating,
    SigningLink,
    Resuming,
    CleaningUp,
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupStage::CheckingServerState => "checking-server-state",
            BackupStage::Quiescing => "quiescing",
            BackupStage::Transferring => "transferring",
            BackupStage::Archiving => "archiving",
            BackupStage::Uploading => "uploading",
            BackupStage::Rotating => "rotating",
            BackupStage::SigningLink => "signing-link",
            BackupStage::Resuming => "resuming",
            BackupStage::CleaningUp => "cleaning-up",
        };
        f.write_str(name)
    }
}

/// A step that failed without failing the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupWarning {
    pub stage: BackupStage,
    pub message: String,
}

impl BackupWarning {
    pub fn new(stage: BackupStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

impl fmt::Display for BackupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.message)
    }
}

/// An archive in the bucket plus a link to download it.
///
/// `url` expires a few minutes after issuance and must not be stored; it is
/// `None` only when signing failed after a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupResult {
    pub key: String,
    pub url: Option<String>,
    pub last_modified_at: DateTime<Utc>,
    /// Non-fatal problems hit during the run; empty for listings
    pub warnings: Vec<BackupWarning>,
}

impl BackupResult {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Failures that abort a run. Cleanup and resume have already happened
/// by the time one of these reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("A backup is already in progress")]
    AlreadyRunning,

    #[error("Could not read server state: {0}")]
    ServerState(ControllerError),

    #[error("Could not prepare scratch space: {0}")]
    Workspace(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Archive failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Upload failed: {0}")]
    Upload(StoreError),

    #[error("Listing backups failed: {0}")]
    Listing(StoreError),

    #[error("Signing download link failed: {0}")]
    Signing(StoreError),
}

impl BackupError {
    /// Stage the run was in when it failed
    pub fn stage(&self) -> Option<BackupStage> {
        match self {
            BackupError::AlreadyRunning | BackupError::Listing(_) => None,
            BackupError::ServerState(_) => Some(BackupStage::CheckingServerState),
            BackupError::Workspace(_) | BackupError::Transfer(_) => Some(BackupStage::Transferring),
            BackupError::Archive(_) => Some(BackupStage::Archiving),
            BackupError::Upload(_) => Some(BackupStage::Uploading),
            BackupError::Signing(_) => Some(BackupStage::SigningLink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferStage;

    #[test]
    fn test_error_stage_mapping() {
        let transfer: BackupError = TransferError::new(TransferStage::Connect, "refused").into();
        assert_eq!(transfer.stage(), Some(BackupStage::Transferring));
        assert_eq!(
            BackupError::Upload(StoreError::Upload("503".into())).stage(),
            Some(BackupStage::Uploading)
        );
        assert_eq!(BackupError::AlreadyRunning.stage(), None);
    }

    #[test]
    fn test_warning_display() {
        let warning = BackupWarning::new(BackupStage::Rotating, "delete denied");
        assert_eq!(warning.to_string(), "rotating: delete denied");
    }
}
