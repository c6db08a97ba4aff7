// Backup Orchestrator - drives one world backup from quiesce to cleanup
//
// Idle -> CheckingServerState -> (Quiescing) -> Transferring -> Archiving
//      -> Uploading + Rotating -> SigningLink -> (Resuming) -> CleaningUp -> Done | Failed

use super::types::{BackupError, BackupResult, BackupStage, BackupWarning};
use super::workspace::RunWorkspace;
use crate::archive::Archiver;
use crate::clock::{Clock, SystemClock};
use crate::config::{DEFAULT_WORLD_PATH, LINK_EXPIRY, MAX_BACKUPS, SETTLE_INTERVAL};
use crate::controller::GameServerController;
use crate::store::{RetentionStore, StoredObject};
use crate::transfer::RemoteFileSource;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Console commands sent before the transfer when the server is live
pub const QUIESCE_COMMANDS: [&str; 3] = [
    "say Starting world backup, saving is paused",
    "save-off",
    "save-all",
];

/// Console commands sent after the run when the server was live
pub const RESUME_COMMANDS: [&str; 2] = ["save-on", "say World backup finished"];

pub struct BackupOrchestrator {
    controller: Arc<dyn GameServerController>,
    source: Arc<dyn RemoteFileSource>,
    store: RetentionStore,
    archiver: Archiver,
    clock: Arc<dyn Clock>,
    world_path: String,
    temp_root: PathBuf,
    run_lock: Mutex<()>,
}

impl BackupOrchestrator {
    pub fn new(
        controller: Arc<dyn GameServerController>,
        source: Arc<dyn RemoteFileSource>,
        store: RetentionStore,
    ) -> Self {
        Self {
            controller,
            source,
            store,
            archiver: Archiver::new(),
            clock: Arc::new(SystemClock),
            world_path: DEFAULT_WORLD_PATH.to_string(),
            temp_root: std::env::temp_dir(),
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_world_path(mut self, path: impl Into<String>) -> Self {
        self.world_path = path.into();
        self
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn retention_store(&self) -> &RetentionStore {
        &self.store
    }

    /// Run one backup and return the stored archive with a fresh download link.
    ///
    /// Scratch files are removed and a live server is resumed on every path
    /// out of this function, including failures. Only one run may be in
    /// flight per orchestrator; a concurrent call gets
    /// [`BackupError::AlreadyRunning`].
    pub async fn start_world_backup(&self) -> Result<BackupResult, BackupError> {
        let _run = self.run_lock.try_lock().map_err(|_| BackupError::AlreadyRunning)?;

        let run_id = Uuid::new_v4();
        let span = info_span!("world_backup", run_id = %run_id);
        self.run().instrument(span).await
    }

    /// Every archive in the bucket, oldest first, each with a fresh link
    pub async fn list_all_backups(&self) -> Result<Vec<BackupResult>, BackupError> {
        let objects = self
            .store
            .list_all(&self.store.key_prefix())
            .await
            .map_err(BackupError::Listing)?;

        let mut results = Vec::with_capacity(objects.len());
        for object in objects {
            let url = self
                .store
                .sign_download_url(&object.key, LINK_EXPIRY)
                .await
                .map_err(BackupError::Signing)?;
            results.push(BackupResult {
                key: object.key,
                url: Some(url),
                last_modified_at: object.last_modified,
                warnings: Vec::new(),
            });
        }

        debug!(count = results.len(), "Listed backups");
        Ok(results)
    }

    async fn run(&self) -> Result<BackupResult, BackupError> {
        let mut warnings = Vec::new();

        debug!(stage = %BackupStage::CheckingServerState, "Entering stage");
        let state = self
            .controller
            .run_state()
            .await
            .map_err(BackupError::ServerState)?;
        let was_running = state.is_running();
        info!(state = %state, "Starting world backup");

        if was_running {
            self.quiesce(&mut warnings).await;
        }

        let workspace = RunWorkspace::create(&self.temp_root, self.clock.now());
        let outcome = match &workspace {
            Ok(workspace) => self.capture(workspace, &mut warnings).await,
            Err(e) => Err(BackupError::Workspace(e.to_string())),
        };

        if was_running {
            self.resume(&mut warnings).await;
        }

        debug!(stage = %BackupStage::CleaningUp, "Entering stage");
        if let Ok(workspace) = workspace {
            for problem in workspace.close() {
                record(&mut warnings, BackupStage::CleaningUp, problem);
            }
        }

        match outcome {
            Ok((stored, url)) => {
                info!(
                    key = %stored.key,
                    warnings = warnings.len(),
                    "World backup finished"
                );
                Ok(BackupResult {
                    key: stored.key,
                    url,
                    last_modified_at: stored.last_modified,
                    warnings,
                })
            }
            Err(e) => {
                error!(error = %e, stage = ?e.stage(), "World backup failed");
                Err(e)
            }
        }
    }

    /// Transfer, archive, upload, rotate and sign. Stages up to and including
    /// the upload abort the run; rotation and signing only add warnings.
    async fn capture(
        &self,
        workspace: &RunWorkspace,
        warnings: &mut Vec<BackupWarning>,
    ) -> Result<(StoredObject, Option<String>), BackupError> {
        debug!(stage = %BackupStage::Transferring, "Entering stage");
        self.source
            .fetch_directory(&self.world_path, workspace.scratch_path())
            .await?;

        debug!(stage = %BackupStage::Archiving, "Entering stage");
        self.archiver
            .compress(workspace.scratch_path(), workspace.artifact_path())
            .await?;

        debug!(stage = %BackupStage::Uploading, "Entering stage");
        let stored = self
            .store
            .upload(workspace.artifact_path())
            .await
            .map_err(BackupError::Upload)?;

        debug!(stage = %BackupStage::Rotating, "Entering stage");
        match self
            .store
            .enforce_retention(&self.store.key_prefix(), MAX_BACKUPS)
            .await
        {
            Ok(Some(evicted)) => info!(evicted = %evicted, "Rotated out oldest backup"),
            Ok(None) => {}
            Err(e) => record(warnings, BackupStage::Rotating, e.to_string()),
        }

        debug!(stage = %BackupStage::SigningLink, "Entering stage");
        let url = match self.store.sign_download_url(&stored.key, LINK_EXPIRY).await {
            Ok(url) => Some(url),
            Err(e) => {
                record(warnings, BackupStage::SigningLink, e.to_string());
                None
            }
        };

        Ok((stored, url))
    }

    async fn quiesce(&self, warnings: &mut Vec<BackupWarning>) {
        debug!(stage = %BackupStage::Quiescing, "Entering stage");
        self.send_all(&QUIESCE_COMMANDS, BackupStage::Quiescing, warnings)
            .await;
        // Fixed settle time for the server to finish writing region files
        tokio::time::sleep(SETTLE_INTERVAL).await;
    }

    async fn resume(&self, warnings: &mut Vec<BackupWarning>) {
        debug!(stage = %BackupStage::Resuming, "Entering stage");
        self.send_all(&RESUME_COMMANDS, BackupStage::Resuming, warnings)
            .await;
    }

    // Every command is attempted even if an earlier one failed
    async fn send_all(&self, commands: &[&str], stage: BackupStage, warnings: &mut Vec<BackupWarning>) {
        for command in commands {
            if let Err(e) = self.controller.send_command(command).await {
                record(warnings, stage, format!("`{}` failed: {}", command, e));
            }
        }
    }
}

fn record(warnings: &mut Vec<BackupWarning>, stage: BackupStage, message: String) {
    warn!(stage = %stage, message = %message, "Backup step degraded");
    warnings.push(BackupWarning::new(stage, message));
}
