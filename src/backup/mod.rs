// World backup pipeline
// Quiesce the server, pull the world over SFTP, zip it, upload with rotation,
// sign a download link, resume, and clean up local scratch state.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::controller::PanelClient;
use crate::store::{RetentionStore, S3ObjectStore};
use crate::transfer::SftpSource;
use std::sync::Arc;

pub mod orchestrator;
pub mod types;
pub mod workspace;

pub use orchestrator::{BackupOrchestrator, QUIESCE_COMMANDS, RESUME_COMMANDS};
pub use types::{BackupError, BackupResult, BackupStage, BackupWarning};
pub use workspace::RunWorkspace;

impl BackupOrchestrator {
    /// Wire the production collaborators: panel client, SFTP source and S3.
    /// Clients are built once here and reused for the life of the process.
    pub async fn from_config(config: &Config) -> crate::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let controller = Arc::new(PanelClient::new(&config.panel)?);
        let source = Arc::new(SftpSource::new(config.sftp.clone()));
        let object_store = Arc::new(S3ObjectStore::new(&config.store, clock.clone()).await);
        let store = RetentionStore::new(object_store, clock.clone(), config.store.prefix.clone());

        Ok(BackupOrchestrator::new(controller, source, store)
            .with_world_path(config.world_path.clone())
            .with_temp_root(config.temp_root.clone())
            .with_clock(clock))
    }
}
