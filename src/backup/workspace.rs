// Per-run scratch space
// One uniquely named directory for the transferred world and one archive
// path next to it. Both are removed on close, and on drop as a fallback.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const SCRATCH_PREFIX: &str = "world-";

pub struct RunWorkspace {
    scratch: Option<TempDir>,
    scratch_path: PathBuf,
    artifact: PathBuf,
}

impl RunWorkspace {
    /// Create `<root>/world-<random>/` and reserve
    /// `<root>/world-<random>-<timestamp>.zip` for the archive
    pub fn create(root: &Path, now: DateTime<Utc>) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(root)?;

        let scratch_name = scratch
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| SCRATCH_PREFIX.trim_end_matches('-').to_string());
        let artifact = root.join(format!(
            "{}-{}.zip",
            scratch_name,
            now.format("%Y%m%dT%H%M%S%3fZ")
        ));

        debug!(scratch = %scratch.path().display(), artifact = %artifact.display(), "Workspace created");
        Ok(Self {
            scratch_path: scratch.path().to_path_buf(),
            scratch: Some(scratch),
            artifact,
        })
    }

    pub fn scratch_path(&self) -> &Path {
        &self.scratch_path
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact
    }

    /// Remove the archive and the scratch directory. Returns a description
    /// of every removal that failed.
    pub fn close(mut self) -> Vec<String> {
        let mut problems = Vec::new();

        if let Err(e) = remove_if_present(&self.artifact) {
            problems.push(format!("Failed to delete {}: {}", self.artifact.display(), e));
        }

        if let Some(scratch) = self.scratch.take() {
            if let Err(e) = scratch.close() {
                problems.push(format!("Failed to delete {}: {}", self.scratch_path.display(), e));
            }
        }

        problems
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        // TempDir removes the scratch directory on its own drop
        if let Err(e) = remove_if_present(&self.artifact) {
            warn!(path = %self.artifact.display(), error = %e, "Failed to delete archive");
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
