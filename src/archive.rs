//! Zip archiving of a local directory tree
//!
//! Archive members are rooted at the directory's contents: compressing
//! `/tmp/world-x/` that holds `level.dat` produces a member `level.dat`,
//! not `world-x/level.dat`.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Highest deflate level
pub const MAX_COMPRESSION_LEVEL: i64 = 9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Zip error: {0}")]
    Zip(String),

    #[error("Archive task failed: {0}")]
    Task(String),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(e: zip::result::ZipError) -> Self {
        ArchiveError::Zip(e.to_string())
    }
}

/// Counts reported once the archive is closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub files: usize,
    pub directories: usize,
    /// Uncompressed bytes read from the source tree
    pub source_bytes: u64,
    /// Size of the finished archive
    pub archive_bytes: u64,
}

/// Streams a directory into a single zip file
#[derive(Debug, Clone)]
pub struct Archiver {
    compression_level: i64,
}

impl Default for Archiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Archiver {
    pub fn new() -> Self {
        Self {
            compression_level: MAX_COMPRESSION_LEVEL,
        }
    }

    /// Compress `source` into `destination` on the blocking pool.
    ///
    /// The archive is flushed, synced and closed before this returns. On
    /// failure the partial destination file is removed.
    #[instrument(skip(self))]
    pub async fn compress(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<ArchiveSummary, ArchiveError> {
        let archiver = self.clone();
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();

        let summary = tokio::task::spawn_blocking(move || {
            archiver.compress_blocking(&source, &destination)
        })
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))??;

        info!(
            files = summary.files,
            source_bytes = summary.source_bytes,
            archive_bytes = summary.archive_bytes,
            "World folder compressed"
        );
        Ok(summary)
    }

    /// Synchronous variant of [`Archiver::compress`]
    pub fn compress_blocking(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<ArchiveSummary, ArchiveError> {
        let result = self.write_archive(source, destination);
        if result.is_err() && destination.exists() {
            if let Err(e) = fs::remove_file(destination) {
                warn!(path = %destination.display(), error = %e, "Failed to remove partial archive");
            }
        }
        result
    }

    fn write_archive(&self, source: &Path, destination: &Path) -> Result<ArchiveSummary, ArchiveError> {
        if !source.is_dir() {
            return Err(ArchiveError::Io(format!(
                "Source {} is not a directory",
                source.display()
            )));
        }

        let file = File::create(destination).map_err(|e| io_error("create", destination, e))?;
        let mut writer = ZipWriter::new(BufWriter::new(file));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(self.compression_level));

        let mut summary = ArchiveSummary::default();

        for entry in walk(source)? {
            let name = member_name(source, &entry.path)?;
            if entry.is_dir {
                writer.add_directory(format!("{}/", name), options)?;
                summary.directories += 1;
            } else {
                writer.start_file(name, options)?;
                let mut input = File::open(&entry.path).map_err(|e| io_error("open", &entry.path, e))?;
                summary.source_bytes +=
                    io::copy(&mut input, &mut writer).map_err(|e| io_error("read", &entry.path, e))?;
                summary.files += 1;
            }
        }

        let mut buffered = writer.finish()?;
        buffered.flush().map_err(|e| io_error("flush", destination, e))?;
        let file = buffered
            .into_inner()
            .map_err(|e| ArchiveError::Io(format!("Failed to flush {}: {}", destination.display(), e)))?;
        file.sync_all().map_err(|e| io_error("sync", destination, e))?;

        summary.archive_bytes = file
            .metadata()
            .map_err(|e| io_error("stat", destination, e))?
            .len();

        debug!(path = %destination.display(), bytes = summary.archive_bytes, "Archive closed");
        Ok(summary)
    }
}

struct WalkEntry {
    path: PathBuf,
    is_dir: bool,
}

/// Depth-first listing of everything under `root`, excluding `root` itself.
/// Entries are sorted by name within each directory so archives are reproducible.
/// Symlinks are not followed and are left out.
fn walk(root: &Path) -> Result<Vec<WalkEntry>, ArchiveError> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            entries.push(WalkEntry { path: entry.into_path(), is_dir: true });
        } else if file_type.is_file() {
            entries.push(WalkEntry { path: entry.into_path(), is_dir: false });
        }
    }

    Ok(entries)
}

fn walk_error(root: &Path, e: walkdir::Error) -> ArchiveError {
    let path = e.path().unwrap_or(root).display().to_string();
    ArchiveError::Io(format!("Failed to list {}: {}", path, e))
}

fn member_name(root: &Path, path: &Path) -> Result<String, ArchiveError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| ArchiveError::Io(format!("{} escapes {}: {}", path.display(), root.display(), e)))?;

    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

fn io_error(action: &str, path: &Path, e: io::Error) -> ArchiveError {
    ArchiveError::Io(format!("Failed to {} {}: {}", action, path.display(), e))
}
